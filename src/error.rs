//! Crate-level error type
//!
//! Error codes:
//! - AERO_CONFIGURATION_ERROR (REJECT)
//! - AERO_CALLBACK_REQUIRED (REJECT)
//! - AERO_MODE_CONFLICT (REJECT)
//! - AERO_TABLE_NOT_IN_TRANSACTION (REJECT)
//! - AERO_TABLE_NOT_ACCESSIBLE (REJECT)
//! - AERO_EMPTY_TABLE_LIST (REJECT)
//! - AERO_NESTED_TRANSACTION (REJECT)
//! - AERO_INVALID_MODIFIER (REJECT)
//! - AERO_TYPE_MISMATCH (REJECT)
//! - AERO_UNSUPPORTED_OPERATION (REJECT)
//! - AERO_TRANSACTION_INACTIVE (REJECT)
//! - AERO_TRANSACTION_ABORTED (ERROR)
//! - AERO_NOT_CONNECTED (REJECT)
//! - AERO_STORAGE_ENGINE (ERROR)
//!
//! REJECT errors are argument or state validation failures raised before any
//! storage call is made. ERROR errors come back from the storage engine.

use thiserror::Error;

use crate::engine::EngineError;
use crate::transaction::TransactionMode;

/// Result type for every public operation of the crate
pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Clone, Error)]
pub enum DbError {
    /// Missing or malformed required argument
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Callback-style entry point invoked without a callback
    #[error("A completion callback is required")]
    CallbackRequired,

    /// A weaker active transaction cannot be promoted
    #[error("Active {active} transaction cannot serve a {requested} request")]
    ModeConflict {
        active: TransactionMode,
        requested: TransactionMode,
    },

    /// Table requested from an active transaction that does not cover it
    #[error("Table '{table}' is not part of the active transaction")]
    TableNotInTransaction { table: String },

    /// Table handle requested outside the transaction whitelist
    #[error("Table '{table}' is not accessible in this {mode} transaction")]
    TableNotAccessible { table: String, mode: TransactionMode },

    /// Explicit empty table list on transaction begin
    #[error("Transaction table list must not be empty")]
    EmptyTableList,

    #[error("Nested transactions are not supported")]
    NestedTransactionNotSupported,

    /// Unknown update modifier
    #[error("Invalid update modifier '{modifier}'")]
    InvalidModifier { modifier: String },

    /// Arithmetic modifier applied to a non-numeric field
    #[error("Field '{field}' {reason}")]
    TypeMismatch { field: String, reason: String },

    /// Capability not offered by the host storage engine or driver set
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Operation attempted on a transaction that already reached a terminal state
    #[error("Transaction is no longer active (state: {state})")]
    TransactionInactive { state: String },

    /// Transaction finished through the abort path
    #[error("Transaction aborted")]
    TransactionAborted,

    #[error("Connection is closed")]
    NotConnected,

    /// Pass-through of a storage engine failure, tagged with its call site
    #[error("Storage engine error during {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: EngineError,
    },
}

impl DbError {
    /// Create a configuration error
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }

    /// Wrap an engine error with diagnostic context
    pub fn storage(context: impl Into<String>, source: EngineError) -> Self {
        Self::Storage {
            context: context.into(),
            source,
        }
    }

    /// Appends `detail` to the context of a storage error; other errors
    /// pass through unchanged
    pub fn within(self, detail: impl AsRef<str>) -> Self {
        match self {
            Self::Storage { context, source } => Self::Storage {
                context: format!("{}, {}", context, detail.as_ref()),
                source,
            },
            other => other,
        }
    }

    /// Returns the stable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "AERO_CONFIGURATION_ERROR",
            Self::CallbackRequired => "AERO_CALLBACK_REQUIRED",
            Self::ModeConflict { .. } => "AERO_MODE_CONFLICT",
            Self::TableNotInTransaction { .. } => "AERO_TABLE_NOT_IN_TRANSACTION",
            Self::TableNotAccessible { .. } => "AERO_TABLE_NOT_ACCESSIBLE",
            Self::EmptyTableList => "AERO_EMPTY_TABLE_LIST",
            Self::NestedTransactionNotSupported => "AERO_NESTED_TRANSACTION",
            Self::InvalidModifier { .. } => "AERO_INVALID_MODIFIER",
            Self::TypeMismatch { .. } => "AERO_TYPE_MISMATCH",
            Self::UnsupportedOperation(_) => "AERO_UNSUPPORTED_OPERATION",
            Self::TransactionInactive { .. } => "AERO_TRANSACTION_INACTIVE",
            Self::TransactionAborted => "AERO_TRANSACTION_ABORTED",
            Self::NotConnected => "AERO_NOT_CONNECTED",
            Self::Storage { .. } => "AERO_STORAGE_ENGINE",
        }
    }

    /// Returns true for errors raised before any storage call
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::Storage { .. } | Self::TransactionAborted)
    }

    /// Returns the wrapped engine error, if any
    pub fn engine_error(&self) -> Option<&EngineError> {
        match self {
            Self::Storage { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(DbError::EmptyTableList.code(), "AERO_EMPTY_TABLE_LIST");
        assert_eq!(
            DbError::NestedTransactionNotSupported.code(),
            "AERO_NESTED_TRANSACTION"
        );
        assert_eq!(
            DbError::InvalidModifier {
                modifier: "$push".into()
            }
            .code(),
            "AERO_INVALID_MODIFIER"
        );
    }

    #[test]
    fn test_storage_error_carries_context() {
        let err = DbError::storage(
            "scan of 'user' (readonly)",
            EngineError::NotFound("user".into()),
        );
        let display = err.to_string();
        assert!(display.contains("scan of 'user'"));
        assert!(display.contains("user"));
        assert!(!err.is_validation());
        assert!(err.engine_error().is_some());
    }

    #[test]
    fn test_within_extends_storage_context_only() {
        let err = DbError::storage("scan of 'user'", EngineError::Internal("boom".into()))
            .within("filter {\"age\":1}");
        assert!(err.to_string().contains("scan of 'user', filter {\"age\":1}"));

        let err = DbError::EmptyTableList.within("ignored");
        assert!(matches!(err, DbError::EmptyTableList));
    }

    #[test]
    fn test_mode_conflict_display() {
        let err = DbError::ModeConflict {
            active: TransactionMode::ReadOnly,
            requested: TransactionMode::ReadWrite,
        };
        assert_eq!(
            err.to_string(),
            "Active readonly transaction cannot serve a readwrite request"
        );
        assert!(err.is_validation());
    }
}
