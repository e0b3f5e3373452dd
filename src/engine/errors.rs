//! Storage engine error types
//!
//! Error codes:
//! - ENGINE_NOT_FOUND: table or index outside the schema or transaction scope
//! - ENGINE_READ_ONLY: write attempted in a readonly transaction
//! - ENGINE_CONSTRAINT: duplicate primary key or unique index value
//! - ENGINE_DATA: record or key not usable by the store
//! - ENGINE_TRANSACTION_INACTIVE: request on a finished native transaction
//! - ENGINE_UNSUPPORTED: capability not offered by the engine
//! - ENGINE_INTERNAL: engine bug or poisoned state

use thiserror::Error;

/// Result type for storage engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Write to '{0}' in a readonly transaction")]
    ReadOnly(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("Transaction is not active")]
    TransactionInactive,

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Internal engine error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "ENGINE_NOT_FOUND",
            EngineError::ReadOnly(_) => "ENGINE_READ_ONLY",
            EngineError::Constraint(_) => "ENGINE_CONSTRAINT",
            EngineError::Data(_) => "ENGINE_DATA",
            EngineError::TransactionInactive => "ENGINE_TRANSACTION_INACTIVE",
            EngineError::Unsupported(_) => "ENGINE_UNSUPPORTED",
            EngineError::Internal(_) => "ENGINE_INTERNAL",
        }
    }
}
