//! Transaction lifecycle states and events
//!
//! ```text
//! Active --abort-->    Aborted
//! Active --error-->    Error
//! Active --complete--> Committed
//! ```
//!
//! All three targets are terminal.

use std::fmt;

use crate::error::DbError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
    Error,
}

impl TransactionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::Active => "active",
            TransactionState::Committed => "committed",
            TransactionState::Aborted => "aborted",
            TransactionState::Error => "error",
        }
    }

    /// Returns true once no further transition is possible
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionState::Active)
    }

    /// State reached when `kind` fires on an active transaction
    pub fn after(kind: TransactionEventKind) -> Self {
        match kind {
            TransactionEventKind::Error => TransactionState::Error,
            TransactionEventKind::Abort => TransactionState::Aborted,
            TransactionEventKind::Complete => TransactionState::Committed,
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Names of the three terminal events handlers can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionEventKind {
    Error,
    Abort,
    Complete,
}

impl TransactionEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionEventKind::Error => "error",
            TransactionEventKind::Abort => "abort",
            TransactionEventKind::Complete => "complete",
        }
    }
}

impl fmt::Display for TransactionEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payload handed to handlers
#[derive(Debug, Clone)]
pub enum TransactionEvent {
    /// The store reported a failure that ended the transaction
    Error(DbError),
    Abort,
    Complete,
}

impl TransactionEvent {
    pub fn kind(&self) -> TransactionEventKind {
        match self {
            TransactionEvent::Error(_) => TransactionEventKind::Error,
            TransactionEvent::Abort => TransactionEventKind::Abort,
            TransactionEvent::Complete => TransactionEventKind::Complete,
        }
    }

    /// Converts the event into the outcome seen by awaiting callers
    pub fn outcome(&self) -> Result<(), DbError> {
        match self {
            TransactionEvent::Error(e) => Err(e.clone()),
            TransactionEvent::Abort => Err(DbError::TransactionAborted),
            TransactionEvent::Complete => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        assert_eq!(
            TransactionState::after(TransactionEventKind::Abort),
            TransactionState::Aborted
        );
        assert_eq!(
            TransactionState::after(TransactionEventKind::Error),
            TransactionState::Error
        );
        assert_eq!(
            TransactionState::after(TransactionEventKind::Complete),
            TransactionState::Committed
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TransactionState::Active.is_terminal());
        assert!(TransactionState::Committed.is_terminal());
        assert!(TransactionState::Aborted.is_terminal());
        assert!(TransactionState::Error.is_terminal());
    }

    #[test]
    fn test_event_outcomes() {
        assert!(TransactionEvent::Complete.outcome().is_ok());
        assert_eq!(
            TransactionEvent::Abort.outcome().unwrap_err().code(),
            "AERO_TRANSACTION_ABORTED"
        );
        assert_eq!(
            TransactionEvent::Error(DbError::EmptyTableList).kind(),
            TransactionEventKind::Error
        );
    }
}
