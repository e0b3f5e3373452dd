//! aeroquery - declarative queries and coordinated transactions over an
//! ordered, indexed key-value store
//!
//! The crate sits on top of a storage engine that offers per-table primary
//! keys, secondary indexes, key ranges and cursors (see [`engine`]). It adds:
//!
//! - a query engine that resolves a filter through the cheapest correct
//!   access path and joins tables into nested results ([`executor`],
//!   [`planner`])
//! - a transaction coordinator that keeps one active transaction per
//!   connection, whitelists tables and drives a terminal
//!   commit/abort/error state machine with ordered handlers
//!   ([`connection`], [`transaction`])

pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod executor;
pub mod observability;
pub mod planner;
pub mod schema;
pub mod transaction;

use std::sync::{Mutex, MutexGuard};

pub use config::ConnectionConfig;
pub use connection::{Connection, Driver, DriverRegistry, MemoryDriver, TransactionRequest};
pub use engine::{MemoryEngine, StorageEngine, TransactionMode};
pub use error::{DbError, DbResult};
pub use executor::{QueryEngine, QueryResult, ResultSet};
pub use planner::{Filter, Query};
pub use schema::{DatabaseSchema, IndexSchema, TableSchema};
pub use transaction::{Transaction, TransactionEventKind, TransactionState};

/// Locks `mutex`, recovering the guard if a previous holder panicked
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
