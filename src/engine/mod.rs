//! Storage engine interface
//!
//! The query and transaction layers never touch physical storage directly.
//! They consume an ordered, transactional key-value store through the traits
//! in this module:
//!
//! - `StorageEngine` - schema metadata and native transaction creation
//! - `NativeTransaction` - scans, point reads, writes, commit/abort, and a
//!   single-fire completion event
//! - `Cursor` - ordered record iteration ending with an explicit `None`
//!
//! `MemoryEngine` is an in-process implementation used by the in-memory
//! driver and by tests.

mod errors;
mod key;
mod memory;

use std::fmt;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::DatabaseSchema;

pub use errors::{EngineError, EngineResult};
pub use key::{KeyRange, KeyValue};
pub use memory::MemoryEngine;

/// Future returned by every storage-boundary call
pub type EngineFuture<'a, T> = BoxFuture<'a, EngineResult<T>>;

/// Transaction access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionMode {
    /// Reads only, scoped to a table list
    ReadOnly,
    /// Reads and writes, scoped to a table list
    ReadWrite,
    /// Unrestricted access used while the schema is being changed
    #[serde(rename = "versionchange")]
    SchemaChange,
}

impl TransactionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionMode::ReadOnly => "readonly",
            TransactionMode::ReadWrite => "readwrite",
            TransactionMode::SchemaChange => "versionchange",
        }
    }

    /// Returns true if this mode may write
    pub fn is_writable(&self) -> bool {
        !matches!(self, TransactionMode::ReadOnly)
    }

    /// Returns true if a transaction in this mode can serve `requested`
    pub fn satisfies(&self, requested: TransactionMode) -> bool {
        *self >= requested
    }
}

impl Default for TransactionMode {
    fn default() -> Self {
        TransactionMode::ReadWrite
    }
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal signal delivered by a native transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeEvent {
    /// A request failed and took the transaction down with it
    Error(EngineError),
    /// The transaction was rolled back
    Abort,
    /// The transaction committed
    Complete,
}

/// Receiver for the single terminal event of a native transaction
pub type EventSink = Box<dyn FnOnce(NativeEvent) + Send>;

/// Which ordering a scan walks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanTarget {
    /// The table's primary key
    PrimaryKey,
    /// A named secondary index
    Index(String),
}

/// Ordered iteration over scan results
pub trait Cursor: Send {
    /// Returns the next record, or `None` once the scan is exhausted
    fn next_record(&mut self) -> EngineFuture<'_, Option<Value>>;
}

/// A transaction opened by the storage engine
///
/// Exactly one of error, abort or complete is delivered to the sink
/// registered with `on_event`, exactly once.
pub trait NativeTransaction: Send + Sync {
    /// Mode the transaction was opened with
    fn mode(&self) -> TransactionMode;

    /// Open a cursor over `range` of the primary key or an index.
    ///
    /// An unbounded range over the primary key is a full scan.
    fn open_scan(
        &self,
        table: &str,
        target: ScanTarget,
        range: KeyRange,
    ) -> EngineFuture<'_, Box<dyn Cursor>>;

    /// Point lookup by primary key
    fn get(&self, table: &str, key: KeyValue) -> EngineFuture<'_, Option<Value>>;

    /// Insert or replace a record, returning its primary key
    fn put(&self, table: &str, record: Value) -> EngineFuture<'_, Value>;

    /// Insert a record, failing on an existing primary key
    fn add(&self, table: &str, record: Value) -> EngineFuture<'_, Value>;

    /// Remove the record stored under `key` (no-op when absent)
    fn delete(&self, table: &str, key: KeyValue) -> EngineFuture<'_, ()>;

    /// Request commit; resolution arrives as `NativeEvent::Complete`
    fn commit(&self);

    /// Request abort; resolution arrives as `NativeEvent::Abort`
    fn abort(&self);

    /// Register the terminal event sink
    fn on_event(&self, sink: EventSink);
}

/// An ordered, transactional key-value store
pub trait StorageEngine: Send + Sync {
    /// Table and index metadata
    fn schema(&self) -> &DatabaseSchema;

    /// Open a native transaction scoped to `tables`
    fn begin_native_transaction(
        &self,
        tables: &[String],
        mode: TransactionMode,
    ) -> EngineResult<Box<dyn NativeTransaction>>;
}
