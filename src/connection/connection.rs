//! Connection and transaction coordinator
//!
//! A connection holds at most one current transaction. While it is active,
//! `begin_transaction` hands the same transaction to every compatible
//! request instead of opening a new one, so independent operations issued
//! together share one atomic unit. The transaction's terminal event clears
//! the reference again.

use std::future::Future;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::oneshot;

use crate::config::ConnectionConfig;
use crate::engine::StorageEngine;
use crate::error::{DbError, DbResult};
use crate::lock_unpoisoned;
use crate::observability::Logger;
use crate::transaction::{
    Transaction, TransactionEvent, TransactionHandlers, TransactionMode,
};

/// Parameters of `Connection::begin_transaction`
#[derive(Default)]
pub struct TransactionRequest {
    /// Requested mode (default: readwrite)
    pub mode: TransactionMode,
    /// Tables to scope the transaction to; every table when `None`
    pub tables: Option<Vec<String>>,
    /// Handlers appended to the transaction, new or reused
    pub handlers: TransactionHandlers,
}

impl TransactionRequest {
    pub fn new(mode: TransactionMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn readonly() -> Self {
        Self::new(TransactionMode::ReadOnly)
    }

    pub fn readwrite() -> Self {
        Self::new(TransactionMode::ReadWrite)
    }

    pub fn schema_change() -> Self {
        Self::new(TransactionMode::SchemaChange)
    }

    pub fn with_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables = Some(tables.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_handlers(mut self, handlers: TransactionHandlers) -> Self {
        self.handlers = std::mem::take(&mut self.handlers).extend(handlers);
        self
    }

    pub fn on_error(self, handler: impl FnOnce(&TransactionEvent) + Send + 'static) -> Self {
        self.with_handlers(TransactionHandlers::new().on_error(handler))
    }

    pub fn on_abort(self, handler: impl FnOnce(&TransactionEvent) + Send + 'static) -> Self {
        self.with_handlers(TransactionHandlers::new().on_abort(handler))
    }

    pub fn on_complete(self, handler: impl FnOnce(&TransactionEvent) + Send + 'static) -> Self {
        self.with_handlers(TransactionHandlers::new().on_complete(handler))
    }
}

struct ConnectionShared {
    config: ConnectionConfig,
    engine: Mutex<Option<Arc<dyn StorageEngine>>>,
    current: Mutex<Option<Transaction>>,
}

/// A connection to one database
///
/// Clones share the engine reference and the current transaction.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<ConnectionShared>,
}

impl Connection {
    /// Connects to `engine`, checking the configured database and version
    pub fn open(engine: Arc<dyn StorageEngine>, config: ConnectionConfig) -> DbResult<Self> {
        config.validate()?;
        let schema = engine.schema();
        if schema.name != config.database {
            return Err(DbError::configuration(format!(
                "engine serves database '{}', not '{}'",
                schema.name, config.database
            )));
        }
        if let Some(expected) = config.version {
            if expected != schema.version {
                return Err(DbError::configuration(format!(
                    "database '{}' is at version {}, expected {}",
                    schema.name, schema.version, expected
                )));
            }
        }

        Logger::info(
            "CONNECTION_OPEN",
            &[
                ("database", &config.database),
                ("driver", &config.driver),
                ("version", &schema.version.to_string()),
            ],
        );
        Ok(Self {
            shared: Arc::new(ConnectionShared {
                config,
                engine: Mutex::new(Some(engine)),
                current: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    pub fn is_connected(&self) -> bool {
        lock_unpoisoned(&self.shared.engine).is_some()
    }

    /// The storage engine, while connected
    pub fn engine(&self) -> DbResult<Arc<dyn StorageEngine>> {
        lock_unpoisoned(&self.shared.engine)
            .clone()
            .ok_or(DbError::NotConnected)
    }

    /// Drops the engine reference, rolling back an active transaction first
    pub fn close(&self) {
        let current = lock_unpoisoned(&self.shared.current).take();
        if let Some(transaction) = current {
            if transaction.is_active() {
                let _ = transaction.rollback();
            }
        }
        if lock_unpoisoned(&self.shared.engine).take().is_some() {
            Logger::info("CONNECTION_CLOSE", &[("database", &self.shared.config.database)]);
        }
    }

    /// The current transaction, if one is active
    pub fn current_transaction(&self) -> Option<Transaction> {
        let mut current = lock_unpoisoned(&self.shared.current);
        match current.as_ref() {
            Some(transaction) if transaction.is_active() => Some(transaction.clone()),
            Some(_) => {
                *current = None;
                None
            }
            None => None,
        }
    }

    /// Returns true if an active transaction exists (in `mode`, when given)
    pub fn has_transaction(&self, mode: Option<TransactionMode>) -> bool {
        match self.current_transaction() {
            Some(transaction) => mode.map_or(true, |m| transaction.mode() == m),
            None => false,
        }
    }

    /// Returns the active transaction if it can serve `request`, otherwise
    /// opens a new one.
    pub fn begin_transaction(&self, request: TransactionRequest) -> DbResult<Transaction> {
        self.begin(request, true)
    }

    /// Runs `operation` in a fresh transaction over every table.
    ///
    /// Commits when the operation succeeds and rolls back when it fails.
    /// Resolves once the transaction reached its terminal state; an error
    /// returned by the operation takes precedence over the terminal outcome.
    pub async fn run_transaction<F, Fut>(
        &self,
        mode: TransactionMode,
        operation: F,
    ) -> DbResult<()>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = DbResult<()>>,
    {
        let (sender, receiver) = oneshot::channel();
        let request =
            TransactionRequest::new(mode).with_handlers(TransactionHandlers::notify(sender));
        let transaction = self.begin(request, false)?;

        let outcome = operation(transaction.clone()).await;
        let failure = match outcome {
            Ok(()) => {
                if transaction.is_active() {
                    let _ = transaction.commit();
                }
                None
            }
            Err(e) => {
                if transaction.is_active() {
                    let _ = transaction.rollback();
                }
                Some(e)
            }
        };

        let terminal = match receiver.await {
            Ok(outcome) => outcome,
            Err(_) => transaction.finished().await,
        };
        match failure {
            Some(e) => Err(e),
            None => terminal,
        }
    }

    fn begin(&self, request: TransactionRequest, reuse: bool) -> DbResult<Transaction> {
        let engine = self.engine()?;
        let TransactionRequest {
            mode,
            tables,
            handlers,
        } = request;

        let mut current = lock_unpoisoned(&self.shared.current);
        if current.as_ref().is_some_and(|t| !t.is_active()) {
            *current = None;
        }

        if let Some(active) = current.as_ref() {
            if !reuse {
                return Err(DbError::NestedTransactionNotSupported);
            }
            if !active.mode().satisfies(mode) {
                return Err(DbError::ModeConflict {
                    active: active.mode(),
                    requested: mode,
                });
            }
            if let Some(missing) = tables
                .iter()
                .flatten()
                .find(|table| !active.allows_table(table))
            {
                return Err(DbError::TableNotInTransaction {
                    table: missing.clone(),
                });
            }
            let active = active.clone();
            drop(current);

            active.merge_handlers(handlers);
            Logger::trace(
                "TRANSACTION_REUSE",
                &[("id", &active.id().to_string()), ("requested", mode.as_str())],
            );
            return Ok(active);
        }

        let tables = match tables {
            Some(tables) if tables.is_empty() => return Err(DbError::EmptyTableList),
            Some(tables) => tables,
            None => engine.schema().table_names(),
        };

        let transaction = Transaction::open(engine, tables, mode)?;
        let shared: Weak<ConnectionShared> = Arc::downgrade(&self.shared);
        transaction.set_on_finish(Box::new(move |id| {
            if let Some(shared) = shared.upgrade() {
                let mut current = lock_unpoisoned(&shared.current);
                if current.as_ref().map(|t| t.id()) == Some(id) {
                    *current = None;
                }
            }
        }));
        transaction.merge_handlers(handlers);
        *current = Some(transaction.clone());
        Ok(transaction)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("config", &self.shared.config)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Finishes a transaction opened for a single operation.
///
/// Commits on success and rolls back on failure, then waits for the
/// terminal event. The operation's own error wins over the terminal outcome.
pub(crate) async fn settle<T>(transaction: &Transaction, outcome: DbResult<T>) -> DbResult<T> {
    let finished = transaction.finished();
    match outcome {
        Ok(value) => {
            if transaction.is_active() {
                let _ = transaction.commit();
            }
            finished.await.map(|()| value)
        }
        Err(e) => {
            if transaction.is_active() {
                let _ = transaction.rollback();
            }
            let _ = finished.await;
            Err(e)
        }
    }
}
