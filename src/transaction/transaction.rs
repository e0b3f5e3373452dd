//! Transaction wrapper around a native store transaction
//!
//! A `Transaction` is a cheap, clonable handle; all clones share one state
//! machine. The native transaction's single terminal event drives the
//! transition, runs the matching handlers in registration order and finally
//! notifies the owning connection.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::engine::{NativeEvent, NativeTransaction, StorageEngine, TransactionMode};
use crate::error::{DbError, DbResult};
use crate::lock_unpoisoned;
use crate::observability::Logger;

use super::handlers::{HandlerRegistry, Subscription, TransactionHandlers};
use super::state::{TransactionEvent, TransactionEventKind, TransactionState};
use super::table::TableHandle;

/// Tables a transaction may touch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableScope {
    /// Fixed whitelist (readonly and readwrite transactions)
    Tables(BTreeSet<String>),
    /// Every table (schema-change transactions)
    Unrestricted,
}

impl TableScope {
    pub fn allows(&self, table: &str) -> bool {
        match self {
            TableScope::Tables(tables) => tables.contains(table),
            TableScope::Unrestricted => true,
        }
    }

    fn describe(&self) -> String {
        match self {
            TableScope::Tables(tables) => tables.iter().cloned().collect::<Vec<_>>().join(","),
            TableScope::Unrestricted => "*".to_string(),
        }
    }
}

type FinishHook = Box<dyn FnOnce(Uuid) + Send>;

struct TransactionInner {
    id: Uuid,
    mode: TransactionMode,
    scope: TableScope,
    engine: Arc<dyn StorageEngine>,
    native: Box<dyn NativeTransaction>,
    state: Mutex<TransactionState>,
    failure: Mutex<Option<DbError>>,
    handlers: Arc<Mutex<HandlerRegistry>>,
    on_finish: Mutex<Option<FinishHook>>,
}

#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

impl Transaction {
    /// Opens a native transaction and wraps it.
    ///
    /// Schema-change transactions are unrestricted; `tables` only scopes
    /// readonly and readwrite transactions.
    pub(crate) fn open(
        engine: Arc<dyn StorageEngine>,
        tables: Vec<String>,
        mode: TransactionMode,
    ) -> DbResult<Self> {
        let native = engine
            .begin_native_transaction(&tables, mode)
            .map_err(|e| {
                DbError::storage(
                    format!("begin of {} transaction on [{}]", mode, tables.join(", ")),
                    e,
                )
            })?;

        let scope = match mode {
            TransactionMode::SchemaChange => TableScope::Unrestricted,
            _ => TableScope::Tables(tables.into_iter().collect()),
        };

        let inner = Arc::new(TransactionInner {
            id: Uuid::new_v4(),
            mode,
            scope,
            engine,
            native,
            state: Mutex::new(TransactionState::Active),
            failure: Mutex::new(None),
            handlers: Arc::new(Mutex::new(HandlerRegistry::default())),
            on_finish: Mutex::new(None),
        });

        let weak: Weak<TransactionInner> = Arc::downgrade(&inner);
        inner.native.on_event(Box::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                Transaction { inner }.dispatch(event);
            }
        }));

        let transaction = Transaction { inner };
        let id = transaction.id().to_string();
        Logger::info(
            "TRANSACTION_BEGIN",
            &[
                ("id", &id),
                ("mode", mode.as_str()),
                ("tables", &transaction.inner.scope.describe()),
            ],
        );
        Ok(transaction)
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn mode(&self) -> TransactionMode {
        self.inner.mode
    }

    pub fn scope(&self) -> &TableScope {
        &self.inner.scope
    }

    pub fn state(&self) -> TransactionState {
        *lock_unpoisoned(&self.inner.state)
    }

    pub fn is_active(&self) -> bool {
        self.state() == TransactionState::Active
    }

    /// Returns true if `table` is inside the accessible set
    pub fn allows_table(&self, table: &str) -> bool {
        self.inner.scope.allows(table)
    }

    /// Registers a handler for one terminal event.
    ///
    /// Handlers registered after the transaction finished never fire; the
    /// returned subscription reports `is_registered() == false`.
    pub fn on(
        &self,
        kind: TransactionEventKind,
        handler: impl FnOnce(&TransactionEvent) + Send + 'static,
    ) -> Subscription {
        let id = lock_unpoisoned(&self.inner.handlers).register(kind, Box::new(handler));
        if id.is_none() {
            Logger::warn(
                "TRANSACTION_LATE_HANDLER",
                &[("id", &self.id().to_string()), ("event", kind.as_str())],
            );
        }
        Subscription::new(id, &self.inner.handlers)
    }

    pub fn on_error(
        &self,
        handler: impl FnOnce(&TransactionEvent) + Send + 'static,
    ) -> Subscription {
        self.on(TransactionEventKind::Error, handler)
    }

    pub fn on_abort(
        &self,
        handler: impl FnOnce(&TransactionEvent) + Send + 'static,
    ) -> Subscription {
        self.on(TransactionEventKind::Abort, handler)
    }

    pub fn on_complete(
        &self,
        handler: impl FnOnce(&TransactionEvent) + Send + 'static,
    ) -> Subscription {
        self.on(TransactionEventKind::Complete, handler)
    }

    /// Appends a batch of handlers, keeping their order
    pub(crate) fn merge_handlers(&self, handlers: TransactionHandlers) {
        if handlers.is_empty() {
            return;
        }
        let mut registry = lock_unpoisoned(&self.inner.handlers);
        for (kind, handler) in handlers.into_entries() {
            registry.register(kind, handler);
        }
    }

    pub(crate) fn set_on_finish(&self, hook: FinishHook) {
        *lock_unpoisoned(&self.inner.on_finish) = Some(hook);
    }

    /// Returns a handle for one table of the transaction
    pub fn get_table(&self, name: &str) -> DbResult<TableHandle> {
        self.ensure_active()?;
        if !self.allows_table(name) {
            return Err(DbError::TableNotAccessible {
                table: name.to_string(),
                mode: self.mode(),
            });
        }
        let schema = self.inner.engine.schema().table(name).cloned().ok_or_else(|| {
            DbError::storage(
                format!("lookup of table '{}' ({} transaction)", name, self.mode()),
                crate::engine::EngineError::NotFound(format!("table '{}'", name)),
            )
        })?;
        Ok(TableHandle::new(self.clone(), schema))
    }

    /// Requests commit. The Committed state arrives with the complete event.
    pub fn commit(&self) -> DbResult<()> {
        self.ensure_active()?;
        self.inner.native.commit();
        Ok(())
    }

    /// Requests abort. The Aborted state arrives with the abort event.
    pub fn rollback(&self) -> DbResult<()> {
        self.ensure_active()?;
        Logger::info("TRANSACTION_ROLLBACK", &[("id", &self.id().to_string())]);
        self.inner.native.abort();
        Ok(())
    }

    /// Resolves once the transaction reached a terminal state
    pub fn finished(&self) -> impl Future<Output = DbResult<()>> + Send + 'static {
        let (sender, receiver) = oneshot::channel();
        self.merge_handlers(TransactionHandlers::notify(sender));
        let this = self.clone();
        async move {
            match receiver.await {
                Ok(outcome) => outcome,
                Err(_) => this.terminal_outcome(),
            }
        }
    }

    /// Outcome of an already finished transaction
    fn terminal_outcome(&self) -> DbResult<()> {
        match self.state() {
            TransactionState::Committed => Ok(()),
            TransactionState::Aborted => Err(DbError::TransactionAborted),
            TransactionState::Error => Err(lock_unpoisoned(&self.inner.failure)
                .clone()
                .unwrap_or(DbError::TransactionAborted)),
            TransactionState::Active => Err(DbError::TransactionInactive {
                state: TransactionState::Active.to_string(),
            }),
        }
    }

    pub(crate) fn native(&self) -> &dyn NativeTransaction {
        self.inner.native.as_ref()
    }

    fn ensure_active(&self) -> DbResult<()> {
        match self.state() {
            TransactionState::Active => Ok(()),
            state => Err(DbError::TransactionInactive {
                state: state.to_string(),
            }),
        }
    }

    fn dispatch(&self, event: NativeEvent) {
        let event = match event {
            NativeEvent::Error(e) => TransactionEvent::Error(DbError::storage(
                format!("{} transaction {}", self.mode(), self.id()),
                e,
            )),
            NativeEvent::Abort => TransactionEvent::Abort,
            NativeEvent::Complete => TransactionEvent::Complete,
        };
        let kind = event.kind();

        {
            let mut state = lock_unpoisoned(&self.inner.state);
            if state.is_terminal() {
                return;
            }
            *state = TransactionState::after(kind);
        }
        if let TransactionEvent::Error(e) = &event {
            *lock_unpoisoned(&self.inner.failure) = Some(e.clone());
            Logger::error(
                "TRANSACTION_ERROR",
                &[("id", &self.id().to_string()), ("error", &e.to_string())],
            );
        } else {
            Logger::info(
                "TRANSACTION_FINISHED",
                &[("id", &self.id().to_string()), ("event", kind.as_str())],
            );
        }

        let handlers = lock_unpoisoned(&self.inner.handlers).take(kind);
        for handler in handlers {
            handler(&event);
        }

        let hook = lock_unpoisoned(&self.inner.on_finish).take();
        if let Some(hook) = hook {
            hook(self.id());
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("mode", &self.inner.mode)
            .field("scope", &self.inner.scope)
            .field("state", &self.state())
            .finish()
    }
}
