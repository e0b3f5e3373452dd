//! Completion handler lists
//!
//! Handlers are append-only and fire at most once, in registration order.
//! When a transaction reaches its terminal state the registry is sealed:
//! the handlers of the event that fired are handed out, the other two lists
//! are dropped, and later registrations are ignored.

use std::sync::{Arc, Mutex, Weak};

use tokio::sync::oneshot;

use crate::error::DbResult;
use crate::lock_unpoisoned;

use super::state::{TransactionEvent, TransactionEventKind};

/// A registered completion handler
pub type Handler = Box<dyn FnOnce(&TransactionEvent) + Send>;

#[derive(Default)]
pub(crate) struct HandlerRegistry {
    next_id: u64,
    error: Vec<(u64, Handler)>,
    abort: Vec<(u64, Handler)>,
    complete: Vec<(u64, Handler)>,
    sealed: bool,
}

impl HandlerRegistry {
    fn list(&mut self, kind: TransactionEventKind) -> &mut Vec<(u64, Handler)> {
        match kind {
            TransactionEventKind::Error => &mut self.error,
            TransactionEventKind::Abort => &mut self.abort,
            TransactionEventKind::Complete => &mut self.complete,
        }
    }

    /// Appends a handler. Returns None once the registry is sealed.
    pub(crate) fn register(&mut self, kind: TransactionEventKind, handler: Handler) -> Option<u64> {
        if self.sealed {
            return None;
        }
        self.next_id += 1;
        let id = self.next_id;
        self.list(kind).push((id, handler));
        Some(id)
    }

    /// Removes a handler that has not fired yet
    pub(crate) fn cancel(&mut self, id: u64) -> bool {
        for list in [&mut self.error, &mut self.abort, &mut self.complete] {
            if let Some(pos) = list.iter().position(|(h, _)| *h == id) {
                drop(list.remove(pos));
                return true;
            }
        }
        false
    }

    /// Seals the registry and returns the handlers for `kind` in order
    pub(crate) fn take(&mut self, kind: TransactionEventKind) -> Vec<Handler> {
        self.sealed = true;
        let fired = std::mem::take(self.list(kind));
        self.error.clear();
        self.abort.clear();
        self.complete.clear();
        fired.into_iter().map(|(_, h)| h).collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.error.len() + self.abort.len() + self.complete.len()
    }
}

/// Cancellation handle for a registered handler
#[must_use = "dropping a Subscription keeps the handler registered"]
pub struct Subscription {
    id: Option<u64>,
    registry: Weak<Mutex<HandlerRegistry>>,
}

impl Subscription {
    pub(crate) fn new(id: Option<u64>, registry: &Arc<Mutex<HandlerRegistry>>) -> Self {
        Self {
            id,
            registry: Arc::downgrade(registry),
        }
    }

    /// Returns false if the handler was never registered (the transaction
    /// had already finished)
    pub fn is_registered(&self) -> bool {
        self.id.is_some()
    }

    /// Removes the handler. Returns true if it had not fired yet.
    pub fn cancel(self) -> bool {
        match (self.id, self.registry.upgrade()) {
            (Some(id), Some(registry)) => lock_unpoisoned(&registry).cancel(id),
            _ => false,
        }
    }
}

/// Handlers supplied together with a transaction request
#[derive(Default)]
pub struct TransactionHandlers {
    entries: Vec<(TransactionEventKind, Handler)>,
}

impl TransactionHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(
        mut self,
        kind: TransactionEventKind,
        handler: impl FnOnce(&TransactionEvent) + Send + 'static,
    ) -> Self {
        self.entries.push((kind, Box::new(handler)));
        self
    }

    pub fn on_error(self, handler: impl FnOnce(&TransactionEvent) + Send + 'static) -> Self {
        self.on(TransactionEventKind::Error, handler)
    }

    pub fn on_abort(self, handler: impl FnOnce(&TransactionEvent) + Send + 'static) -> Self {
        self.on(TransactionEventKind::Abort, handler)
    }

    pub fn on_complete(self, handler: impl FnOnce(&TransactionEvent) + Send + 'static) -> Self {
        self.on(TransactionEventKind::Complete, handler)
    }

    /// Handlers that forward whichever terminal event fires into `sender`
    pub fn notify(sender: oneshot::Sender<DbResult<()>>) -> Self {
        let slot = Arc::new(Mutex::new(Some(sender)));
        Self::new()
            .on_error(forward_to(Arc::clone(&slot)))
            .on_abort(forward_to(Arc::clone(&slot)))
            .on_complete(forward_to(slot))
    }

    /// Appends `other` after the handlers already collected
    pub fn extend(mut self, other: TransactionHandlers) -> Self {
        self.entries.extend(other.entries);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn into_entries(self) -> Vec<(TransactionEventKind, Handler)> {
        self.entries
    }
}

type OutcomeSlot = Arc<Mutex<Option<oneshot::Sender<DbResult<()>>>>>;

fn forward_to(slot: OutcomeSlot) -> impl FnOnce(&TransactionEvent) + Send + 'static {
    move |event: &TransactionEvent| {
        if let Some(sender) = lock_unpoisoned(&slot).take() {
            let _ = sender.send(event.outcome());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording(log: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> Handler {
        let log = Arc::clone(log);
        Box::new(move |_: &TransactionEvent| log.lock().unwrap().push(tag))
    }

    #[test]
    fn test_take_returns_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::default();
        registry.register(TransactionEventKind::Complete, recording(&log, "first"));
        registry.register(TransactionEventKind::Error, recording(&log, "error"));
        registry.register(TransactionEventKind::Complete, recording(&log, "second"));

        for handler in registry.take(TransactionEventKind::Complete) {
            handler(&TransactionEvent::Complete);
        }
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_sealed_registry_rejects_handlers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::default();
        let _ = registry.take(TransactionEventKind::Abort);
        assert!(registry
            .register(TransactionEventKind::Abort, recording(&log, "late"))
            .is_none());
        assert!(registry.take(TransactionEventKind::Abort).is_empty());
    }

    #[test]
    fn test_cancel_removes_pending_handler() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(Mutex::new(HandlerRegistry::default()));
        let id = registry
            .lock()
            .unwrap()
            .register(TransactionEventKind::Complete, recording(&log, "cancelled"));
        let subscription = Subscription::new(id, &registry);
        assert!(subscription.is_registered());
        assert!(subscription.cancel());

        let fired = registry.lock().unwrap().take(TransactionEventKind::Complete);
        assert!(fired.is_empty());
    }

    #[tokio::test]
    async fn test_notify_forwards_single_outcome() {
        let (sender, receiver) = oneshot::channel();
        let mut registry = HandlerRegistry::default();
        for (kind, handler) in TransactionHandlers::notify(sender).into_entries() {
            registry.register(kind, handler);
        }
        for handler in registry.take(TransactionEventKind::Abort) {
            handler(&TransactionEvent::Abort);
        }
        let outcome = receiver.await.unwrap();
        assert_eq!(outcome.unwrap_err().code(), "AERO_TRANSACTION_ABORTED");
    }
}
