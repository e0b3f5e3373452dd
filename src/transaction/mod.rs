//! Transaction coordination
//!
//! A `Transaction` wraps one native store transaction and exposes:
//! - a four-state machine (active, committed, aborted, error) driven by the
//!   store's single terminal event
//! - ordered, fire-once completion handlers per terminal event
//! - scoped `TableHandle`s that refuse tables outside the whitelist
//!
//! Connections hand the same `Transaction` to every caller that arrives while
//! it is active, so grouped operations share one atomic unit.

mod handlers;
mod state;
mod table;
#[allow(clippy::module_inception)]
mod transaction;

pub use crate::engine::TransactionMode;
pub use handlers::{Handler, Subscription, TransactionHandlers};
pub use state::{TransactionEvent, TransactionEventKind, TransactionState};
pub use table::TableHandle;
pub use transaction::{TableScope, Transaction};
