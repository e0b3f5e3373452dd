//! Connections, drivers and transaction coordination

#[allow(clippy::module_inception)]
mod connection;
mod driver;

pub(crate) use connection::settle;
pub use connection::{Connection, TransactionRequest};
pub use driver::{Driver, DriverRegistry, MemoryDriver};
