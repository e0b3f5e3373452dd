//! Observability for aeroquery
//!
//! Structured, deterministic log events. Every event has a stable name and a
//! set of string fields rendered in alphabetical key order, and is emitted
//! through `tracing` under the `aeroquery` target so the host application
//! decides where it goes.
//!
//! # Usage
//!
//! ```ignore
//! use aeroquery::observability::Logger;
//!
//! Logger::info("TRANSACTION_BEGIN", &[("mode", "readwrite"), ("tables", "user")]);
//! ```

mod logger;

pub use logger::{render_fields, Logger, Severity};
