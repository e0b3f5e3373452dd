//! Table and index metadata
//!
//! Schemas are defined once, before an engine is built, and are immutable
//! afterwards. The query planner reads them to decide whether a filter field
//! is the primary key path or the column of a declared index.

mod types;

pub use types::{DatabaseSchema, IndexSchema, TableSchema};
