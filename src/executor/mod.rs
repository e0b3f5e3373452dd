//! Query executor subsystem for aeroquery
//!
//! # Execution Flow (strict order)
//!
//! 1. Obtain a transaction covering the tables the query reads
//! 2. Plan the source filter against the table schema
//! 3. Scan the chosen key range, index range or whole table
//! 4. Apply the predicate filter when the plan asks for it
//! 5. For compound queries, resolve the target table and join
//! 6. Commit an owned transaction and return after its terminal event
//!
//! # Invariants
//!
//! - Rows keep scan order; joins keep left order
//! - `by_key` and `by_index` are never both set
//! - Unsupported operator shapes degrade, they never fail

mod combinator;
#[allow(clippy::module_inception)]
mod executor;
mod filters;
mod result;
mod updater;

pub use combinator::{Combinator, JoinOptions};
pub use executor::{QueryCallback, QueryEngine};
pub use filters::{compare, strict_equals, PredicateFilter};
pub use result::{QueryResult, ResultSet};
pub use updater::{Modifier, Updater};
