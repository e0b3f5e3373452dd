//! Query planner subsystem for aeroquery
//!
//! Parses filters and decides, per table, whether a filter resolves through
//! a primary key range, a secondary index range or a scan.
//!
//! # Design Principles
//!
//! - Deterministic: same schema and filter, same plan
//! - Forgiving: unsupported operator shapes degrade to a filtered scan
//! - Cheap first: key ranges before index ranges before scans

mod ast;
#[allow(clippy::module_inception)]
mod planner;

pub use ast::{Expression, Filter, JoinSpec, Operator, Query};
pub use planner::{QueryPlanner, ResolutionPlan, Strategy};
