//! Query planner
//!
//! Chooses how a filter is resolved against one table.
//!
//! Strategy selection (strict order):
//! 1. No clauses: full scan in native order
//! 2. One clause on the primary key path: key range
//! 3. One clause on an indexed column: index range
//! 4. Anything else: full scan with the predicate filter
//!
//! Steps 2 and 3 only apply when the clause is a literal or a single
//! `$eq`/`$lt`/`$le`/`$gt`/`$ge` expression with a valid key as operand.
//! Other shapes fall back to step 4 without an error.

use std::fmt;

use crate::engine::{KeyRange, KeyValue, ScanTarget};
use crate::observability::Logger;
use crate::schema::TableSchema;

use super::ast::{Expression, Filter, Operator};

/// How a filter is resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// Every record, native order, no predicate
    FullScan,
    /// Primary key range
    KeyRange(KeyRange),
    /// Secondary index range
    IndexRange { index: String, range: KeyRange },
    /// Every record, kept when the predicate filter accepts it
    FilteredScan,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::FullScan => "FULL_SCAN",
            Strategy::KeyRange(_) => "KEY_RANGE",
            Strategy::IndexRange { .. } => "INDEX_RANGE",
            Strategy::FilteredScan => "FILTERED_SCAN",
        }
    }
}

/// Immutable resolution plan for one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionPlan {
    pub table: String,
    pub strategy: Strategy,
}

impl ResolutionPlan {
    /// True iff the plan walks a primary key range
    pub fn by_key(&self) -> bool {
        matches!(self.strategy, Strategy::KeyRange(_))
    }

    /// True iff the plan walks a secondary index range
    pub fn by_index(&self) -> bool {
        matches!(self.strategy, Strategy::IndexRange { .. })
    }

    /// True iff rows must pass the predicate filter
    pub fn filters_rows(&self) -> bool {
        self.strategy == Strategy::FilteredScan
    }

    /// Scan target and range the plan opens
    pub fn scan(&self) -> (ScanTarget, KeyRange) {
        match &self.strategy {
            Strategy::KeyRange(range) => (ScanTarget::PrimaryKey, range.clone()),
            Strategy::IndexRange { index, range } => {
                (ScanTarget::Index(index.clone()), range.clone())
            }
            Strategy::FullScan | Strategy::FilteredScan => {
                (ScanTarget::PrimaryKey, KeyRange::unbounded())
            }
        }
    }

    /// Short form for logs, e.g. `INDEX_RANGE(email)`
    pub fn describe(&self) -> String {
        match &self.strategy {
            Strategy::IndexRange { index, .. } => format!("INDEX_RANGE({})", index),
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for ResolutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.describe(), self.table)
    }
}

/// Plans filters against one table's schema
pub struct QueryPlanner<'a> {
    table: &'a TableSchema,
}

impl<'a> QueryPlanner<'a> {
    pub fn new(table: &'a TableSchema) -> Self {
        Self { table }
    }

    /// Plans `filter`. Deterministic: same schema and filter, same plan.
    pub fn plan(&self, filter: &Filter) -> ResolutionPlan {
        ResolutionPlan {
            table: self.table.name.clone(),
            strategy: self.select_strategy(filter),
        }
    }

    fn select_strategy(&self, filter: &Filter) -> Strategy {
        if filter.is_empty() {
            return Strategy::FullScan;
        }
        let Some((field, expression)) = filter.single() else {
            return Strategy::FilteredScan;
        };

        if self.table.is_key_path(field) {
            return match range_for(expression) {
                Some(range) => Strategy::KeyRange(range),
                None => self.fall_back(field, expression),
            };
        }
        if let Some(index) = self.table.index_for_field(field) {
            return match range_for(expression) {
                Some(range) => Strategy::IndexRange {
                    index: index.name.clone(),
                    range,
                },
                None => self.fall_back(field, expression),
            };
        }
        Strategy::FilteredScan
    }

    fn fall_back(&self, field: &str, expression: &Expression) -> Strategy {
        Logger::trace(
            "RANGE_FALLBACK",
            &[
                ("expression", &expression.to_json().to_string()),
                ("field", field),
                ("table", &self.table.name),
            ],
        );
        Strategy::FilteredScan
    }
}

/// Key range for a rangeable expression.
///
/// Ranges follow key order, which also orders values of different types
/// (numbers before strings before arrays). A string bound on a numeric
/// column therefore selects rows by key order, while the predicate filter
/// never orders mixed types: `{"age": {"$lt": "z"}}` returns every numeric
/// age through an index or key range but nothing from a filtered scan.
fn range_for(expression: &Expression) -> Option<KeyRange> {
    let (op, operand) = match expression {
        Expression::Literal(v) => (Operator::Eq, v),
        Expression::Compare(op, v) if op.supports_range() => (*op, v),
        _ => return None,
    };
    let key = KeyValue::from_json(operand)?;
    Some(match op {
        Operator::Eq => KeyRange::only(key),
        Operator::Lt => KeyRange::upper_bound(key, true),
        Operator::Le => KeyRange::upper_bound(key, false),
        Operator::Gt => KeyRange::lower_bound(key, true),
        Operator::Ge => KeyRange::lower_bound(key, false),
        Operator::Ne | Operator::In | Operator::Nin => return None,
    })
}
