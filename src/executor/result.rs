//! Result types for query execution

use serde::Serialize;
use serde_json::Value;

use crate::planner::ResolutionPlan;

/// Read access shared by query results
pub trait ResultSet {
    /// Rows in scan order
    fn rows(&self) -> &[Value];

    fn len(&self) -> usize {
        self.rows().len()
    }

    fn is_empty(&self) -> bool {
        self.rows().is_empty()
    }

    fn first(&self) -> Option<&Value> {
        self.rows().first()
    }

    /// First row accepted by `predicate`
    fn find(&self, predicate: &dyn Fn(&Value) -> bool) -> Option<&Value> {
        self.rows().iter().find(|row| predicate(row))
    }
}

/// Rows of a resolved query with their provenance
///
/// `by_key` and `by_index` are never both true; both are false when the
/// rows came from a scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub rows: Vec<Value>,
    pub by_key: bool,
    pub by_index: bool,
}

impl QueryResult {
    /// Wraps rows resolved with `plan`
    pub fn resolved(rows: Vec<Value>, plan: &ResolutionPlan) -> Self {
        Self {
            rows,
            by_key: plan.by_key(),
            by_index: plan.by_index(),
        }
    }

    pub fn into_rows(self) -> Vec<Value> {
        self.rows
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.rows.iter()
    }
}

impl ResultSet for QueryResult {
    fn rows(&self) -> &[Value] {
        &self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::KeyRange;
    use crate::planner::Strategy;
    use serde_json::json;

    #[test]
    fn test_empty_result() {
        let result = QueryResult::default();
        assert!(result.is_empty());
        assert_eq!(result.len(), 0);
        assert!(result.first().is_none());
    }

    #[test]
    fn test_provenance_follows_plan() {
        let plan = ResolutionPlan {
            table: "user".into(),
            strategy: Strategy::KeyRange(KeyRange::unbounded()),
        };
        let result = QueryResult::resolved(vec![json!({"userId": 1})], &plan);
        assert!(result.by_key);
        assert!(!result.by_index);
    }

    #[test]
    fn test_find() {
        let result = QueryResult {
            rows: vec![json!({"id": 1}), json!({"id": 2})],
            ..Default::default()
        };
        let found = result.find(&|row| row["id"] == json!(2));
        assert_eq!(found, Some(&json!({"id": 2})));
    }
}
