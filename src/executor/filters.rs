//! Predicate filtering for query execution
//!
//! Filters records against every clause of a filter (AND semantics).
//! No type coercion: a number never equals a string, and ordering
//! comparisons only exist between two numbers or two strings.

use std::cmp::Ordering;

use serde_json::Value;

use crate::planner::{Expression, Filter, Operator};

/// Evaluates filters against records
pub struct PredicateFilter;

impl PredicateFilter {
    /// Checks if a record matches all clauses of `filter`
    pub fn check(record: &Value, filter: &Filter) -> bool {
        filter
            .clauses()
            .all(|(field, expression)| Self::matches_clause(record.get(field), expression))
    }

    fn matches_clause(actual: Option<&Value>, expression: &Expression) -> bool {
        match expression {
            Expression::Literal(expected) => Self::eq_match(actual, expected),
            Expression::Compare(op, operand) => Self::compare_match(actual, *op, operand),
            Expression::Unknown(..) => false,
        }
    }

    fn compare_match(actual: Option<&Value>, op: Operator, operand: &Value) -> bool {
        match op {
            Operator::Eq => Self::eq_match(actual, operand),
            Operator::Ne => !Self::eq_match(actual, operand),
            Operator::Lt => Self::ordering(actual, operand).is_some_and(Ordering::is_lt),
            Operator::Le => Self::ordering(actual, operand).is_some_and(Ordering::is_le),
            Operator::Gt => Self::ordering(actual, operand).is_some_and(Ordering::is_gt),
            Operator::Ge => Self::ordering(actual, operand).is_some_and(Ordering::is_ge),
            Operator::In => match operand {
                Value::Array(items) => items.iter().any(|item| Self::eq_match(actual, item)),
                _ => false,
            },
            Operator::Nin => match operand {
                Value::Array(items) => !items.iter().any(|item| Self::eq_match(actual, item)),
                _ => false,
            },
        }
    }

    /// A missing field never equals a literal
    fn eq_match(actual: Option<&Value>, expected: &Value) -> bool {
        actual.is_some_and(|a| strict_equals(a, expected))
    }

    fn ordering(actual: Option<&Value>, bound: &Value) -> Option<Ordering> {
        compare(actual?, bound)
    }
}

/// Equality without coercion. Numbers compare by value, so `1` equals `1.0`.
pub fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare(a, b) == Some(Ordering::Equal),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| strict_equals(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, l)| y.get(k).is_some_and(|r| strict_equals(l, r)))
        }
        _ => a == b,
    }
}

/// Ordering between two numbers or two strings; `None` for any other pair
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(xi), Some(yi)) = (x.as_i64(), y.as_i64()) {
                return Some(xi.cmp(&yi));
            }
            if let (Some(xu), Some(yu)) = (x.as_u64(), y.as_u64()) {
                return Some(xu.cmp(&yu));
            }
            x.as_f64()?.partial_cmp(&y.as_f64()?)
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(record: Value, filter: Value) -> bool {
        PredicateFilter::check(&record, &Filter::from_json(&filter).unwrap())
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(check(json!({"a": 1}), json!({})));
        assert!(check(json!({}), Value::Null));
    }

    #[test]
    fn test_literal_equality_no_coercion() {
        assert!(check(json!({"age": 30}), json!({"age": 30})));
        assert!(check(json!({"age": 30}), json!({"age": 30.0})));
        assert!(!check(json!({"age": 30}), json!({"age": "30"})));
        assert!(!check(json!({"flag": 1}), json!({"flag": true})));
        assert!(!check(json!({}), json!({"age": null})));
        assert!(check(json!({"age": null}), json!({"age": null})));
    }

    #[test]
    fn test_conjunction() {
        let record = json!({"name": "alice", "age": 30});
        assert!(check(record.clone(), json!({"name": "alice", "age": 30})));
        assert!(!check(record, json!({"name": "alice", "age": 31})));
    }

    #[test]
    fn test_ordering_operators() {
        let record = json!({"age": 30, "name": "bob"});
        assert!(check(record.clone(), json!({"age": {"$gt": 29}})));
        assert!(!check(record.clone(), json!({"age": {"$gt": 30}})));
        assert!(check(record.clone(), json!({"age": {"$ge": 30}})));
        assert!(check(record.clone(), json!({"age": {"$lt": 30.5}})));
        assert!(check(record.clone(), json!({"age": {"$le": 30}})));
        assert!(check(record.clone(), json!({"name": {"$gt": "alice"}})));
        // mixed types never order
        assert!(!check(record.clone(), json!({"age": {"$lt": "z"}})));
        assert!(!check(record, json!({"missing": {"$lt": 100}})));
    }

    #[test]
    fn test_not_equal() {
        assert!(check(json!({"age": 30}), json!({"age": {"$ne": 31}})));
        assert!(!check(json!({"age": 30}), json!({"age": {"$ne": 30}})));
        assert!(check(json!({}), json!({"age": {"$ne": 30}})));
    }

    #[test]
    fn test_membership() {
        let record = json!({"role": "admin"});
        assert!(check(record.clone(), json!({"role": {"$in": ["admin", "owner"]}})));
        assert!(!check(record.clone(), json!({"role": {"$nin": ["admin"]}})));
        assert!(check(record.clone(), json!({"role": {"$nin": ["guest"]}})));
        assert!(!check(record, json!({"role": {"$in": "admin"}})));
    }

    #[test]
    fn test_unknown_operator_never_matches() {
        assert!(!check(json!({"name": "a"}), json!({"name": {"$regex": "a"}})));
    }

    #[test]
    fn test_large_integers_compare_exactly() {
        let a = json!(9_007_199_254_740_993u64);
        let b = json!(9_007_199_254_740_992u64);
        assert!(!strict_equals(&a, &b));
        assert_eq!(compare(&a, &b), Some(Ordering::Greater));
    }
}
