//! Query AST structures
//!
//! A filter maps field names to either a literal (implicit equality) or a
//! single-operator expression such as `{"$gt": 1}`. Filters are parsed once
//! from JSON and then read by the planner and the predicate filter.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};

use crate::error::{DbError, DbResult};

/// Comparison operators understood inside a filter expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Nin,
}

impl Operator {
    /// Parses an operator key such as `"$gt"`
    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "$eq" => Some(Operator::Eq),
            "$ne" => Some(Operator::Ne),
            "$lt" => Some(Operator::Lt),
            "$le" => Some(Operator::Le),
            "$gt" => Some(Operator::Gt),
            "$ge" => Some(Operator::Ge),
            "$in" => Some(Operator::In),
            "$nin" => Some(Operator::Nin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "$eq",
            Operator::Ne => "$ne",
            Operator::Lt => "$lt",
            Operator::Le => "$le",
            Operator::Gt => "$gt",
            Operator::Ge => "$ge",
            Operator::In => "$in",
            Operator::Nin => "$nin",
        }
    }

    /// Returns true if the operator maps onto a single key range
    pub fn supports_range(&self) -> bool {
        matches!(
            self,
            Operator::Eq | Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Right-hand side of one filter clause
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Plain value, compared by strict equality
    Literal(Value),
    /// `{"$op": operand}` with a known operator
    Compare(Operator, Value),
    /// `{"$op": operand}` with an operator nobody understands; never matches
    Unknown(String, Value),
}

impl Expression {
    pub fn parse(value: &Value) -> Self {
        if let Value::Object(map) = value {
            if map.len() == 1 {
                if let Some((key, operand)) = map.iter().next() {
                    if key.starts_with('$') {
                        return match Operator::parse(key) {
                            Some(op) => Expression::Compare(op, operand.clone()),
                            None => Expression::Unknown(key.clone(), operand.clone()),
                        };
                    }
                }
            }
        }
        Expression::Literal(value.clone())
    }

    pub fn to_json(&self) -> Value {
        match self {
            Expression::Literal(v) => v.clone(),
            Expression::Compare(op, v) => single_key(op.as_str(), v),
            Expression::Unknown(key, v) => single_key(key, v),
        }
    }
}

fn single_key(key: &str, value: &Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value.clone());
    Value::Object(map)
}

/// Conjunction of field clauses; empty matches every record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: BTreeMap<String, Expression>,
}

impl Filter {
    /// The match-all filter
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON filter. `null` is the match-all filter.
    pub fn from_json(value: &Value) -> DbResult<Self> {
        match value {
            Value::Null => Ok(Self::new()),
            Value::Object(map) => Ok(Self {
                clauses: map
                    .iter()
                    .map(|(field, expr)| (field.clone(), Expression::parse(expr)))
                    .collect(),
            }),
            other => Err(DbError::configuration(format!(
                "filter must be an object, got {}",
                other
            ))),
        }
    }

    /// Adds a clause, replacing any earlier clause on the same field
    pub fn with(mut self, field: impl Into<String>, value: Value) -> Self {
        self.clauses.insert(field.into(), Expression::parse(&value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    /// The only clause, when there is exactly one
    pub fn single(&self) -> Option<(&str, &Expression)> {
        if self.clauses.len() != 1 {
            return None;
        }
        self.clauses.iter().next().map(|(f, e)| (f.as_str(), e))
    }

    pub fn clauses(&self) -> impl Iterator<Item = (&str, &Expression)> {
        self.clauses.iter().map(|(f, e)| (f.as_str(), e))
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.clauses
                .iter()
                .map(|(f, e)| (f.clone(), e.to_json()))
                .collect(),
        )
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

/// Join target and column pair of a compound query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinSpec {
    /// Target table
    pub target: String,
    /// Column read from source rows
    pub source_column: String,
    /// Column read from target rows
    pub target_column: String,
    /// Property receiving the matched target rows
    pub array_agg: String,
}

impl JoinSpec {
    /// Joins on `column` in both tables, aggregating under `<target>s`
    pub fn new(target: impl Into<String>, column: impl Into<String>) -> Self {
        let target = target.into();
        let column = column.into();
        Self {
            array_agg: format!("{}s", target),
            target,
            target_column: column.clone(),
            source_column: column,
        }
    }

    pub fn target_column(mut self, column: impl Into<String>) -> Self {
        self.target_column = column.into();
        self
    }

    pub fn array_agg(mut self, property: impl Into<String>) -> Self {
        self.array_agg = property.into();
        self
    }
}

/// Declarative query over one table, optionally joined with another
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Source table
    pub table: String,
    /// Filter applied to the source (and to the join target)
    pub filter: Filter,
    /// Join target, when the query is compound
    pub join: Option<JoinSpec>,
}

impl Query {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: Filter::new(),
            join: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Joins `target` on `source_column`, matching `target_column` when given
    /// and the same column name otherwise.
    pub fn join(
        mut self,
        target: impl Into<String>,
        source_column: impl Into<String>,
        target_column: Option<&str>,
    ) -> Self {
        let mut spec = JoinSpec::new(target, source_column);
        if let Some(column) = target_column {
            spec = spec.target_column(column);
        }
        self.join = Some(spec);
        self
    }

    pub fn with_join(mut self, spec: JoinSpec) -> Self {
        self.join = Some(spec);
        self
    }

    pub fn is_compound(&self) -> bool {
        self.join.is_some()
    }

    /// Tables the query reads, source first
    pub fn tables(&self) -> Vec<String> {
        let mut tables = vec![self.table.clone()];
        if let Some(join) = &self.join {
            if join.target != self.table {
                tables.push(join.target.clone());
            }
        }
        tables
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expression_shapes() {
        assert_eq!(Expression::parse(&json!(1)), Expression::Literal(json!(1)));
        assert_eq!(
            Expression::parse(&json!({"$gt": 1})),
            Expression::Compare(Operator::Gt, json!(1))
        );
        assert_eq!(
            Expression::parse(&json!({"$regex": "a"})),
            Expression::Unknown("$regex".into(), json!("a"))
        );
        // several operators are not an operator expression
        assert!(matches!(
            Expression::parse(&json!({"$gt": 1, "$lt": 5})),
            Expression::Literal(_)
        ));
        assert!(matches!(
            Expression::parse(&json!({"name": "a"})),
            Expression::Literal(_)
        ));
    }

    #[test]
    fn test_filter_from_json() {
        assert!(Filter::from_json(&Value::Null).unwrap().is_empty());
        let filter = Filter::from_json(&json!({"userId": {"$ge": 2}})).unwrap();
        let (field, expr) = filter.single().unwrap();
        assert_eq!(field, "userId");
        assert_eq!(expr, &Expression::Compare(Operator::Ge, json!(2)));
        assert_eq!(filter.to_string(), r#"{"userId":{"$ge":2}}"#);

        let err = Filter::from_json(&json!([1, 2])).unwrap_err();
        assert_eq!(err.code(), "AERO_CONFIGURATION_ERROR");
    }

    #[test]
    fn test_join_defaults() {
        let query = Query::new("user").join("session", "userId", None);
        let join = query.join.as_ref().unwrap();
        assert_eq!(join.target_column, "userId");
        assert_eq!(join.array_agg, "sessions");
        assert_eq!(query.tables(), vec!["user".to_string(), "session".to_string()]);

        let query = Query::new("user").join("session", "userId", Some("owner"));
        assert_eq!(query.join.unwrap().target_column, "owner");
    }

    #[test]
    fn test_operator_range_support() {
        assert!(Operator::Le.supports_range());
        assert!(!Operator::Ne.supports_range());
        assert!(!Operator::In.supports_range());
        assert_eq!(Operator::parse("$nin"), Some(Operator::Nin));
        assert_eq!(Operator::parse("$inc"), None);
    }
}
