//! Left outer join with nested aggregation

use serde_json::Value;

use super::filters::strict_equals;

/// Join options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOptions {
    /// Property receiving the matched right rows
    pub array_agg: String,
}

impl JoinOptions {
    pub fn new(array_agg: impl Into<String>) -> Self {
        Self {
            array_agg: array_agg.into(),
        }
    }
}

pub struct Combinator;

impl Combinator {
    /// Attaches to every left row the right rows whose `right_column`
    /// strictly equals the left row's `left_column`.
    ///
    /// Left rows keep their order and appear once each, with an empty array
    /// when nothing matched. Matched rows keep right order. Rows missing the
    /// column on both sides match each other. Non-object left rows pass
    /// through unchanged.
    pub fn join(
        left: Vec<Value>,
        right: &[Value],
        left_column: &str,
        right_column: &str,
        options: &JoinOptions,
    ) -> Vec<Value> {
        left.into_iter()
            .map(|mut row| {
                let matches: Vec<Value> = right
                    .iter()
                    .filter(|candidate| {
                        column_equals(row.get(left_column), candidate.get(right_column))
                    })
                    .cloned()
                    .collect();
                if let Value::Object(map) = &mut row {
                    map.insert(options.array_agg.clone(), Value::Array(matches));
                }
                row
            })
            .collect()
    }
}

fn column_equals(left: Option<&Value>, right: Option<&Value>) -> bool {
    match (left, right) {
        (Some(l), Some(r)) => strict_equals(l, r),
        (None, None) => true,
        _ => false,
    }
}
