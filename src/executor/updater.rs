//! In-place field updates
//!
//! An update maps field names to either a plain value (replace) or a single
//! modifier expression such as `{"$inc": 1}`. Records are mutated in place
//! and in order; a failure leaves earlier mutations applied.

use serde_json::{Number, Value};

use crate::error::{DbError, DbResult};
use crate::observability::Logger;

/// Update modifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    Set,
    Inc,
    Dec,
    Mul,
}

impl Modifier {
    pub fn parse(key: &str) -> DbResult<Self> {
        match key {
            "$set" => Ok(Modifier::Set),
            "$inc" => Ok(Modifier::Inc),
            "$dec" => Ok(Modifier::Dec),
            "$mul" => Ok(Modifier::Mul),
            other => Err(DbError::InvalidModifier {
                modifier: other.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Modifier::Set => "$set",
            Modifier::Inc => "$inc",
            Modifier::Dec => "$dec",
            Modifier::Mul => "$mul",
        }
    }
}

pub struct Updater;

impl Updater {
    /// Applies `update` to every record.
    ///
    /// Stops at the first invalid modifier or type mismatch. Records and
    /// fields handled before the failure keep their new values.
    pub fn apply(records: &mut [Value], update: &Value) -> DbResult<()> {
        let Value::Object(fields) = update else {
            return Err(DbError::configuration(format!(
                "update must be an object, got {}",
                update
            )));
        };

        for record in records.iter_mut() {
            for (field, expression) in fields {
                let outcome = Self::split(expression).and_then(|(modifier, operand)| {
                    Self::apply_field(record, field, modifier, operand)
                });
                if let Err(e) = outcome {
                    Logger::warn(
                        "UPDATE_FAILED",
                        &[("error", &e.to_string()), ("field", field)],
                    );
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Splits an expression into modifier and operand; plain values are `$set`
    fn split(expression: &Value) -> DbResult<(Modifier, &Value)> {
        if let Value::Object(map) = expression {
            if map.len() == 1 {
                if let Some((key, operand)) = map.iter().next() {
                    if key.starts_with('$') {
                        return Modifier::parse(key).map(|m| (m, operand));
                    }
                }
            }
        }
        Ok((Modifier::Set, expression))
    }

    fn apply_field(
        record: &mut Value,
        field: &str,
        modifier: Modifier,
        operand: &Value,
    ) -> DbResult<()> {
        let Value::Object(map) = record else {
            return Err(mismatch(field, "cannot be set on a non-object record"));
        };

        let next = match modifier {
            Modifier::Set => operand.clone(),
            arithmetic => {
                let current = match map.get(field) {
                    None | Some(Value::Null) => Number::from(0),
                    Some(Value::Number(n)) => n.clone(),
                    Some(other) => {
                        return Err(mismatch(
                            field,
                            &format!("holds {} and cannot take {}", other, arithmetic.as_str()),
                        ))
                    }
                };
                let Value::Number(operand) = operand else {
                    return Err(mismatch(
                        field,
                        &format!("cannot take non-numeric operand {}", operand),
                    ));
                };
                Value::Number(arithmetic_result(field, arithmetic, &current, operand)?)
            }
        };
        map.insert(field.to_string(), next);
        Ok(())
    }
}

fn arithmetic_result(
    field: &str,
    modifier: Modifier,
    current: &Number,
    operand: &Number,
) -> DbResult<Number> {
    if let (Some(a), Some(b)) = (current.as_i64(), operand.as_i64()) {
        let exact = match modifier {
            Modifier::Inc => a.checked_add(b),
            Modifier::Dec => a.checked_sub(b),
            Modifier::Mul => a.checked_mul(b),
            Modifier::Set => None,
        };
        if let Some(value) = exact {
            return Ok(Number::from(value));
        }
    }

    let (Some(a), Some(b)) = (current.as_f64(), operand.as_f64()) else {
        return Err(mismatch(field, "is not representable as a number"));
    };
    let value = match modifier {
        Modifier::Inc => a + b,
        Modifier::Dec => a - b,
        Modifier::Mul => a * b,
        Modifier::Set => b,
    };
    Number::from_f64(value).ok_or_else(|| {
        let reason = format!("would become {} after {}", value, modifier.as_str());
        mismatch(field, &reason)
    })
}

fn mismatch(field: &str, reason: &str) -> DbError {
    DbError::TypeMismatch {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
