//! Ordered keys and key ranges
//!
//! Keys are derived from JSON values. Ordering is deterministic:
//! Number < String < Array, arrays compared element by element.
//! Booleans, nulls and objects are not valid keys.

use std::cmp::Ordering;
use std::ops::Bound;

use serde_json::Value;

use super::errors::{EngineError, EngineResult};

/// A valid store key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyValue {
    /// Number stored as order-preserving bits
    Number(u64),
    /// String value
    String(String),
    /// Compound key
    Array(Vec<KeyValue>),
}

impl KeyValue {
    /// Create a key from a number.
    ///
    /// Returns None for NaN. Negative zero collapses onto zero.
    pub fn from_number(v: f64) -> Option<Self> {
        if v.is_nan() {
            return None;
        }
        let v = if v == 0.0 { 0.0 } else { v };
        let bits = v.to_bits();
        let ordered = if (bits >> 63) == 1 {
            !bits
        } else {
            bits ^ (1 << 63)
        };
        Some(KeyValue::Number(ordered))
    }

    /// Create a key from a string
    pub fn from_string(v: impl Into<String>) -> Self {
        KeyValue::String(v.into())
    }

    /// Create a key from a JSON value
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64().and_then(Self::from_number),
            Value::String(s) => Some(KeyValue::from_string(s.as_str())),
            Value::Array(items) => items
                .iter()
                .map(Self::from_json)
                .collect::<Option<Vec<_>>>()
                .map(KeyValue::Array),
            _ => None,
        }
    }

    /// Like `from_json`, failing with a data error for invalid keys
    pub fn try_from_json(value: &Value) -> EngineResult<Self> {
        Self::from_json(value)
            .ok_or_else(|| EngineError::Data(format!("{} is not a valid key", value)))
    }

    /// Returns the numeric value for number keys
    pub fn as_number(&self) -> Option<f64> {
        match self {
            KeyValue::Number(ordered) => {
                let bits = if (ordered >> 63) == 1 {
                    ordered ^ (1 << 63)
                } else {
                    !ordered
                };
                Some(f64::from_bits(bits))
            }
            _ => None,
        }
    }
}

/// A bounded or half-bounded interval over key order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    lower: Bound<KeyValue>,
    upper: Bound<KeyValue>,
}

impl KeyRange {
    /// The range covering every key
    pub fn unbounded() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    /// The range holding exactly `key`
    pub fn only(key: KeyValue) -> Self {
        Self {
            lower: Bound::Included(key.clone()),
            upper: Bound::Included(key),
        }
    }

    /// Keys above `key` (excluding it when `open`)
    pub fn lower_bound(key: KeyValue, open: bool) -> Self {
        Self {
            lower: if open {
                Bound::Excluded(key)
            } else {
                Bound::Included(key)
            },
            upper: Bound::Unbounded,
        }
    }

    /// Keys below `key` (excluding it when `open`)
    pub fn upper_bound(key: KeyValue, open: bool) -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: if open {
                Bound::Excluded(key)
            } else {
                Bound::Included(key)
            },
        }
    }

    /// A two-sided range. Fails when `lower > upper`, or when both ends are
    /// equal and either end is open.
    pub fn bound(
        lower: KeyValue,
        upper: KeyValue,
        lower_open: bool,
        upper_open: bool,
    ) -> EngineResult<Self> {
        match lower.cmp(&upper) {
            Ordering::Greater => {
                return Err(EngineError::Data("lower bound above upper bound".into()))
            }
            Ordering::Equal if lower_open || upper_open => {
                return Err(EngineError::Data("empty range".into()))
            }
            _ => {}
        }
        let lower = if lower_open {
            Bound::Excluded(lower)
        } else {
            Bound::Included(lower)
        };
        let upper = if upper_open {
            Bound::Excluded(upper)
        } else {
            Bound::Included(upper)
        };
        Ok(Self { lower, upper })
    }

    /// Returns true if the range has no bounds
    pub fn is_unbounded(&self) -> bool {
        matches!(
            (&self.lower, &self.upper),
            (Bound::Unbounded, Bound::Unbounded)
        )
    }

    /// Returns true if `key` lies inside the range
    pub fn contains(&self, key: &KeyValue) -> bool {
        let above = match &self.lower {
            Bound::Included(l) => key >= l,
            Bound::Excluded(l) => key > l,
            Bound::Unbounded => true,
        };
        let below = match &self.upper {
            Bound::Included(u) => key <= u,
            Bound::Excluded(u) => key < u,
            Bound::Unbounded => true,
        };
        above && below
    }

    /// Returns false for ranges no key can satisfy.
    ///
    /// Ranges built with `bound` are always satisfiable.
    pub fn is_satisfiable(&self) -> bool {
        let (lower, lower_open) = match &self.lower {
            Bound::Included(k) => (k, false),
            Bound::Excluded(k) => (k, true),
            Bound::Unbounded => return true,
        };
        let (upper, upper_open) = match &self.upper {
            Bound::Included(k) => (k, false),
            Bound::Excluded(k) => (k, true),
            Bound::Unbounded => return true,
        };
        match lower.cmp(upper) {
            Ordering::Less => true,
            Ordering::Equal => !lower_open && !upper_open,
            Ordering::Greater => false,
        }
    }

    /// Borrowed bounds, suitable for `BTreeMap::range`
    pub fn as_bounds(&self) -> (Bound<&KeyValue>, Bound<&KeyValue>) {
        (self.lower.as_ref(), self.upper.as_ref())
    }
}
