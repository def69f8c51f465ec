//! Scalar value type for record fields.
//!
//! [`Value`] is the runtime representation of a single record field:
//! null, boolean, integer, float, or string. [`ValueType`] is the declared
//! type carried by model field definitions, and [`Value::coerce_to`]
//! implements the loose coercion rules used during record validation.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single record field value.
///
/// Serializes untagged, so records round-trip as plain JSON objects
/// (`{"a": 1, "b": "x"}`) rather than enum-wrapped maps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absent / null. Treated as "missing" by model validation.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    String(String),
}

/// Declared type of a model field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// UTF-8 string.
    String,
    /// 64-bit signed integer.
    Integer,
    /// 64-bit float.
    Float,
    /// Boolean.
    Boolean,
}

impl Value {
    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the value as an `i64` when it is an integer.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the value as an `f64` when it is numeric (int or float).
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => {
                // Field values are well within f64's exact integer range.
                #[allow(clippy::cast_precision_loss)]
                let wide = *i as f64;
                Some(wide)
            }
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the value as a `&str` when it is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as a `bool` when it is a boolean.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Coerces the value to the declared type, returning `None` when the
    /// conversion is lossy or nonsensical.
    ///
    /// The rules mirror permissive schema validation: numeric strings parse,
    /// integral floats narrow to integers, booleans widen to 0/1. `Null`
    /// never coerces -- a null field counts as absent.
    #[must_use]
    pub fn coerce_to(&self, ty: ValueType) -> Option<Value> {
        match (ty, self) {
            (_, Value::Null) => None,

            (ValueType::String, Value::String(_)) => Some(self.clone()),
            (ValueType::String, Value::Int(i)) => Some(Value::String(i.to_string())),
            (ValueType::String, Value::Float(f)) => Some(Value::String(f.to_string())),
            (ValueType::String, Value::Bool(b)) => Some(Value::String(b.to_string())),

            (ValueType::Integer, Value::Int(_)) => Some(self.clone()),
            (ValueType::Integer, Value::Float(f)) => {
                if f.fract() == 0.0 && f.is_finite() {
                    // Integral float within i64 range narrows losslessly.
                    #[allow(clippy::cast_possible_truncation)]
                    let narrowed = *f as i64;
                    Some(Value::Int(narrowed))
                } else {
                    None
                }
            }
            (ValueType::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::Int),
            (ValueType::Integer, Value::Bool(b)) => Some(Value::Int(i64::from(*b))),

            (ValueType::Float, Value::Float(_)) => Some(self.clone()),
            (ValueType::Float, Value::Int(i)) => {
                #[allow(clippy::cast_precision_loss)]
                let wide = *i as f64;
                Some(Value::Float(wide))
            }
            (ValueType::Float, Value::String(s)) => s.trim().parse::<f64>().ok().map(Value::Float),
            (ValueType::Float, Value::Bool(_)) => None,

            (ValueType::Boolean, Value::Bool(_)) => Some(self.clone()),
            (ValueType::Boolean, Value::Int(0)) => Some(Value::Bool(false)),
            (ValueType::Boolean, Value::Int(1)) => Some(Value::Bool(true)),
            (ValueType::Boolean, Value::Int(_)) => None,
            (ValueType::Boolean, Value::String(s)) => match s.as_str() {
                "true" | "1" => Some(Value::Bool(true)),
                "false" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
            (ValueType::Boolean, Value::Float(_)) => None,
        }
    }

    /// Partial ordering used by filter evaluation.
    ///
    /// Integers and floats compare numerically against each other; strings
    /// compare lexicographically; booleans compare only for equality.
    /// Values of incompatible kinds do not compare.
    #[must_use]
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => {
                if a == b {
                    Some(Ordering::Equal)
                } else {
                    None
                }
            }
            _ => {
                let a = self.as_f64()?;
                let b = other.as_f64()?;
                a.partial_cmp(&b)
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}
