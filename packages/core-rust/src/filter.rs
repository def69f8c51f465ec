//! The small filter grammar consumed by relational and document backends.
//!
//! A filter maps field names to conditions; all conditions combine with
//! logical AND. The serialized form is a JSON object:
//!
//! ```json
//! {"b": ["zu", "rr"], "n": 5, "t": ">=100", "name": "pump"}
//! ```
//!
//! A list means membership, a number means equality, a string starting
//! with one of `==`, `!=`, `>=`, `<=`, `>`, `<` means comparison, and any
//! other string means equality.

use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::Error;
use crate::record::Record;
use crate::value::Value;

/// Comparison operator within a [`Condition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `>=`
    Ge,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `<`
    Lt,
}

impl Comparator {
    /// SQL spelling of the operator.
    #[must_use]
    pub fn as_sql(&self) -> &'static str {
        match self {
            Comparator::Eq => "=",
            Comparator::Ne => "<>",
            Comparator::Ge => ">=",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Lt => "<",
        }
    }
}

/// A single per-field condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Membership: field value must be one of the listed values.
    In(Vec<Value>),
    /// Comparison against a single operand.
    Compare(Comparator, Value),
}

impl Condition {
    /// Equality shorthand.
    #[must_use]
    pub fn eq(value: impl Into<Value>) -> Self {
        Condition::Compare(Comparator::Eq, value.into())
    }

    /// Parses a condition from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRecord`] for JSON shapes the grammar does
    /// not recognize (objects, nested arrays, nulls).
    pub fn from_json(value: &serde_json::Value) -> Result<Self, Error> {
        match value {
            serde_json::Value::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(json_scalar(item)?);
                }
                Ok(Condition::In(values))
            }
            serde_json::Value::Number(_) | serde_json::Value::Bool(_) => {
                Ok(Condition::Compare(Comparator::Eq, json_scalar(value)?))
            }
            serde_json::Value::String(s) => Ok(Self::parse_str(s)),
            other => Err(Error::InvalidRecord(format!(
                "unsupported filter condition: {other}"
            ))),
        }
    }

    /// Parses the string form: an optional comparison prefix followed by
    /// the operand; anything else is an equality match on the whole string.
    #[must_use]
    pub fn parse_str(s: &str) -> Self {
        let prefixes: [(&str, Comparator); 6] = [
            ("==", Comparator::Eq),
            ("!=", Comparator::Ne),
            (">=", Comparator::Ge),
            ("<=", Comparator::Le),
            (">", Comparator::Gt),
            ("<", Comparator::Lt),
        ];

        for (prefix, cmp) in prefixes {
            if let Some(operand) = s.strip_prefix(prefix) {
                return Condition::Compare(cmp, parse_operand(operand));
            }
        }

        Condition::Compare(Comparator::Eq, Value::String(s.to_string()))
    }

    /// Evaluates the condition against a field value.
    #[must_use]
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Condition::In(values) => values.iter().any(|v| loose_eq(value, v)),
            Condition::Compare(cmp, operand) => {
                let Some(ordering) = value.compare(operand) else {
                    // Incomparable kinds: only != holds.
                    return *cmp == Comparator::Ne;
                };
                match cmp {
                    Comparator::Eq => ordering.is_eq(),
                    Comparator::Ne => !ordering.is_eq(),
                    Comparator::Ge => !ordering.is_lt(),
                    Comparator::Le => !ordering.is_gt(),
                    Comparator::Gt => ordering.is_gt(),
                    Comparator::Lt => ordering.is_lt(),
                }
            }
        }
    }
}

/// Comparison operands keep their string form unless they parse cleanly as
/// numbers; numeric comparison then works against int or float fields.
fn parse_operand(s: &str) -> Value {
    if let Ok(i) = s.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(f) = s.parse::<f64>() {
        return Value::Float(f);
    }
    Value::String(s.to_string())
}

fn json_scalar(value: &serde_json::Value) -> Result<Value, Error> {
    match value {
        serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
        serde_json::Value::String(s) => Ok(Value::String(s.clone())),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::Float(f))
            } else {
                Err(Error::InvalidRecord(format!("unrepresentable number: {n}")))
            }
        }
        other => Err(Error::InvalidRecord(format!(
            "unsupported filter value: {other}"
        ))),
    }
}

/// A conjunction of per-field conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: BTreeMap<String, Condition>,
}

impl Filter {
    /// Creates an empty filter (matches everything).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a condition for a field (builder style).
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, condition: Condition) -> Self {
        self.conditions.insert(field.into(), condition);
        self
    }

    /// Parses a filter from its JSON-object form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRecord`] when the value is not an object or
    /// a condition has an unsupported shape.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, Error> {
        let serde_json::Value::Object(map) = value else {
            return Err(Error::InvalidRecord(format!(
                "filter must be a JSON object, got: {value}"
            )));
        };

        let mut filter = Filter::new();
        for (field, condition) in map {
            filter
                .conditions
                .insert(field.clone(), Condition::from_json(condition)?);
        }
        Ok(filter)
    }

    /// Whether the record satisfies every condition. A condition on an
    /// absent field fails.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        self.conditions.iter().all(|(field, condition)| {
            record.get(field).is_some_and(|value| condition.matches(value))
        })
    }

    /// The per-field conditions, in field order.
    pub fn conditions(&self) -> impl Iterator<Item = (&String, &Condition)> {
        self.conditions.iter()
    }

    /// Whether the filter has no conditions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

impl FromStr for Filter {
    type Err = Error;

    /// Parses the serialized (JSON text) form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let json: serde_json::Value = serde_json::from_str(s)
            .map_err(|e| Error::InvalidRecord(format!("filter is not valid JSON: {e}")))?;
        Self::from_json(&json)
    }
}

/// Membership comparison: numeric values match across int/float.
fn loose_eq(a: &Value, b: &Value) -> bool {
    a.compare(b).is_some_and(|o| o.is_eq())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;
    use crate::record::Record;

    #[test]
    fn membership_condition() {
        let filter: Filter = r#"{"b": ["zu", "rr", "zz"]}"#.parse().unwrap();

        assert!(filter.matches(&record! { "b" => "zu" }));
        assert!(filter.matches(&record! { "b" => "rr" }));
        assert!(!filter.matches(&record! { "b" => "hi" }));
        assert!(!filter.matches(&record! { "a" => "zu" }), "absent field fails");
    }

    #[test]
    fn numeric_literal_means_equality() {
        let filter: Filter = r#"{"n": 5}"#.parse().unwrap();
        assert!(filter.matches(&record! { "n" => 5 }));
        assert!(filter.matches(&record! { "n" => 5.0 }));
        assert!(!filter.matches(&record! { "n" => 6 }));
    }

    #[test]
    fn comparison_prefixes() {
        let filter: Filter = r#"{"t": ">=100"}"#.parse().unwrap();
        assert!(filter.matches(&record! { "t" => 100 }));
        assert!(filter.matches(&record! { "t" => 101 }));
        assert!(!filter.matches(&record! { "t" => 99 }));

        let filter: Filter = r#"{"t": "<100"}"#.parse().unwrap();
        assert!(filter.matches(&record! { "t" => 99 }));
        assert!(!filter.matches(&record! { "t" => 100 }));

        let filter: Filter = r#"{"name": "!=pump"}"#.parse().unwrap();
        assert!(filter.matches(&record! { "name" => "fan" }));
        assert!(!filter.matches(&record! { "name" => "pump" }));
    }

    #[test]
    fn plain_string_means_equality() {
        let filter: Filter = r#"{"name": "pump"}"#.parse().unwrap();
        assert!(filter.matches(&record! { "name" => "pump" }));
        assert!(!filter.matches(&record! { "name" => "fan" }));
    }

    #[test]
    fn conditions_combine_with_and() {
        let filter: Filter = r#"{"a": ">1", "b": "x"}"#.parse().unwrap();
        assert!(filter.matches(&record! { "a" => 2, "b" => "x" }));
        assert!(!filter.matches(&record! { "a" => 2, "b" => "y" }));
        assert!(!filter.matches(&record! { "a" => 1, "b" => "x" }));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = Filter::new();
        assert!(filter.matches(&record! { "anything" => 1 }));
        assert!(filter.matches(&Record::new()));
    }

    #[test]
    fn rejects_non_object_json() {
        assert!("[1, 2]".parse::<Filter>().is_err());
        assert!(r#"{"a": {"nested": 1}}"#.parse::<Filter>().is_err());
    }

    #[test]
    fn programmatic_construction() {
        let filter = Filter::new()
            .with("b", Condition::In(vec!["zu".into(), "rr".into()]))
            .with("n", Condition::eq(5));

        assert!(filter.matches(&record! { "b" => "zu", "n" => 5 }));
        assert!(!filter.matches(&record! { "b" => "zu", "n" => 4 }));
    }
}
