//! The [`Record`] container: an unordered field-name to [`Value`] mapping.
//!
//! Every record carries two reserved fields once it has passed through a
//! [`RecordSet`](crate::record_set::RecordSet) or a model: `id_` (a stable
//! string identifier, usually a UUID) and `t` (milliseconds since the Unix
//! epoch). Backends that support soft deletion additionally use `deleted_`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::time::now_millis;
use crate::value::Value;

/// Reserved field: stable record identifier.
pub const ID_FIELD: &str = "id_";
/// Reserved field: record timestamp, milliseconds since the Unix epoch.
pub const TIMESTAMP_FIELD: &str = "t";
/// Reserved field: soft-deletion marker.
pub const DELETED_FIELD: &str = "deleted_";

/// Returns a fresh UUID v4 string for use as a record identifier.
#[must_use]
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// A single record: field names mapped to scalar [`Value`]s.
///
/// Serializes transparently as a JSON object. `BTreeMap` keeps field order
/// deterministic, which makes diffs and persisted snapshots stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Returns a field's value, or `None` when absent.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Removes a field, returning its previous value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// Whether the field is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// The record identifier (`id_`), when present and a string.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.fields.get(ID_FIELD).and_then(Value::as_str)
    }

    /// The record timestamp (`t`), when present and an integer.
    #[must_use]
    pub fn timestamp(&self) -> Option<i64> {
        self.fields.get(TIMESTAMP_FIELD).and_then(Value::as_int)
    }

    /// Whether the record carries `deleted_ = true`.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.fields
            .get(DELETED_FIELD)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Fills in `id_` (fresh UUID) and `t` (current millisecond timestamp)
    /// when they are absent.
    pub fn ensure_identity(&mut self) {
        if self.id().is_none() {
            self.fields
                .insert(ID_FIELD.to_string(), Value::String(generate_id()));
        }
        if self.timestamp().is_none() {
            self.fields
                .insert(TIMESTAMP_FIELD.to_string(), Value::Int(now_millis()));
        }
    }

    /// Shallow-merges `other` into `self`, overwriting existing fields.
    pub fn merge(&mut self, other: &Record) {
        for (name, value) in &other.fields {
            self.fields.insert(name.clone(), value.clone());
        }
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Number of fields other than `id_` and `t`.
    ///
    /// Report-by-exception drops records whose payload is empty by this
    /// definition.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.fields
            .keys()
            .filter(|k| *k != ID_FIELD && *k != TIMESTAMP_FIELD)
            .count()
    }

    /// Iterates over `(field, value)` pairs in field-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// Iterates over field names.
    pub fn field_names(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut record = Record::new();
        for (name, value) in iter {
            record.set(name, value);
        }
        record
    }
}

impl<'a> IntoIterator for &'a Record {
    type Item = (&'a String, &'a Value);
    type IntoIter = std::collections::btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

/// Builds a [`Record`] from field literals.
///
/// ```
/// use datalink_core::record;
///
/// let r = record! { "t" => 2, "name" => "pump", "running" => true };
/// assert_eq!(r.timestamp(), Some(2));
/// ```
#[macro_export]
macro_rules! record {
    () => { $crate::record::Record::new() };
    ( $( $name:expr => $value:expr ),+ $(,)? ) => {{
        let mut r = $crate::record::Record::new();
        $( r.set($name, $value); )+
        r
    }};
}
