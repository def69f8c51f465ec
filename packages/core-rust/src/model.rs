//! Declarative record schemas.
//!
//! A [`Model`] binds field names to declared [`ValueType`]s, optionality,
//! and defaults. Validation produces a canonicalized copy of the input
//! record: declared fields coerced to their types, unknown fields dropped,
//! and the reserved `id_`/`t` identity filled in when absent.
//!
//! [`Model::table_spec`] derives the relational representation used by
//! SQL-backed drivers: `id_` becomes the primary key, `t` gets an index,
//! and `deleted_` is added for soft deletion.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::record::{Record, DELETED_FIELD, ID_FIELD, TIMESTAMP_FIELD};
use crate::value::{Value, ValueType};

/// A single field declaration within a [`Model`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// Declared value type.
    pub ty: ValueType,
    /// Whether the field must be present (after defaulting).
    pub required: bool,
    /// Default used when the field is absent.
    pub default: Option<Value>,
}

impl FieldDef {
    /// Declares a required field.
    #[must_use]
    pub fn required(name: impl Into<String>, ty: ValueType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: true,
            default: None,
        }
    }

    /// Declares an optional field.
    #[must_use]
    pub fn optional(name: impl Into<String>, ty: ValueType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: false,
            default: None,
        }
    }

    /// Attaches a default value, used when the field is absent on input.
    #[must_use]
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// A declarative schema for records under one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    name: String,
    fields: Vec<FieldDef>,
}

impl Model {
    /// Creates an empty model with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Adds a field declaration (builder style).
    #[must_use]
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// The model's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared fields.
    #[must_use]
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Validates a full record against the model.
    ///
    /// Returns the canonicalized record: declared fields coerced to their
    /// declared types (defaults applied when absent), unknown fields
    /// dropped, `deleted_` passed through, and `id_`/`t` filled in when
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidModel`] when a required field is missing or
    /// a present field cannot be coerced to its declared type.
    pub fn validate_record(&self, record: &Record) -> Result<Record, Error> {
        let mut out = self.validate_fields(record, true)?;
        out.ensure_identity();
        Ok(out)
    }

    /// Validates a partial record: every declared field is treated as
    /// optional, defaults are not applied, and the `id_`/`t` identity is
    /// not filled in.
    ///
    /// Used for partial updates and report-by-exception diffs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidModel`] when a present field cannot be
    /// coerced to its declared type.
    pub fn validate_subrecord(&self, record: &Record) -> Result<Record, Error> {
        self.validate_fields(record, false)
    }

    /// Derives a model identical to this one with every field optional.
    #[must_use]
    pub fn as_all_optional(&self) -> Model {
        let mut relaxed = self.clone();
        for field in &mut relaxed.fields {
            field.required = false;
        }
        relaxed
    }

    fn validate_fields(&self, record: &Record, full: bool) -> Result<Record, Error> {
        let mut out = Record::new();

        for reserved in [ID_FIELD, TIMESTAMP_FIELD, DELETED_FIELD] {
            if let Some(value) = record.get(reserved) {
                out.set(reserved, self.coerce_reserved(reserved, value)?);
            }
        }

        for field in &self.fields {
            match record.get(&field.name) {
                Some(value) if !value.is_null() => {
                    let coerced = value.coerce_to(field.ty).ok_or_else(|| {
                        Error::InvalidModel(format!(
                            "{}: field '{}' has value '{value}', expected {:?}",
                            self.name, field.name, field.ty
                        ))
                    })?;
                    out.set(field.name.clone(), coerced);
                }
                _ if !full => {}
                _ => {
                    if let Some(default) = &field.default {
                        out.set(field.name.clone(), default.clone());
                    } else if field.required {
                        return Err(Error::InvalidModel(format!(
                            "{}: required field '{}' is missing",
                            self.name, field.name
                        )));
                    }
                }
            }
        }

        Ok(out)
    }

    fn coerce_reserved(&self, name: &str, value: &Value) -> Result<Value, Error> {
        let ty = match name {
            ID_FIELD => ValueType::String,
            TIMESTAMP_FIELD => ValueType::Integer,
            _ => ValueType::Boolean,
        };
        value.coerce_to(ty).ok_or_else(|| {
            Error::InvalidModel(format!(
                "{}: reserved field '{name}' has value '{value}'",
                self.name
            ))
        })
    }

    /// Derives the relational table representation of the model.
    #[must_use]
    pub fn table_spec(&self) -> TableSpec {
        let mut columns = vec![
            ColumnSpec {
                name: ID_FIELD.to_string(),
                ty: ValueType::String,
                primary_key: true,
                indexed: false,
            },
            ColumnSpec {
                name: TIMESTAMP_FIELD.to_string(),
                ty: ValueType::Integer,
                primary_key: false,
                indexed: true,
            },
            ColumnSpec {
                name: DELETED_FIELD.to_string(),
                ty: ValueType::Boolean,
                primary_key: false,
                indexed: false,
            },
        ];

        for field in &self.fields {
            columns.push(ColumnSpec {
                name: field.name.clone(),
                ty: field.ty,
                primary_key: false,
                indexed: false,
            });
        }

        TableSpec {
            table_name: self.name.clone(),
            columns,
        }
    }
}

/// Relational representation of a [`Model`].
#[derive(Debug, Clone, PartialEq)]
pub struct TableSpec {
    /// Table name (the model name).
    pub table_name: String,
    /// Column definitions, reserved columns first.
    pub columns: Vec<ColumnSpec>,
}

impl TableSpec {
    /// Names of the payload columns (everything except `deleted_`).
    ///
    /// These are the columns a relational read projects back into records.
    #[must_use]
    pub fn readable_columns(&self) -> Vec<&ColumnSpec> {
        self.columns.iter().filter(|c| c.name != DELETED_FIELD).collect()
    }
}

/// A single column in a [`TableSpec`].
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    /// Column name (the field name).
    pub name: String,
    /// Declared value type.
    pub ty: ValueType,
    /// Whether this column is the primary key.
    pub primary_key: bool,
    /// Whether this column carries a secondary index.
    pub indexed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;

    fn scan_model() -> Model {
        Model::new("scan")
            .field(FieldDef::required("str_", ValueType::String))
            .field(FieldDef::required("int_", ValueType::Integer))
            .field(FieldDef::optional("float_", ValueType::Float))
            .field(FieldDef::optional("note", ValueType::String).with_default("-"))
    }

    #[test]
    fn validate_record_fills_identity_and_defaults() {
        let model = scan_model();
        let input = record! { "str_" => "hello", "int_" => 2 };

        let out = model.validate_record(&input).unwrap();
        assert!(out.id().is_some());
        assert!(out.timestamp().is_some());
        assert_eq!(out.get("note"), Some(&Value::String("-".to_string())));
        assert_eq!(out.get("float_"), None);
    }

    #[test]
    fn validate_record_rejects_missing_required_field() {
        let model = scan_model();
        let input = record! { "str_" => "hello" };

        let err = model.validate_record(&input).unwrap_err();
        assert!(matches!(err, Error::InvalidModel(_)));
        assert!(err.to_string().contains("int_"));
    }

    #[test]
    fn validate_record_coerces_field_types() {
        let model = scan_model();
        let input = record! { "str_" => "hello", "int_" => "7", "float_" => 2 };

        let out = model.validate_record(&input).unwrap();
        assert_eq!(out.get("int_"), Some(&Value::Int(7)));
        assert_eq!(out.get("float_"), Some(&Value::Float(2.0)));
    }

    #[test]
    fn validate_record_rejects_uncoercible_value() {
        let model = scan_model();
        let input = record! { "str_" => "hello", "int_" => "seven" };

        assert!(matches!(
            model.validate_record(&input),
            Err(Error::InvalidModel(_))
        ));
    }

    #[test]
    fn validate_record_drops_unknown_fields() {
        let model = scan_model();
        let input = record! { "str_" => "hello", "int_" => 1, "bogus" => 9 };

        let out = model.validate_record(&input).unwrap();
        assert!(!out.contains("bogus"));
    }

    #[test]
    fn validate_subrecord_relaxes_required_fields() {
        let model = scan_model();
        let partial = record! { "id_" => "r1", "int_" => 5 };

        let out = model.validate_subrecord(&partial).unwrap();
        assert_eq!(out.get("int_"), Some(&Value::Int(5)));
        // No defaulting, no identity fill.
        assert!(!out.contains("note"));
        assert!(out.timestamp().is_none());
        assert_eq!(out.id(), Some("r1"));
    }

    #[test]
    fn all_optional_derivation() {
        let relaxed = scan_model().as_all_optional();
        assert!(relaxed.fields().iter().all(|f| !f.required));
        // Relaxed model accepts an empty record.
        assert!(relaxed.validate_subrecord(&Record::new()).is_ok());
    }

    #[test]
    fn table_spec_adds_reserved_columns() {
        let spec = scan_model().table_spec();
        assert_eq!(spec.table_name, "scan");

        let id = spec.columns.iter().find(|c| c.name == "id_").unwrap();
        assert!(id.primary_key);

        let t = spec.columns.iter().find(|c| c.name == "t").unwrap();
        assert!(t.indexed);

        let deleted = spec.columns.iter().find(|c| c.name == "deleted_").unwrap();
        assert_eq!(deleted.ty, ValueType::Boolean);

        // deleted_ is internal: reads do not project it.
        assert!(spec.readable_columns().iter().all(|c| c.name != "deleted_"));
    }

    #[test]
    fn null_counts_as_absent() {
        let model = scan_model();
        let input = record! { "str_" => "x", "int_" => Value::Null };
        assert!(matches!(
            model.validate_record(&input),
            Err(Error::InvalidModel(_))
        ));
    }
}
