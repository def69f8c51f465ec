//! Model-driven relational [`Backend`] over embedded SQLite.
//!
//! Each key maps to a model whose [`TableSpec`] defines one table: `id_`
//! is the primary key, `t` is indexed, and `deleted_` implements soft
//! deletion (deleted rows are invisible to reads and `deleted_` itself is
//! never projected back). Writes upsert by `id_`, merging partial records
//! into existing rows. The filter grammar compiles to a SQL `WHERE`
//! clause with bound parameters.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::ValueRef;

use datalink_core::{
    Condition, Error, Model, Record, TableSpec, Value, ValueType, ID_FIELD,
};

use crate::connection::{Backend, ReadOptions};

/// Relational backend over an embedded SQLite database.
pub struct SqliteBackend {
    path: PathBuf,
    models: HashMap<String, Model>,
    conn: Mutex<Option<rusqlite::Connection>>,
}

impl SqliteBackend {
    /// Creates a backend for the database at `path` (use `:memory:` for an
    /// ephemeral database) with one model per key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidModel`] when no models are given: a
    /// relational backend cannot derive tables without them.
    pub fn new(
        path: impl AsRef<Path>,
        models: HashMap<String, Model>,
    ) -> Result<Self, Error> {
        if models.is_empty() {
            return Err(Error::InvalidModel(
                "the relational backend needs at least one model".to_string(),
            ));
        }
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            models,
            conn: Mutex::new(None),
        })
    }

    fn read_blocking(&self, key: &str, options: &ReadOptions) -> Result<Option<Vec<Record>>, Error> {
        let guard = self.conn.lock();
        let Some(conn) = guard.as_ref() else {
            return Err(Error::ConnectionNotOpen);
        };
        let Some(model) = self.models.get(key) else {
            return Ok(None);
        };
        let spec = model.table_spec();
        let columns = spec.readable_columns();

        let column_list = columns
            .iter()
            .map(|c| format!("\"{}\"", c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!(
            "SELECT {column_list} FROM \"{}\" WHERE \"deleted_\" = 0",
            spec.table_name
        );
        let mut params: Vec<rusqlite::types::Value> = Vec::new();

        if let Some(since) = options.since {
            sql.push_str(" AND \"t\" >= ?");
            params.push(rusqlite::types::Value::Integer(since));
        }
        if let Some(until) = options.until {
            sql.push_str(" AND \"t\" < ?");
            params.push(rusqlite::types::Value::Integer(until));
        }

        let known: HashSet<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        if let Some(filter) = &options.filter {
            for (field, condition) in filter.conditions() {
                if !known.contains(field.as_str()) {
                    return Err(Error::InvalidRecord(format!(
                        "filter references unknown field '{field}'"
                    )));
                }
                match condition {
                    Condition::In(values) => {
                        let placeholders = vec!["?"; values.len()].join(", ");
                        sql.push_str(&format!(" AND \"{field}\" IN ({placeholders})"));
                        params.extend(values.iter().map(to_sql_param));
                    }
                    Condition::Compare(cmp, operand) => {
                        sql.push_str(&format!(" AND \"{field}\" {} ?", cmp.as_sql()));
                        params.push(to_sql_param(operand));
                    }
                }
            }
        }

        let order = options.order.as_deref().unwrap_or("t");
        let (order_field, direction) = match order.strip_prefix('-') {
            Some(field) => (field, "DESC"),
            None => (order, "ASC"),
        };
        if !known.contains(order_field) {
            return Err(Error::InvalidRecord(format!(
                "order references unknown field '{order_field}'"
            )));
        }
        sql.push_str(&format!(" ORDER BY \"{order_field}\" {direction}"));

        let limit = options.limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let offset = options.offset.unwrap_or(0);
        sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}"));

        let mut statement = conn.prepare(&sql).map_err(db_err)?;
        let rows = statement
            .query_map(rusqlite::params_from_iter(params), |row| {
                let mut record = Record::new();
                for (index, column) in columns.iter().enumerate() {
                    match row.get_ref(index)? {
                        ValueRef::Null => {}
                        ValueRef::Integer(i) => match column.ty {
                            ValueType::Boolean => record.set(column.name.clone(), i != 0),
                            ValueType::Float => {
                                #[allow(clippy::cast_precision_loss)]
                                record.set(column.name.clone(), i as f64);
                            }
                            _ => record.set(column.name.clone(), i),
                        },
                        ValueRef::Real(f) => record.set(column.name.clone(), f),
                        ValueRef::Text(text) => {
                            record.set(column.name.clone(), String::from_utf8_lossy(text).to_string());
                        }
                        ValueRef::Blob(_) => {}
                    }
                }
                Ok(record)
            })
            .map_err(db_err)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(db_err)?);
        }
        Ok(Some(records))
    }

    fn write_blocking(&self, key: &str, records: &[Record]) -> Result<(), Error> {
        let mut guard = self.conn.lock();
        let Some(conn) = guard.as_mut() else {
            return Err(Error::ConnectionNotOpen);
        };
        let Some(model) = self.models.get(key) else {
            return Err(Error::InvalidKey(format!("no model bound to key '{key}'")));
        };
        let table = model.table_spec().table_name;

        let tx = conn.transaction().map_err(db_err)?;
        for record in records {
            let existing_id = record.id().map(ToString::to_string).filter(|id| {
                let mut statement = match tx
                    .prepare(&format!("SELECT 1 FROM \"{table}\" WHERE \"id_\" = ?"))
                {
                    Ok(statement) => statement,
                    Err(_) => return false,
                };
                statement.exists(rusqlite::params![id]).unwrap_or(false)
            });

            match existing_id {
                Some(id) => {
                    let partial = model.validate_subrecord(record)?;
                    let mut assignments = Vec::new();
                    let mut params: Vec<rusqlite::types::Value> = Vec::new();
                    for (field, value) in &partial {
                        if field.as_str() == ID_FIELD {
                            continue;
                        }
                        assignments.push(format!("\"{field}\" = ?"));
                        params.push(to_sql_param(value));
                    }
                    if assignments.is_empty() {
                        continue;
                    }
                    params.push(rusqlite::types::Value::Text(id));
                    tx.execute(
                        &format!(
                            "UPDATE \"{table}\" SET {} WHERE \"id_\" = ?",
                            assignments.join(", ")
                        ),
                        rusqlite::params_from_iter(params),
                    )
                    .map_err(db_err)?;
                }
                None => {
                    let full = model.validate_record(record)?;
                    let mut fields = Vec::new();
                    let mut params: Vec<rusqlite::types::Value> = Vec::new();
                    for (field, value) in &full {
                        fields.push(format!("\"{field}\""));
                        params.push(to_sql_param(value));
                    }
                    let placeholders = vec!["?"; fields.len()].join(", ");
                    tx.execute(
                        &format!(
                            "INSERT INTO \"{table}\" ({}) VALUES ({placeholders})",
                            fields.join(", ")
                        ),
                        rusqlite::params_from_iter(params),
                    )
                    .map_err(db_err)?;
                }
            }
        }
        tx.commit().map_err(db_err)
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    async fn open(&self) -> Result<(), Error> {
        let mut guard = self.conn.lock();
        if guard.is_some() {
            return Ok(());
        }

        let conn = rusqlite::Connection::open(&self.path).map_err(db_err)?;
        for model in self.models.values() {
            conn.execute_batch(&create_table_sql(&model.table_spec()))
                .map_err(db_err)?;
        }
        *guard = Some(conn);
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        // Dropping the handle closes the database.
        *self.conn.lock() = None;
        Ok(())
    }

    async fn is_open(&self) -> bool {
        self.conn.lock().is_some()
    }

    async fn read(&self, key: &str, options: &ReadOptions) -> Result<Option<Vec<Record>>, Error> {
        self.read_blocking(key, options)
    }

    async fn write(&self, key: &str, records: &[Record]) -> Result<(), Error> {
        self.write_blocking(key, records)
    }
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::Other(anyhow::Error::new(e))
}

fn sql_type(ty: ValueType) -> &'static str {
    match ty {
        ValueType::String => "TEXT",
        ValueType::Integer | ValueType::Boolean => "INTEGER",
        ValueType::Float => "REAL",
    }
}

fn to_sql_param(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(b) => rusqlite::types::Value::Integer(i64::from(*b)),
        Value::Int(i) => rusqlite::types::Value::Integer(*i),
        Value::Float(f) => rusqlite::types::Value::Real(*f),
        Value::String(s) => rusqlite::types::Value::Text(s.clone()),
    }
}

fn create_table_sql(spec: &TableSpec) -> String {
    let mut columns = Vec::new();
    for column in &spec.columns {
        let mut definition = format!("\"{}\" {}", column.name, sql_type(column.ty));
        if column.primary_key {
            definition.push_str(" PRIMARY KEY");
        }
        if column.name == "deleted_" {
            definition.push_str(" NOT NULL DEFAULT 0");
        }
        columns.push(definition);
    }

    let mut sql = format!(
        "CREATE TABLE IF NOT EXISTS \"{}\" ({});",
        spec.table_name,
        columns.join(", ")
    );
    for column in &spec.columns {
        if column.indexed {
            sql.push_str(&format!(
                "\nCREATE INDEX IF NOT EXISTS \"{}_{}_idx\" ON \"{}\" (\"{}\");",
                spec.table_name, column.name, spec.table_name, column.name
            ));
        }
    }
    sql
}

#[cfg(test)]
mod tests {
    use datalink_core::{record, FieldDef, Filter};

    use super::*;

    fn test_backend() -> SqliteBackend {
        let model = Model::new("scan")
            .field(FieldDef::required("a", ValueType::Integer))
            .field(FieldDef::optional("b", ValueType::String));
        SqliteBackend::new(":memory:", HashMap::from([("scan".to_string(), model)])).unwrap()
    }

    #[tokio::test]
    async fn open_close_lifecycle() {
        let backend = test_backend();
        assert!(!backend.is_open().await);

        backend.open().await.unwrap();
        assert!(backend.is_open().await);
        // Re-opening is a no-op.
        backend.open().await.unwrap();

        backend.close().await.unwrap();
        assert!(!backend.is_open().await);
    }

    #[tokio::test]
    async fn requires_models() {
        assert!(matches!(
            SqliteBackend::new(":memory:", HashMap::new()),
            Err(Error::InvalidModel(_))
        ));
    }

    #[tokio::test]
    async fn unknown_key_reads_as_none() {
        let backend = test_backend();
        backend.open().await.unwrap();
        assert!(backend.read("other", &ReadOptions::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let backend = test_backend();
        backend.open().await.unwrap();

        backend
            .write("scan", &[record! { "id_" => "r1", "t" => 10, "a" => 8, "b" => "x" }])
            .await
            .unwrap();

        let records = backend.read("scan", &ReadOptions::new()).await.unwrap().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id(), Some("r1"));
        assert_eq!(records[0].timestamp(), Some(10));
        assert_eq!(records[0].get("a"), Some(&Value::Int(8)));
        assert_eq!(records[0].get("b"), Some(&Value::String("x".to_string())));
    }

    #[tokio::test]
    async fn upsert_merges_partial_records() {
        let backend = test_backend();
        backend.open().await.unwrap();

        backend
            .write("scan", &[record! { "id_" => "r1", "t" => 10, "a" => 1, "b" => "old" }])
            .await
            .unwrap();
        backend
            .write("scan", &[record! { "id_" => "r1", "a" => 2 }])
            .await
            .unwrap();

        let records = backend.read("scan", &ReadOptions::new()).await.unwrap().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("a"), Some(&Value::Int(2)));
        assert_eq!(records[0].get("b"), Some(&Value::String("old".to_string())), "untouched field survives");
    }

    #[tokio::test]
    async fn soft_delete_hides_and_restores() {
        // Delete via deleted_ = true, restore via deleted_ = false.
        let backend = test_backend();
        backend.open().await.unwrap();

        backend
            .write("scan", &[record! { "id_" => "X", "a" => 8 }])
            .await
            .unwrap();
        let records = backend.read("scan", &ReadOptions::new()).await.unwrap().unwrap();
        assert_eq!(records.len(), 1);

        backend
            .write("scan", &[record! { "id_" => "X", "deleted_" => true }])
            .await
            .unwrap();
        let records = backend.read("scan", &ReadOptions::new()).await.unwrap().unwrap();
        assert_eq!(records.len(), 0);

        backend
            .write("scan", &[record! { "id_" => "X", "deleted_" => false }])
            .await
            .unwrap();
        let records = backend.read("scan", &ReadOptions::new()).await.unwrap().unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].contains("deleted_"), "deleted_ is never projected");
        assert_eq!(records[0].get("a"), Some(&Value::Int(8)));
    }

    #[tokio::test]
    async fn membership_filter_selects_matching_rows() {
        // Six records; the membership filter selects exactly two.
        let backend = test_backend();
        backend.open().await.unwrap();

        for (i, b) in ["hi", "by", "ax", "dw", "rr", "zu"].iter().enumerate() {
            backend
                .write("scan", &[record! { "t" => i as i64, "a" => i as i64, "b" => *b }])
                .await
                .unwrap();
        }

        let filter: Filter = r#"{"b": ["zu", "rr", "zz"]}"#.parse().unwrap();
        let records = backend
            .read("scan", &ReadOptions::new().filter(filter))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn comparison_filter_and_bounds() {
        let backend = test_backend();
        backend.open().await.unwrap();

        for i in 0..10_i64 {
            backend
                .write("scan", &[record! { "t" => i, "a" => i * 10 }])
                .await
                .unwrap();
        }

        let filter: Filter = r#"{"a": ">=50"}"#.parse().unwrap();
        let records = backend
            .read("scan", &ReadOptions::new().filter(filter))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(records.len(), 5);

        let records = backend
            .read("scan", &ReadOptions::new().since(2).until(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(records.len(), 3, "since inclusive, until exclusive");
    }

    #[tokio::test]
    async fn order_limit_offset() {
        let backend = test_backend();
        backend.open().await.unwrap();

        for i in 0..5_i64 {
            backend
                .write("scan", &[record! { "t" => i, "a" => i }])
                .await
                .unwrap();
        }

        let records = backend
            .read("scan", &ReadOptions::new().order("-t").limit(2).offset(1))
            .await
            .unwrap()
            .unwrap();
        let t: Vec<i64> = records.iter().map(|r| r.timestamp().unwrap()).collect();
        assert_eq!(t, vec![3, 2]);
    }

    #[tokio::test]
    async fn unknown_filter_field_is_rejected() {
        let backend = test_backend();
        backend.open().await.unwrap();

        let filter: Filter = r#"{"nope": 1}"#.parse().unwrap();
        assert!(matches!(
            backend.read("scan", &ReadOptions::new().filter(filter)).await,
            Err(Error::InvalidRecord(_))
        ));
    }

    #[tokio::test]
    async fn validation_failure_aborts_the_batch() {
        let backend = test_backend();
        backend.open().await.unwrap();

        // "a" is required and uncoercible here.
        let err = backend
            .write("scan", &[record! { "id_" => "bad", "a" => "not a number" }])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidModel(_)));

        let records = backend.read("scan", &ReadOptions::new()).await.unwrap().unwrap();
        assert!(records.is_empty(), "failed batch leaves no rows behind");
    }
}
