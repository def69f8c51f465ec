//! Embedded durable [`LocalStorage`] backed by [`redb`].
//!
//! Every `set` is a committed write transaction, so individual keys are
//! durable without whole-map snapshots. `load()` opens (or creates) the
//! database file and the backing table.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use redb::{Database, ReadableTable, TableDefinition};

use datalink_core::Error;

use super::LocalStorage;

const TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("datalink_local_storage");

/// Durable storage with per-key committed writes via an embedded [`redb`]
/// database.
pub struct RedbStorage {
    path: PathBuf,
    db: Mutex<Option<Database>>,
}

impl RedbStorage {
    /// Creates a storage bound to the database file at `path`. Call
    /// [`LocalStorage::load`] to open it.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            db: Mutex::new(None),
        }
    }

    fn storage_err(&self, action: &str, err: impl std::fmt::Display) -> Error {
        Error::Storage(format!("redb {action} ({}): {err}", self.path.display()))
    }
}

impl LocalStorage for RedbStorage {
    fn load(&self) -> Result<(), Error> {
        let mut db = self.db.lock();
        if db.is_some() {
            return Ok(());
        }

        let database =
            Database::create(&self.path).map_err(|e| self.storage_err("open", e))?;

        // Create the table up front so later reads never see a missing table.
        let txn = database
            .begin_write()
            .map_err(|e| self.storage_err("begin", e))?;
        txn.open_table(TABLE)
            .map_err(|e| self.storage_err("open table", e))?;
        txn.commit().map_err(|e| self.storage_err("commit", e))?;

        *db = Some(database);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, Error> {
        let db = self.db.lock();
        let Some(database) = db.as_ref() else {
            return Err(Error::Storage("redb storage is not loaded".to_string()));
        };

        let txn = database
            .begin_read()
            .map_err(|e| self.storage_err("begin read", e))?;
        let table = txn
            .open_table(TABLE)
            .map_err(|e| self.storage_err("open table", e))?;

        match table.get(key).map_err(|e| self.storage_err("get", e))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value())
                    .map_err(|e| self.storage_err("decode", e))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: serde_json::Value) -> Result<(), Error> {
        let bytes = serde_json::to_vec(&value).map_err(|e| self.storage_err("encode", e))?;

        let db = self.db.lock();
        let Some(database) = db.as_ref() else {
            return Err(Error::Storage("redb storage is not loaded".to_string()));
        };

        let txn = database
            .begin_write()
            .map_err(|e| self.storage_err("begin write", e))?;
        {
            let mut table = txn
                .open_table(TABLE)
                .map_err(|e| self.storage_err("open table", e))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(|e| self.storage_err("insert", e))?;
        }
        txn.commit().map_err(|e| self.storage_err("commit", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.redb");

        let storage = RedbStorage::new(&path);
        storage.load().unwrap();
        storage.set("a", serde_json::json!({"x": [1, 2]})).unwrap();
        drop(storage);

        let reopened = RedbStorage::new(&path);
        reopened.load().unwrap();
        assert_eq!(
            reopened.get("a").unwrap(),
            Some(serde_json::json!({"x": [1, 2]}))
        );
        assert_eq!(reopened.get("missing").unwrap(), None);
    }

    #[test]
    fn get_before_load_fails() {
        let dir = tempfile::tempdir().unwrap();
        let storage = RedbStorage::new(dir.path().join("local.redb"));
        assert!(matches!(storage.get("k"), Err(Error::Storage(_))));
    }

    #[test]
    fn load_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = RedbStorage::new(dir.path().join("local.redb"));
        storage.load().unwrap();
        storage.load().unwrap();
        storage.set("k", serde_json::json!(1)).unwrap();
        assert_eq!(storage.get("k").unwrap(), Some(serde_json::json!(1)));
    }
}
