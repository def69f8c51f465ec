//! File-backed [`LocalStorage`] with a human-readable JSON snapshot.
//!
//! Same lifecycle as [`FileStorage`](super::FileStorage), but the snapshot
//! is pretty-printed JSON so buffers can be inspected and hand-edited.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use datalink_core::Error;

use super::LocalStorage;

type Snapshot = BTreeMap<String, serde_json::Value>;

/// Durable storage that snapshots the whole map to a JSON file on every
/// `set`.
pub struct JsonStorage {
    path: PathBuf,
    entries: Mutex<Snapshot>,
}

impl JsonStorage {
    /// Creates a storage bound to `path`. Call [`LocalStorage::load`]
    /// before use to pick up a previous snapshot.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            entries: Mutex::new(Snapshot::new()),
        }
    }

    fn persist(&self, entries: &Snapshot) -> Result<(), Error> {
        let text = serde_json::to_string_pretty(entries)
            .map_err(|e| Error::Storage(format!("cannot encode snapshot: {e}")))?;
        std::fs::write(&self.path, text).map_err(|e| {
            Error::Storage(format!("cannot write {}: {e}", self.path.display()))
        })
    }
}

impl LocalStorage for JsonStorage {
    fn load(&self) -> Result<(), Error> {
        if !self.path.is_file() {
            return Ok(());
        }
        let text = std::fs::read_to_string(&self.path).map_err(|e| {
            Error::Storage(format!("cannot read {}: {e}", self.path.display()))
        })?;
        let snapshot: Snapshot = serde_json::from_str(&text).map_err(|e| {
            Error::Storage(format!("corrupt snapshot {}: {e}", self.path.display()))
        })?;
        *self.entries.lock() = snapshot;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, Error> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: serde_json::Value) -> Result<(), Error> {
        let mut entries = self.entries.lock();
        entries.insert(key.to_string(), value);
        self.persist(&entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn survives_reload_as_readable_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("buffer.json");

        let storage = JsonStorage::new(&path);
        storage.load().unwrap();
        storage.set("a", serde_json::json!({"x": 1})).unwrap();

        // On-disk form is plain JSON.
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"a\""));

        let reopened = JsonStorage::new(&path);
        reopened.load().unwrap();
        assert_eq!(reopened.get("a").unwrap(), Some(serde_json::json!({"x": 1})));
    }

    #[test]
    fn load_without_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path().join("missing.json"));
        storage.load().unwrap();
        assert_eq!(storage.get("k").unwrap(), None);
    }
}
