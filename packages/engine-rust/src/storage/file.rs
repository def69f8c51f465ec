//! File-backed [`LocalStorage`] with an opaque binary snapshot.
//!
//! The whole map is serialized to `MessagePack` (`rmp-serde`) and rewritten
//! on every `set`. `load()` reads the snapshot back if the file exists.
//! Simple and robust for small buffers; not meant for high write rates.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use datalink_core::Error;

use super::LocalStorage;

type Snapshot = BTreeMap<String, serde_json::Value>;

/// Durable storage that snapshots the whole map to a binary file on every
/// `set`.
pub struct FileStorage {
    path: PathBuf,
    entries: Mutex<Snapshot>,
}

impl FileStorage {
    /// Creates a storage bound to `path`. Call [`LocalStorage::load`]
    /// before use to pick up a previous snapshot.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            entries: Mutex::new(Snapshot::new()),
        }
    }

    /// The snapshot file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &Snapshot) -> Result<(), Error> {
        let bytes = rmp_serde::to_vec(entries)
            .map_err(|e| Error::Storage(format!("cannot encode snapshot: {e}")))?;
        std::fs::write(&self.path, bytes).map_err(|e| {
            Error::Storage(format!("cannot write {}: {e}", self.path.display()))
        })
    }
}

impl LocalStorage for FileStorage {
    fn load(&self) -> Result<(), Error> {
        if !self.path.is_file() {
            return Ok(());
        }
        let bytes = std::fs::read(&self.path).map_err(|e| {
            Error::Storage(format!("cannot read {}: {e}", self.path.display()))
        })?;
        let snapshot: Snapshot = rmp_serde::from_slice(&bytes).map_err(|e| {
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
