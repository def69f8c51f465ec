//! In-memory [`LocalStorage`] backed by [`DashMap`].
//!
//! Provides concurrent read/write access without external locking. Holds
//! nothing across process restarts; suitable for tests and for connections
//! that do not need their buffers to survive a crash.

use dashmap::DashMap;

use datalink_core::Error;

use super::LocalStorage;

/// Process-only storage backed by [`DashMap`] for concurrent access.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: DashMap<String, serde_json::Value>,
}

impl MemoryStorage {
    /// Creates a new, empty `MemoryStorage`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the storage holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl LocalStorage for MemoryStorage {
    fn load(&self) -> Result<(), Error> {
        // Nothing to read: the map starts empty.
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, Error> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }

    fn set(&self, key: &str, value: serde_json::Value) -> Result<(), Error> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}
