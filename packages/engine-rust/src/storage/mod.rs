//! Local key/value persistence shared by every connection in a process.
//!
//! [`LocalStorage`] is the abstraction store-and-forward buffers and
//! report-by-exception state live behind. Variants:
//!
//! - [`MemoryStorage`]: process-only, no persistence (the default)
//! - [`FileStorage`]: whole-map `MessagePack` snapshot written on every `set`
//! - [`JsonStorage`]: whole-map JSON snapshot written on every `set`
//! - `RedbStorage` (feature `redb`): per-key durable embedded store
//! - `RedisStorage` (feature `redis`): per-key remote store
//!
//! Values are arbitrary composite JSON (`serde_json::Value`); the
//! [`LocalStorageExt`] helpers move typed data in and out through serde.

pub mod file;
pub mod json;
pub mod memory;
#[cfg(feature = "redb")]
pub mod redb;
#[cfg(feature = "redis")]
pub mod redis;

use std::sync::{Arc, OnceLock};

use serde::de::DeserializeOwned;
use serde::Serialize;

use datalink_core::Error;

pub use file::FileStorage;
pub use json::JsonStorage;
pub use memory::MemoryStorage;
#[cfg(feature = "redb")]
pub use redb::RedbStorage;
#[cfg(feature = "redis")]
pub use redis::RedisStorage;

/// Process-wide key/value persistence.
///
/// Implementations must be safe under concurrent `get`/`set`: the engine
/// shares one storage across every connection in the process, and
/// background workers touch it from their own tasks and threads.
pub trait LocalStorage: Send + Sync + 'static {
    /// Prepares the storage: reads the snapshot file, opens the embedded
    /// store, or connects to the remote one. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] when the backing medium cannot be
    /// opened or its contents cannot be decoded.
    fn load(&self) -> Result<(), Error>;

    /// Reads a value. Unknown keys yield `Ok(None)`, never an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on medium-level failures.
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, Error>;

    /// Writes a value, persisting it according to the variant's durability.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] when the value cannot be persisted.
    fn set(&self, key: &str, value: serde_json::Value) -> Result<(), Error>;
}

/// Typed and defaulted accessors layered over [`LocalStorage`].
pub trait LocalStorageExt {
    /// Reads a value, substituting `default` when the key is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on medium-level failures.
    fn get_or(&self, key: &str, default: serde_json::Value) -> Result<serde_json::Value, Error>;

    /// Reads and deserializes a value, substituting `T::default()` when the
    /// key is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] when the stored value does not
    /// deserialize as `T`.
    fn get_as<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T, Error>;

    /// Serializes and writes a value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] when serialization or persistence fails.
    fn set_as<T: Serialize>(&self, key: &str, value: &T) -> Result<(), Error>;
}

impl<S: LocalStorage + ?Sized> LocalStorageExt for S {
    fn get_or(&self, key: &str, default: serde_json::Value) -> Result<serde_json::Value, Error> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    fn get_as<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T, Error> {
        match self.get(key)? {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| Error::Storage(format!("stored value for '{key}' is corrupt: {e}"))),
            None => Ok(T::default()),
        }
    }

    fn set_as<T: Serialize>(&self, key: &str, value: &T) -> Result<(), Error> {
        let json = serde_json::to_value(value)
            .map_err(|e| Error::Storage(format!("value for '{key}' is not serializable: {e}")))?;
        self.set(key, json)
    }
}

/// The process-wide default storage: one shared in-memory map.
///
/// Connections built without an explicit storage use this. It is a plain
/// [`MemoryStorage`], so buffered writes do not survive the process --
/// pass a durable variant to the connection builder when they must.
pub fn default_shared() -> Arc<dyn LocalStorage> {
    static SHARED: OnceLock<Arc<MemoryStorage>> = OnceLock::new();
    SHARED.get_or_init(|| Arc::new(MemoryStorage::new())).clone()
}

/// Selects a [`LocalStorage`] variant by configuration.
#[derive(Debug, Clone, Default)]
pub enum StorageConfig {
    /// Process-only in-memory map.
    #[default]
    Memory,
    /// Binary snapshot file.
    File(std::path::PathBuf),
    /// JSON snapshot file.
    Json(std::path::PathBuf),
    /// Embedded per-key durable store.
    #[cfg(feature = "redb")]
    Redb(std::path::PathBuf),
    /// Remote store at the given server URL.
    #[cfg(feature = "redis")]
    Redis(String),
}

/// Builds the storage variant a configuration asks for.
///
/// The caller owns the `load()` lifecycle (the connection builder calls
/// it when handed the storage).
#[must_use]
pub fn build_storage(config: &StorageConfig) -> Arc<dyn LocalStorage> {
    match config {
        StorageConfig::Memory => Arc::new(MemoryStorage::new()),
        StorageConfig::File(path) => Arc::new(FileStorage::new(path)),
        StorageConfig::Json(path) => Arc::new(JsonStorage::new(path)),
        #[cfg(feature = "redb")]
        StorageConfig::Redb(path) => Arc::new(RedbStorage::new(path)),
        #[cfg(feature = "redis")]
        StorageConfig::Redis(url) => Arc::new(RedisStorage::new(url.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_shared_is_one_instance() {
        let a = default_shared();
        let b = default_shared();

        a.set("shared-k", serde_json::json!({"x": 1})).unwrap();
        assert_eq!(b.get("shared-k").unwrap(), Some(serde_json::json!({"x": 1})));
    }

    #[test]
    fn typed_accessors_round_trip() {
        let storage = MemoryStorage::new();
        let value: Vec<u32> = vec![1, 2, 3];

        storage.set_as("nums", &value).unwrap();
        let back: Vec<u32> = storage.get_as("nums").unwrap();
        assert_eq!(back, value);

        let missing: Vec<u32> = storage.get_as("absent").unwrap();
        assert!(missing.is_empty());
    }

    #[test]
    fn get_or_returns_default_for_unknown_key() {
        let storage = MemoryStorage::new();
        let fallback = serde_json::json!({"empty": true});
        assert_eq!(storage.get_or("nope", fallback.clone()).unwrap(), fallback);
    }

    #[test]
    fn factory_builds_the_configured_variant() {
        let dir = tempfile::tempdir().unwrap();

        let storage = build_storage(&StorageConfig::Memory);
        storage.load().unwrap();
        storage.set("k", serde_json::json!(1)).unwrap();
        assert_eq!(storage.get("k").unwrap(), Some(serde_json::json!(1)));

        let storage = build_storage(&StorageConfig::Json(dir.path().join("s.json")));
        storage.load().unwrap();
        storage.set("k", serde_json::json!(2)).unwrap();
        assert!(dir.path().join("s.json").is_file());

        let storage = build_storage(&StorageConfig::File(dir.path().join("s.bin")));
        storage.load().unwrap();
        storage.set("k", serde_json::json!(3)).unwrap();
        assert!(dir.path().join("s.bin").is_file());
    }
}
