//! Store-and-forward: a durable write buffer keyed by backend key.
//!
//! When the backend is unavailable, pending writes accumulate in
//! [`LocalStorage`](crate::storage::LocalStorage) under
//! `STORE_AND_FORWARD_<name>`; on reconnect the whole buffer replays in
//! insertion order. The buffer is persisted *before* every write attempt,
//! so a crash between "buffered" and "flushed" loses nothing.

use std::collections::BTreeMap;
use std::sync::Arc;

use datalink_core::{Error, ErrorReport, Record};

use crate::connection::Backend;
use crate::storage::{LocalStorage, LocalStorageExt};

/// Reserved local-storage namespace prefix for write buffers.
pub const STORAGE_KEY_PREFIX: &str = "STORE_AND_FORWARD";

type Buffer = BTreeMap<String, Vec<Record>>;

/// Durable write buffer owned by a single connection.
///
/// `name` uniquely identifies the owning connection instance; two
/// connections sharing one [`LocalStorage`] stay isolated through their
/// distinct storage keys.
pub struct StoreAndForward {
    name: String,
    storage: Arc<dyn LocalStorage>,
}

impl StoreAndForward {
    /// Creates a buffer for the connection identified by `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, storage: Arc<dyn LocalStorage>) -> Self {
        Self {
            name: name.into(),
            storage,
        }
    }

    /// The local-storage key this buffer persists under.
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!("{STORAGE_KEY_PREFIX}_{}", self.name)
    }

    /// Appends `records` to the buffer for `key`, persists, then attempts
    /// one write of the whole buffered sequence. On success the key's
    /// buffer is cleared and persisted again; on failure it stays intact.
    ///
    /// # Errors
    ///
    /// Propagates storage failures and the backend's write error. After a
    /// write error the records remain buffered for the next flush.
    pub async fn add_and_flush(
        &self,
        backend: &dyn Backend,
        key: &str,
        records: &[Record],
    ) -> Result<(), Error> {
        let mut buffer: Buffer = self.storage.get_as(&self.storage_key())?;
        buffer
            .entry(key.to_string())
            .or_default()
            .extend(records.iter().cloned());
        self.storage.set_as(&self.storage_key(), &buffer)?;

        let pending = buffer.get(key).cloned().unwrap_or_default();
        tracing::debug!(key, pending = pending.len(), "flushing buffered records");
        backend.write(key, &pending).await?;

        buffer.insert(key.to_string(), Vec::new());
        self.storage.set_as(&self.storage_key(), &buffer)?;
        Ok(())
    }

    /// Attempts one write per buffered key, clearing and persisting each
    /// key that succeeds. Returns the per-key errors of the ones that
    /// failed; their buffers stay intact.
    pub async fn flush_all(&self, backend: &dyn Backend) -> Vec<ErrorReport> {
        let mut buffer: Buffer = match self.storage.get_as(&self.storage_key()) {
            Ok(buffer) => buffer,
            Err(e) => return vec![ErrorReport::new(e)],
        };

        let mut errors = Vec::new();
        let keys: Vec<String> = buffer.keys().cloned().collect();

        for key in keys {
            let records = buffer.get(&key).cloned().unwrap_or_default();
            if records.is_empty() {
                continue;
            }

            match backend.write(&key, &records).await {
                Ok(()) => {
                    buffer.insert(key.clone(), Vec::new());
                    if let Err(e) = self.storage.set_as(&self.storage_key(), &buffer) {
                        errors.push(ErrorReport::new(e).with_key(key));
                    }
                }
                Err(e) => {
                    errors.push(ErrorReport::new(e).with_key(key).with_data(records));
                }
            }
        }

        errors
    }

    /// The records currently buffered for `key`, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] when the buffer cannot be read.
    pub fn pending(&self, key: &str) -> Result<Vec<Record>, Error> {
        let buffer: Buffer = self.storage.get_as(&self.storage_key())?;
        Ok(buffer.get(key).cloned().unwrap_or_default())
    }

    /// Whether no key has buffered records.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] when the buffer cannot be read.
    pub fn is_empty(&self) -> Result<bool, Error> {
        let buffer: Buffer = self.storage.get_as(&self.storage_key())?;
        Ok(buffer.values().all(Vec::is_empty))
    }
}

#[cfg(test)]
mod tests {
    use datalink_core::record;

    use super::*;
    use crate::connection::backends::MemoryBackend;
    use crate::storage::MemoryStorage;

    fn setup() -> (StoreAndForward, MemoryBackend) {
        let storage = Arc::new(MemoryStorage::new());
        let buffer = StoreAndForward::new("test", storage);
        let backend = MemoryBackend::new();
        (buffer, backend)
    }

    #[tokio::test]
    async fn add_and_flush_writes_through_when_backend_is_up() {
        let (buffer, backend) = setup();
        backend.open_now();

        buffer
            .add_and_flush(&backend, "k", &[record! { "a" => 1 }])
            .await
            .unwrap();

        assert_eq!(backend.written("k").len(), 1);
        assert!(buffer.is_empty().unwrap());
    }

    #[tokio::test]
    async fn failed_write_keeps_the_buffer() {
        let (buffer, backend) = setup();
        backend.open_now();
        backend.fail_writes(true);

        let err = buffer
            .add_and_flush(&backend, "k", &[record! { "a" => 1 }])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("write refused"));

        assert_eq!(backend.written("k").len(), 0);
        assert_eq!(buffer.pending("k").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn replay_preserves_submission_order() {
        // Two failing writes then a successful one deliver a:1, a:2, a:3.
        let (buffer, backend) = setup();
        backend.open_now();

        backend.fail_writes(true);
        for i in 1..=2 {
            let _ = buffer
                .add_and_flush(&backend, "X", &[record! { "a" => i }])
                .await;
        }
        assert_eq!(buffer.pending("X").unwrap().len(), 2);

        backend.fail_writes(false);
        buffer
            .add_and_flush(&backend, "X", &[record! { "a" => 3 }])
            .await
            .unwrap();

        let written = backend.written("X");
        let a_values: Vec<i64> = written
            .iter()
            .map(|r| r.get("a").unwrap().as_int().unwrap())
            .collect();
        assert_eq!(a_values, vec![1, 2, 3]);
        assert!(buffer.is_empty().unwrap());
    }

    #[tokio::test]
    async fn flush_all_reports_per_key_errors() {
        let (buffer, backend) = setup();
        backend.open_now();
        backend.fail_writes(true);

        let _ = buffer.add_and_flush(&backend, "a", &[record! { "x" => 1 }]).await;
        let _ = buffer.add_and_flush(&backend, "b", &[record! { "x" => 2 }]).await;

        // Still failing: one error per key, buffers intact.
        let errors = buffer.flush_all(&backend).await;
        assert_eq!(errors.len(), 2);
        assert_eq!(buffer.pending("a").unwrap().len(), 1);

        // Recovered: everything drains.
        backend.fail_writes(false);
        let errors = buffer.flush_all(&backend).await;
        assert!(errors.is_empty());
        assert!(buffer.is_empty().unwrap());
        assert_eq!(backend.written("a").len(), 1);
        assert_eq!(backend.written("b").len(), 1);
    }

    #[tokio::test]
    async fn flush_all_skips_drained_keys() {
        let (buffer, backend) = setup();
        backend.open_now();

        buffer
            .add_and_flush(&backend, "k", &[record! { "a" => 1 }])
            .await
            .unwrap();
        assert_eq!(backend.written("k").len(), 1);

        // Buffer for "k" is now empty: flush_all must not rewrite it.
        let errors = buffer.flush_all(&backend).await;
        assert!(errors.is_empty());
        assert_eq!(backend.written("k").len(), 1);
    }

    #[test]
    fn storage_key_is_namespaced_per_connection() {
        let storage: Arc<dyn LocalStorage> = Arc::new(MemoryStorage::new());
        let a = StoreAndForward::new("plc-1", storage.clone());
        let b = StoreAndForward::new("plc-2", storage);
        assert_eq!(a.storage_key(), "STORE_AND_FORWARD_plc-1");
        assert_ne!(a.storage_key(), b.storage_key());
    }
}
