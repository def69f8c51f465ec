//! In-process [`Backend`] with scriptable failures.
//!
//! Stores written records per key in memory and honors the full
//! [`ReadOptions`] set through [`ReadOptions::apply`]. The failure
//! switches (`fail_writes`, `fail_opens`, scripted `is_open`) exist so
//! engine tests can drive reconnect and buffering behavior
//! deterministically.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use datalink_core::{Error, Record};

use crate::connection::{Backend, ReadOptions};

/// In-memory backend: one record list per key.
#[derive(Default)]
pub struct MemoryBackend {
    open: AtomicBool,
    fail_writes: AtomicBool,
    fail_opens: AtomicBool,
    open_calls: AtomicUsize,
    tables: Mutex<HashMap<String, Vec<Record>>>,
    known_keys: Option<HashSet<String>>,
    open_script: Mutex<VecDeque<bool>>,
}

impl MemoryBackend {
    /// Creates a closed backend accepting any key.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend that only knows the given keys; reads of other
    /// keys return "unknown key".
    #[must_use]
    pub fn with_keys(keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            known_keys: Some(keys.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Opens the backend synchronously (test convenience).
    pub fn open_now(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    /// Makes every `write` fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes every `open` fail (or succeed again).
    pub fn fail_opens(&self, fail: bool) {
        self.fail_opens.store(fail, Ordering::SeqCst);
    }

    /// Scripts the next `is_open` answers; once the script is drained,
    /// `is_open` falls back to the real open flag.
    pub fn script_is_open(&self, answers: impl IntoIterator<Item = bool>) {
        self.open_script.lock().extend(answers);
    }

    /// Number of times `open` was called.
    #[must_use]
    pub fn open_call_count(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    /// Everything written under `key`, in write order.
    #[must_use]
    pub fn written(&self, key: &str) -> Vec<Record> {
        self.tables.lock().get(key).cloned().unwrap_or_default()
    }

    /// Pre-populates `key` with records (test fixture helper).
    pub fn seed(&self, key: &str, records: Vec<Record>) {
        self.tables.lock().insert(key.to_string(), records);
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn open(&self) -> Result<(), Error> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_opens.load(Ordering::SeqCst) {
            return Err(Error::Other(anyhow::anyhow!("open refused")));
        }
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_open(&self) -> bool {
        if let Some(scripted) = self.open_script.lock().pop_front() {
            return scripted;
        }
        self.open.load(Ordering::SeqCst)
    }

    async fn read(&self, key: &str, options: &ReadOptions) -> Result<Option<Vec<Record>>, Error> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(Error::ConnectionNotOpen);
        }
        if let Some(known) = &self.known_keys {
            if !known.contains(key) {
                return Ok(None);
            }
        }

        let records = self.tables.lock().get(key).cloned().unwrap_or_default();
        Ok(Some(options.apply(records)))
    }

    async fn write(&self, key: &str, records: &[Record]) -> Result<(), Error> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(Error::ConnectionNotOpen);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Other(anyhow::anyhow!("write refused")));
        }

        self.tables
            .lock()
            .entry(key.to_string())
            .or_default()
            .extend(records.iter().cloned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use datalink_core::record;

    use super::*;

    #[tokio::test]
    async fn read_and_write_require_open() {
        let backend = MemoryBackend::new();

        assert!(matches!(
            backend.read("k", &ReadOptions::new()).await,
            Err(Error::ConnectionNotOpen)
        ));
        assert!(matches!(
            backend.write("k", &[record! { "a" => 1 }]).await,
            Err(Error::ConnectionNotOpen)
        ));

        backend.open().await.unwrap();
        backend.write("k", &[record! { "a" => 1 }]).await.unwrap();
        let records = backend.read("k", &ReadOptions::new()).await.unwrap().unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn unknown_keys_read_as_none_when_restricted() {
        let backend = MemoryBackend::with_keys(["known"]);
        backend.open_now();

        assert!(backend.read("known", &ReadOptions::new()).await.unwrap().is_some());
        assert!(backend.read("other", &ReadOptions::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn scripted_is_open_drains_then_falls_back() {
        let backend = MemoryBackend::new();
        backend.script_is_open([true, false]);

        assert!(backend.is_open().await);
        assert!(!backend.is_open().await);
        assert!(!backend.is_open().await, "falls back to the real flag");
    }

    #[tokio::test]
    async fn write_failure_leaves_storage_untouched() {
        let backend = MemoryBackend::new();
        backend.open_now();
        backend.fail_writes(true);

        assert!(backend.write("k", &[record! { "a" => 1 }]).await.is_err());
        assert!(backend.written("k").is_empty());
    }
}
