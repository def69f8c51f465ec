//! The connection engine: lifecycle, safety, buffering, and supervision.
//!
//! A concrete backend implements the five [`Backend`] primitives (`open`,
//! `close`, `is_open`, `read`, `write`); [`Connection`] wraps it with the
//! full reliability envelope:
//!
//! - `safe_read` / `safe_write`: open-on-demand, validation, diffing,
//!   buffering, and exactly-one `on_error` report per failure
//! - `subscribe`: a background poller per key with cooperative cancellation
//! - `supervise`: the reconnect loop with connect/disconnect edge detection
//!   and store-and-forward replay
//!
//! Background work runs on the shared cooperative executor, or on detached
//! OS threads when the connection is configured `multi_thread`.

pub mod backends;

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;

use datalink_core::{Error, ErrorReport, Filter, Model, Record, RecordSet};

use crate::pacing::{Pacing, StepPacer};
use crate::reliability::{ReportByException, StoreAndForward};
use crate::runtime::BackgroundRuntime;
use crate::storage::{self, LocalStorage};

// ---------------------------------------------------------------------------
// Backend interface
// ---------------------------------------------------------------------------

/// The five primitives a concrete backend driver implements.
///
/// The engine composes safety, buffering, and scheduling on top; drivers
/// only move records in and out of their medium. Used as
/// `Arc<dyn Backend>`.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Opens the backend. Must fail when the medium is unreachable.
    async fn open(&self) -> Result<(), Error>;

    /// Closes the backend and releases its resources.
    async fn close(&self) -> Result<(), Error>;

    /// Whether the backend is currently usable.
    async fn is_open(&self) -> bool;

    /// Reads records for `key`. `Ok(None)` means the key is unknown to
    /// this backend; the engine surfaces that as [`Error::InvalidKey`].
    async fn read(&self, key: &str, options: &ReadOptions) -> Result<Option<Vec<Record>>, Error>;

    /// Writes records for `key`.
    async fn write(&self, key: &str, records: &[Record]) -> Result<(), Error>;
}

// ---------------------------------------------------------------------------
// Read qualifiers
// ---------------------------------------------------------------------------

/// Standard read qualifiers; each backend honors the subset that applies.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Lower timestamp bound, inclusive.
    pub since: Option<i64>,
    /// Upper timestamp bound, exclusive.
    pub until: Option<i64>,
    /// Maximum number of records.
    pub limit: Option<usize>,
    /// Records to skip before collecting.
    pub offset: Option<usize>,
    /// Field to order by; a leading `-` reverses the order.
    pub order: Option<String>,
    /// Per-field condition filter.
    pub filter: Option<Filter>,
}

impl ReadOptions {
    /// No qualifiers: everything the backend has for the key.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the inclusive lower timestamp bound.
    #[must_use]
    pub fn since(mut self, since: i64) -> Self {
        self.since = Some(since);
        self
    }

    /// Sets the exclusive upper timestamp bound.
    #[must_use]
    pub fn until(mut self, until: i64) -> Self {
        self.until = Some(until);
        self
    }

    /// Caps the number of returned records.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips the first `offset` records.
    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Orders by a field; prefix with `-` for descending.
    #[must_use]
    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }

    /// Restricts results to records matching the filter.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Evaluates the qualifiers against an in-memory record list.
    ///
    /// Backends without native query support (the memory backend, simple
    /// device drivers) delegate to this.
    #[must_use]
    pub fn apply(&self, records: Vec<Record>) -> Vec<Record> {
        let mut records: Vec<Record> = records
            .into_iter()
            .filter(|r| {
                self.since
                    .is_none_or(|since| r.timestamp().is_some_and(|t| t >= since))
            })
            .filter(|r| {
                self.until
                    .is_none_or(|until| r.timestamp().is_some_and(|t| t < until))
            })
            .filter(|r| self.filter.as_ref().is_none_or(|f| f.matches(r)))
            .collect();

        if let Some(order) = &self.order {
            let (field, descending) = match order.strip_prefix('-') {
                Some(field) => (field, true),
                None => (order.as_str(), false),
            };
            records.sort_by(|a, b| {
                let ordering = match (a.get(field), b.get(field)) {
                    (Some(x), Some(y)) => x.compare(y).unwrap_or(std::cmp::Ordering::Equal),
                    (Some(_), None) => std::cmp::Ordering::Greater,
                    (None, Some(_)) => std::cmp::Ordering::Less,
                    (None, None) => std::cmp::Ordering::Equal,
                };
                if descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }

        records
            .into_iter()
            .skip(self.offset.unwrap_or(0))
            .take(self.limit.unwrap_or(usize::MAX))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Callbacks
// ---------------------------------------------------------------------------

/// Consumer-supplied callbacks, all with empty defaults.
///
/// Callbacks run on whichever worker performs the triggering operation;
/// do not assume thread affinity between them. A panicking callback is
/// contained at the loop boundary and surfaced through `on_error`.
pub trait ConnectionEvents: Send + Sync + 'static {
    /// A subscription poller read a non-empty record set.
    fn on_new_data(&self, _key: &str, _data: &RecordSet) {}

    /// A safe operation failed. Called exactly once per failure.
    fn on_error(&self, _error: &ErrorReport) {}

    /// The supervisor observed a disconnected-to-connected edge.
    fn on_connect(&self) {}

    /// The supervisor observed a connected-to-disconnected edge.
    fn on_disconnect(&self) {}
}

/// The default, do-nothing event handler.
#[derive(Debug, Default)]
pub struct NullEvents;

impl ConnectionEvents for NullEvents {}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Per-connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Identifies this connection instance; used for error annotations and
    /// as the store-and-forward buffer namespace.
    pub client_id: String,
    /// Default pacing for pollers and the supervisor.
    pub time_step: Pacing,
    /// Buffer failed writes and replay them on reconnect.
    pub store_and_forward: bool,
    /// Diff outgoing records against the last observed state per key.
    pub report_by_exception: bool,
    /// Run background work on OS threads instead of the cooperative
    /// executor.
    pub multi_thread: bool,
    /// Models bound to keys; writes under these keys validate against them.
    pub models: HashMap<String, Model>,
    /// Deadline for `open()`; `None` trusts the driver's own timeout.
    pub open_timeout: Option<Duration>,
    /// Deadline for `read()`.
    pub read_timeout: Option<Duration>,
    /// Deadline for `write()`.
    pub write_timeout: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            time_step: Pacing::default(),
            store_and_forward: false,
            report_by_exception: false,
            multi_thread: false,
            models: HashMap::new(),
            open_timeout: None,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

struct ConnectionInner {
    backend: Arc<dyn Backend>,
    config: ConnectionConfig,
    events: Arc<dyn ConnectionEvents>,
    buffer: Option<StoreAndForward>,
    differ: Option<ReportByException>,
    subscribed: DashSet<String>,
    supervising: AtomicBool,
    // Serializes buffer mutation between safe_write and the supervisor's
    // reconnect flush.
    write_gate: tokio::sync::Mutex<()>,
}

/// The connection engine over one backend.
///
/// Cheap to clone; clones share subscriptions, buffers, and the
/// supervisor. Build with [`Connection::builder`].
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

/// Assembles a [`Connection`] from a backend plus optional configuration,
/// event handler, and local storage.
pub struct ConnectionBuilder {
    backend: Arc<dyn Backend>,
    config: ConnectionConfig,
    events: Arc<dyn ConnectionEvents>,
    storage: Option<Arc<dyn LocalStorage>>,
}

impl ConnectionBuilder {
    /// Replaces the default configuration.
    #[must_use]
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Installs the consumer's event handler.
    #[must_use]
    pub fn events(mut self, events: Arc<dyn ConnectionEvents>) -> Self {
        self.events = events;
        self
    }

    /// Uses the given local storage instead of the process-wide default
    /// (a shared in-memory map).
    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn LocalStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Builds the connection, preparing the storage and the reliability
    /// helpers the configuration asks for.
    #[must_use]
    pub fn build(self) -> Connection {
        let storage = self.storage.unwrap_or_else(storage::default_shared);
        if let Err(e) = storage.load() {
            tracing::warn!("local storage failed to load: {e}");
        }

        let buffer_name = if self.config.client_id.is_empty() {
            "connection".to_string()
        } else {
            self.config.client_id.clone()
        };

        let buffer = self
            .config
            .store_and_forward
            .then(|| StoreAndForward::new(buffer_name, storage.clone()));
        let differ = self
            .config
            .report_by_exception
            .then(|| ReportByException::new(storage.clone()));

        Connection {
            inner: Arc::new(ConnectionInner {
                backend: self.backend,
                config: self.config,
                events: self.events,
                buffer,
                differ,
                subscribed: DashSet::new(),
                supervising: AtomicBool::new(false),
                write_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }
}

impl Connection {
    /// Starts building a connection over `backend`.
    #[must_use]
    pub fn builder(backend: Arc<dyn Backend>) -> ConnectionBuilder {
        ConnectionBuilder {
            backend,
            config: ConnectionConfig::default(),
            events: Arc::new(NullEvents),
            storage: None,
        }
    }

    /// This connection's configuration.
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// The wrapped backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    /// The store-and-forward buffer, when configured.
    #[must_use]
    pub fn buffer(&self) -> Option<&StoreAndForward> {
        self.inner.buffer.as_ref()
    }

    // --- Safe operations ---

    /// Reads records for `key`, opening the backend on demand.
    ///
    /// Failures (including a backend that does not know the key) are
    /// delivered once to `on_error` and yield `None`.
    pub async fn safe_read(&self, key: &str, options: ReadOptions) -> Option<RecordSet> {
        match self.try_read(key, &options).await {
            Ok(set) => Some(set),
            Err(error) => {
                self.report(
                    ErrorReport::new(error)
                        .with_key(key)
                        .with_args(format!("{options:?}")),
                );
                None
            }
        }
    }

    /// Writes records for `key` through the reliability envelope:
    /// validation, report-by-exception, open-on-demand, and (when
    /// configured) the store-and-forward buffer.
    ///
    /// Failures are delivered once to `on_error`; an empty write (after
    /// validation and diffing) is a no-op.
    pub async fn safe_write(&self, key: &str, records: impl IntoIterator<Item = Record> + Send) {
        let set = match self.normalize(key, records) {
            Ok(set) => set,
            Err(error) => {
                self.report(ErrorReport::new(error).with_key(key));
                return;
            }
        };
        if set.is_empty() {
            return;
        }
        let mut data = set.records();

        if let Some(differ) = &self.inner.differ {
            data = match differ.next(key, &data) {
                Ok(diffed) => diffed,
                Err(error) => {
                    self.report(ErrorReport::new(error).with_key(key).with_data(data));
                    return;
                }
            };
            if data.is_empty() {
                tracing::debug!(key, "report-by-exception suppressed the whole write");
                return;
            }
        }

        if let Err(error) = self.dispatch_write(key, &data).await {
            self.report(ErrorReport::new(error).with_key(key).with_data(data));
        }
    }

    /// Schedules a `safe_write` onto the background executor (or a fresh
    /// thread under `multi_thread`) and returns immediately.
    pub fn spawn_write(&self, key: impl Into<String>, records: Vec<Record>) {
        let key = key.into();
        let connection = self.clone();
        self.spawn("datalink-write", async move {
            connection.safe_write(&key, records).await;
        });
    }

    // --- Subscriptions ---

    /// Registers `key` and starts its background poller; a no-op when the
    /// key is already subscribed.
    ///
    /// The poller waits one pacing step, checks it is still subscribed,
    /// calls `safe_read`, and delivers non-empty results to `on_new_data`.
    pub fn subscribe(&self, key: impl Into<String>, pacing: Option<Pacing>) {
        let key = key.into();
        if !self.inner.subscribed.insert(key.clone()) {
            return;
        }

        let pacing = pacing.unwrap_or_else(|| self.inner.config.time_step.clone());
        tracing::info!(key = %key, multi_thread = self.inner.config.multi_thread, "subscribing");

        let connection = self.clone();
        self.spawn("datalink-poll", async move {
            connection.poll_loop(key, pacing).await;
        });
    }

    /// Removes `key` from the subscribed set. The poller notices at its
    /// next iteration boundary, at most one pacing step later.
    pub fn unsubscribe(&self, key: &str) {
        self.inner.subscribed.remove(key);
    }

    /// Whether `key` is currently subscribed.
    #[must_use]
    pub fn is_subscribed(&self, key: &str) -> bool {
        self.inner.subscribed.contains(key)
    }

    // --- Supervision ---

    /// Starts the reconnect supervisor; a no-op when already running.
    ///
    /// At each pacing step the supervisor samples `is_open`, attempts
    /// `open()` while disconnected, and fires `on_connect` /
    /// `on_disconnect` on state edges -- exactly once per edge. After a
    /// connect edge it replays the store-and-forward buffer.
    pub fn supervise(&self, pacing: Option<Pacing>) {
        if self.inner.supervising.swap(true, Ordering::SeqCst) {
            return;
        }

        let pacing = pacing.unwrap_or_else(|| self.inner.config.time_step.clone());
        tracing::info!(
            client_id = %self.inner.config.client_id,
            "starting reconnect supervisor"
        );

        let connection = self.clone();
        self.spawn("datalink-supervisor", async move {
            connection.supervise_loop(pacing).await;
        });
    }

    /// Asks the supervisor to exit at its next iteration boundary.
    pub fn stop_supervising(&self) {
        self.inner.supervising.store(false, Ordering::SeqCst);
    }

    /// Whether the reconnect supervisor is running.
    #[must_use]
    pub fn is_supervising(&self) -> bool {
        self.inner.supervising.load(Ordering::SeqCst)
    }

    /// Stops the supervisor, drops all subscriptions, and closes the
    /// backend.
    ///
    /// # Errors
    ///
    /// Propagates the backend's close error.
    pub async fn close(&self) -> Result<(), Error> {
        self.stop_supervising();
        self.inner.subscribed.clear();
        self.inner.backend.close().await
    }

    // --- Internals ---

    fn normalize(
        &self,
        key: &str,
        records: impl IntoIterator<Item = Record>,
    ) -> Result<RecordSet, Error> {
        let mut set = match self.inner.config.models.get(key) {
            Some(model) => RecordSet::with_model(model.clone()),
            None => RecordSet::new(),
        };
        set.update(records)?;
        Ok(set)
    }

    async fn try_read(&self, key: &str, options: &ReadOptions) -> Result<RecordSet, Error> {
        self.ensure_open().await?;

        let read = self.inner.backend.read(key, options);
        let records = match self.inner.config.read_timeout {
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .map_err(|_| Error::ReadingTimeout)??,
            None => read.await?,
        };

        let records = records
            .ok_or_else(|| Error::InvalidKey(format!("reading '{key}' returned no result")))?;
        RecordSet::from_records(records)
    }

    async fn dispatch_write(&self, key: &str, records: &[Record]) -> Result<(), Error> {
        self.ensure_open().await?;

        let _gate = self.inner.write_gate.lock().await;
        let write = async {
            match &self.inner.buffer {
                Some(buffer) => {
                    buffer
                        .add_and_flush(self.inner.backend.as_ref(), key, records)
                        .await
                }
                None => self.inner.backend.write(key, records).await,
            }
        };

        match self.inner.config.write_timeout {
            Some(limit) => tokio::time::timeout(limit, write)
                .await
                .map_err(|_| Error::WritingTimeout)?,
            None => write.await,
        }
    }

    async fn ensure_open(&self) -> Result<(), Error> {
        if self.inner.backend.is_open().await {
            return Ok(());
        }
        self.open_with_timeout().await
    }

    async fn open_with_timeout(&self) -> Result<(), Error> {
        let open = self.inner.backend.open();
        match self.inner.config.open_timeout {
            Some(limit) => tokio::time::timeout(limit, open)
                .await
                .map_err(|_| Error::OpeningTimeout)?,
            None => open.await,
        }
    }

    async fn poll_loop(self, key: String, pacing: Pacing) {
        let mut pacer = StepPacer::new(pacing);
        loop {
            pacer.wait_async().await;
            if !self.inner.subscribed.contains(&key) {
                tracing::info!(key = %key, "subscription removed, poller exiting");
                break;
            }

            let Some(data) = self.safe_read(&key, ReadOptions::default()).await else {
                continue;
            };
            if data.is_empty() {
                continue;
            }

            if let Err(error) = guard_callback("on_new_data", || {
                self.inner.events.on_new_data(&key, &data);
            }) {
                // A failing consumer implicitly unsubscribes its key.
                self.inner.subscribed.remove(&key);
                self.report(ErrorReport::new(error).with_key(&key));
                break;
            }
        }
    }

    async fn supervise_loop(self, pacing: Pacing) {
        let mut pacer = StepPacer::new(pacing);
        let mut connected = false;

        loop {
            pacer.wait_async().await;
            if !self.inner.supervising.load(Ordering::SeqCst) {
                tracing::info!("reconnect supervisor stopping");
                break;
            }

            let mut current = self.inner.backend.is_open().await;
            if !current {
                match self.open_with_timeout().await {
                    Ok(()) => current = true,
                    Err(error) => {
                        self.report(ErrorReport::new(error));
                        current = false;
                    }
                }
            }

            if current && !connected {
                tracing::info!("connected");
                if let Err(error) = guard_callback("on_connect", || self.inner.events.on_connect())
                {
                    self.report(ErrorReport::new(error));
                }
                self.flush_buffer().await;
            } else if !current && connected {
                tracing::info!("disconnected");
                if let Err(error) =
                    guard_callback("on_disconnect", || self.inner.events.on_disconnect())
                {
                    self.report(ErrorReport::new(error));
                }
            }

            connected = current;
        }
    }

    async fn flush_buffer(&self) {
        let Some(buffer) = &self.inner.buffer else {
            return;
        };
        let _gate = self.inner.write_gate.lock().await;
        for report in buffer.flush_all(self.inner.backend.as_ref()).await {
            self.report(report);
        }
    }

    fn spawn<F>(&self, name: &str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.inner.config.multi_thread {
            BackgroundRuntime::block_on_dedicated_thread(name, task);
        } else {
            BackgroundRuntime::global().run_on_background(task);
        }
    }

    fn report(&self, report: ErrorReport) {
        let report = report.with_client_id(self.inner.config.client_id.clone());
        tracing::warn!(error = %report.title(), "connection error");
        if guard_callback("on_error", || self.inner.events.on_error(&report)).is_err() {
            // Nothing further to escalate to.
            tracing::error!("on_error callback panicked");
        }
    }
}

/// Runs a user callback, converting a panic into an [`Error`] so loops and
/// supervisors survive misbehaving consumers.
fn guard_callback(label: &str, f: impl FnOnce()) -> Result<(), Error> {
    std::panic::catch_unwind(AssertUnwindSafe(f)).map_err(|panic| {
        let message = panic
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "opaque panic".to_string());
        Error::Other(anyhow::anyhow!("{label} callback panicked: {message}"))
    })
}
