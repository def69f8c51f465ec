//! Datalink Engine -- the concurrency and reliability layer between user
//! code and backend drivers.
//!
//! User code addresses a backend through a [`Connection`] by symbolic key
//! and exchanges [`Record`](datalink_core::Record)s; the engine supplies:
//!
//! - **Safe operations** ([`connection`]): open-on-demand reads/writes with
//!   exactly-one error reporting
//! - **Store-and-forward** ([`reliability`]): a durable write buffer that
//!   replays on reconnect
//! - **Report-by-exception** ([`reliability`]): per-key diffing that
//!   suppresses unchanged fields
//! - **Local storage** ([`storage`]): pluggable persistence for buffers and
//!   diff state
//! - **Pacing** ([`pacing`]): drift-free periodic or cron-style stepping
//! - **Background runtime** ([`runtime`]): one shared cooperative executor
//!   plus detached OS threads for `multi_thread` connections
//! - **Namespace codec** ([`namespace`]): the topic/envelope surface shared
//!   with the MQTT namespace collaborator

pub mod connection;
pub mod namespace;
pub mod pacing;
pub mod reliability;
pub mod runtime;
pub mod storage;

pub use connection::backends::{MemoryBackend, RandomBackend};
#[cfg(feature = "sqlite")]
pub use connection::backends::SqliteBackend;
pub use connection::{
    Backend, Connection, ConnectionBuilder, ConnectionConfig, ConnectionEvents, NullEvents,
    ReadOptions,
};
pub use pacing::{Pacing, StepPacer};
pub use reliability::{ReportByException, StoreAndForward};
pub use runtime::BackgroundRuntime;
pub use storage::{
    build_storage, FileStorage, JsonStorage, LocalStorage, LocalStorageExt, MemoryStorage,
    StorageConfig,
};
