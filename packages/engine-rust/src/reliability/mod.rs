//! Reliability helpers layered between the connection and its backend.
//!
//! - [`StoreAndForward`]: a durable write buffer that survives transient
//!   backend failures and replays on reconnect
//! - [`ReportByException`]: per-key record diffing that suppresses writes
//!   of unchanged fields

pub mod report_by_exception;
pub mod store_and_forward;

pub use report_by_exception::ReportByException;
pub use store_and_forward::StoreAndForward;
