//! The background task runtime.
//!
//! One process-wide, lazily-started executor drives every cooperative
//! background task (reconnect supervisors, subscription pollers, detached
//! writes): a current-thread tokio runtime owned by a single dedicated
//! worker thread. Tasks submitted to it interleave only at suspension
//! points (pacing waits, storage and backend I/O).
//!
//! Connections configured `multi_thread` bypass the shared executor and
//! run each task on its own detached OS thread instead, in parallel.

use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::Handle;

/// Handle to the process-wide cooperative background executor.
pub struct BackgroundRuntime {
    handle: Handle,
}

impl BackgroundRuntime {
    /// The shared executor, started on first use.
    pub fn global() -> &'static BackgroundRuntime {
        static GLOBAL: OnceLock<BackgroundRuntime> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .thread_name("datalink-background")
                .build()
                .expect("background runtime must build");
            let handle = runtime.handle().clone();

            tracing::info!("starting background executor thread");
            std::thread::Builder::new()
                .name("datalink-background".to_string())
                .spawn(move || {
                    // Park forever: block_on drives every spawned task.
                    runtime.block_on(std::future::pending::<()>());
                })
                .expect("background executor thread must spawn");

            BackgroundRuntime { handle }
        })
    }

    /// Submits a cooperative task onto the shared background executor.
    ///
    /// The task runs on the executor's dedicated worker, never on the
    /// caller's thread; between its suspension points no other background
    /// task runs.
    pub fn run_on_background<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // The task is detached; completion is observed through its own
        // side effects (callbacks, storage), never by joining.
        let _task = self.handle.spawn(task);
    }

    /// Runs `f` on a fresh, detached OS thread.
    pub fn run_on_thread<F>(name: &str, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Err(e) = std::thread::Builder::new().name(name.to_string()).spawn(f) {
            tracing::error!("could not spawn worker thread '{name}': {e}");
        }
    }

    /// Runs a future to completion on a fresh, detached OS thread with its
    /// own single-thread runtime. This is the `multi_thread` execution
    /// mode: tasks started this way run in parallel with each other and
    /// with the shared executor.
    pub fn block_on_dedicated_thread<F>(name: &str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self::run_on_thread(name, move || {
            match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime.block_on(task),
                Err(e) => tracing::error!("could not build worker runtime: {e}"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn background_tasks_run_off_the_caller_thread() {
        let caller = std::thread::current().id();
        let (tx, rx) = std::sync::mpsc::channel();

        BackgroundRuntime::global().run_on_background(async move {
            let _ = tx.send(std::thread::current().id());
        });

        let worker = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_ne!(worker, caller);
    }

    #[test]
    fn background_tasks_share_one_worker() {
        let (tx, rx) = std::sync::mpsc::channel();

        for _ in 0..4 {
            let tx = tx.clone();
            BackgroundRuntime::global().run_on_background(async move {
                let _ = tx.send(std::thread::current().id());
            });
        }

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        for _ in 0..3 {
            assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), first);
        }
    }

    #[test]
    fn background_tasks_interleave_at_suspension_points() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = std::sync::mpsc::channel();

        for _ in 0..2 {
            let counter = counter.clone();
            let tx = tx.clone();
            BackgroundRuntime::global().run_on_background(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                let _ = tx.send(counter.load(Ordering::SeqCst));
            });
        }

        // Both tasks passed their first section before either resumed:
        // the sleep suspended task one and let task two run.
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 2);
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 2);
    }

    #[test]
    fn dedicated_threads_run_in_parallel() {
        let (tx, rx) = std::sync::mpsc::channel();

        for i in 0..2 {
            let tx = tx.clone();
            BackgroundRuntime::block_on_dedicated_thread(&format!("test-worker-{i}"), async move {
                let _ = tx.send(std::thread::current().id());
            });
        }

        let a = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let b = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_ne!(a, b);
    }
}
