//! A small wrapper around a tokio `Handle`/`Runtime`.
//!
//! Every long-lived background task in this crate graph (a pool's task-queue task, its response
//! task, a worker's dispatch loop) is spawned through an `Executor` rather than a bare
//! `tokio::spawn`, so that the controller can own one runtime and hand out cheap clones of it.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::{JoinError, JoinHandle};

/// Executors come in two flavors:
/// * "borrowed"
///     * Created with `Executor::new()` or `self.to_borrowed()`.
///     * Will not be shut down when all handles are dropped, and `shutdown` has no effect.
///     * Used when multiple components share a single runtime owned by `main`.
/// * "owned"
///     * Created with `Executor::new_owned()`.
///     * When all handles of an owned `Executor` are dropped, its `Runtime` is shut down.
///       The explicit `shutdown` method can also be used to shut it down for all clones.
#[derive(Clone)]
pub struct Executor {
    runtime: Arc<Mutex<Option<Runtime>>>,
    handle: Handle,
}

impl Executor {
    /// Creates an Executor that borrows the ambient tokio Runtime (e.g. inside `#[tokio::main]`).
    pub fn new() -> Executor {
        Self {
            runtime: Arc::new(Mutex::new(None)),
            handle: Handle::current(),
        }
    }

    /// Creates an Executor that owns a freshly constructed multi-thread Runtime.
    pub fn new_owned(num_worker_threads: usize) -> Result<Executor, String> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(num_worker_threads)
            .enable_all()
            .build()
            .map_err(|e| format!("Failed to start the runtime: {e}"))?;

        let handle = runtime.handle().clone();
        Ok(Executor {
            runtime: Arc::new(Mutex::new(Some(runtime))),
            handle,
        })
    }

    /// Creates a clone of this Executor which is disconnected from shutdown events.
    pub fn to_borrowed(&self) -> Executor {
        Self {
            runtime: Arc::new(Mutex::new(None)),
            handle: self.handle.clone(),
        }
    }

    /// Run a Future on this executor's Runtime as a new Task, and return a Future handle to it.
    ///
    /// If the background Task panics, the given closure converts the resulting JoinError to the
    /// output type (standing in for the "this never escapes the process" guarantee we want at
    /// call sites).
    pub fn spawn<O: Send + 'static, F: Future<Output = O> + Send + 'static>(
        &self,
        future: F,
        rescue_join_error: impl FnOnce(JoinError) -> O,
    ) -> impl Future<Output = O> {
        self.native_spawn(future).map(|res| match res {
            Ok(o) => o,
            Err(e) => rescue_join_error(e),
        })
    }

    /// Run a Future on this executor's Runtime as a new Task, and return a JoinHandle.
    pub fn native_spawn<O: Send + 'static, F: Future<Output = O> + Send + 'static>(
        &self,
        future: F,
    ) -> JoinHandle<O> {
        self.handle.spawn(future)
    }

    /// Run a Future and return its resolved Result.
    ///
    /// Should only ever be called from something that resembles a main method, never from within
    /// a Future context.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }

    /// Spawn a blocking closure on the threadpool reserved for long-running I/O.
    pub fn spawn_blocking<F: FnOnce() -> R + Send + 'static, R: Send + 'static>(
        &self,
        f: F,
        rescue_join_error: impl FnOnce(JoinError) -> R,
    ) -> impl Future<Output = R> {
        self.native_spawn_blocking(f).map(|res| match res {
            Ok(o) => o,
            Err(e) => rescue_join_error(e),
        })
    }

    /// Spawn a blocking closure on the threadpool reserved for long-running I/O, returning a
    /// JoinHandle.
    pub fn native_spawn_blocking<F: FnOnce() -> R + Send + 'static, R: Send + 'static>(
        &self,
        f: F,
    ) -> JoinHandle<R> {
        self.handle.spawn_blocking(f)
    }

    /// A reference to this executor's runtime handle.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// A blocking call to shut down the Runtime associated with this "owned" Executor. Tasks that
    /// do not complete within `timeout` are leaked.
    ///
    /// Has no effect for "borrowed" Executors.
    pub fn shutdown(&self, timeout: Duration) {
        let Some(runtime) = self.runtime.lock().take() else {
            return;
        };

        let start = Instant::now();
        runtime.shutdown_timeout(timeout);
        if start.elapsed() > timeout {
            log::warn!("Executor shutdown took unexpectedly long: tasks were likely leaked!");
        }
    }
}

impl Default for Executor {
    fn default() -> Self {
        // NB: unlike `new`, this does not require an ambient runtime: it's convenient for types
        // that want a `Default` bound but are always constructed with an explicit Executor in
        // practice.
        Executor::new_owned(1).expect("failed to create default executor")
    }
}

#[cfg(test)]
mod tests {
    use super::Executor;
    use std::time::Duration;

    #[test]
    fn owned_executor_runs_futures() {
        let executor = Executor::new_owned(2).unwrap();
        let result = executor.block_on(async { 1 + 1 });
        assert_eq!(result, 2);
        executor.shutdown(Duration::from_secs(1));
    }

    #[tokio::test]
    async fn borrowed_executor_spawns() {
        let executor = Executor::new();
        let handle = executor.spawn(async { 21 * 2 }, |_| 0);
        assert_eq!(handle.await, 42);
    }
}
