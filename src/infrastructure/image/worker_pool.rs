//! Dedicated runtime running fetches off the calling thread.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::infrastructure::config::{APP_NAME, PoolConfig};

/// Multi-thread tokio runtime owned by one loader.
///
/// Async work runs on `core_threads` workers; decoding runs on the blocking
/// pool, capped at `max_threads` and reaped after `keep_alive`.
pub struct WorkerPool {
    runtime: Option<Runtime>,
    handle: Handle,
}

impl WorkerPool {
    /// Starts the pool.
    ///
    /// # Errors
    /// Returns an error if the runtime threads cannot be spawned.
    pub fn new(config: &PoolConfig) -> io::Result<Self> {
        let counter = Arc::new(AtomicUsize::new(1));
        let core = config.effective_core_threads();
        let max = config.effective_max_threads();

        let runtime = Builder::new_multi_thread()
            .worker_threads(core)
            .max_blocking_threads(max)
            .thread_keep_alive(config.keep_alive())
            .thread_name_fn(move || {
                format!("{APP_NAME}-worker#{}", counter.fetch_add(1, Ordering::Relaxed))
            })
            .enable_all()
            .build()?;

        debug!(core, max, keep_alive = ?config.keep_alive(), "Worker pool started");

        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
        })
    }

    /// Returns a handle to the pool's runtime.
    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Spawns `future` on the pool.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Runs `future` to completion on the pool, blocking the caller.
    ///
    /// Must not be called from inside an async runtime.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }

    /// Stops the pool, waiting up to `timeout` for running tasks.
    ///
    /// Must not be called from inside an async runtime.
    pub fn shutdown(mut self, timeout: Duration) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(timeout);
            debug!("Worker pool stopped");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("running", &self.runtime.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_pool() -> WorkerPool {
        WorkerPool::new(&PoolConfig {
            core_threads: Some(2),
            max_threads: Some(3),
            keep_alive_secs: 1,
        })
        .unwrap()
    }

    #[test]
    fn test_workers_are_named() {
        let pool = small_pool();
        let name = pool
            .block_on(pool.spawn(async {
                std::thread::current().name().map(String::from)
            }))
            .unwrap();

        assert!(name.unwrap().starts_with("pixfetch-worker#"));
        pool.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_blocking_work_runs_on_pool() {
        let pool = small_pool();
        let sum = pool
            .block_on(pool.handle().spawn_blocking(|| (0..10u32).sum::<u32>()))
            .unwrap();
        assert_eq!(sum, 45);
    }

    #[tokio::test]
    async fn test_drop_inside_async_context() {
        let pool = small_pool();
        let value = pool.spawn(async { 21 * 2 }).await.unwrap();
        assert_eq!(value, 42);
        drop(pool);
    }
}
