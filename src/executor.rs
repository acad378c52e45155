//! Bounded worker pool for emitter background work
//!
//! Owned by the emitter instance rather than shared process-wide, so
//! independent emitters (and tests) never contend on a global pool. Tasks
//! run on the tokio runtime; the pool bounds how many run at once and
//! tracks fire-and-forget tasks so shutdown can wait for them.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Bounded pool of concurrent background tasks
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    tracked: Mutex<Vec<JoinHandle<()>>>,
    accepting: AtomicBool,
    size: usize,
}

impl WorkerPool {
    /// Create a pool running at most `size` tasks at once
    ///
    /// Sizes below 2 are clamped up: the emission loop occupies one slot
    /// while it awaits request sends occupying others.
    pub fn new(size: usize) -> Self {
        let size = size.max(crate::config::MIN_POOL_SIZE);
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            tracked: Mutex::new(Vec::new()),
            accepting: AtomicBool::new(true),
            size,
        }
    }

    /// Configured concurrency bound
    pub fn size(&self) -> usize {
        self.size
    }

    /// Run a fire-and-forget task, tracked until shutdown
    ///
    /// Returns `false` without spawning when the pool has stopped
    /// accepting work.
    pub fn spawn<F>(&self, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !self.accepting.load(Ordering::Acquire) {
            debug!("worker pool shutting down, task rejected");
            return false;
        }
        let semaphore = Arc::clone(&self.semaphore);
        let handle = tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            fut.await;
        });
        let mut tracked = self.tracked.lock();
        tracked.retain(|h| !h.is_finished());
        tracked.push(handle);
        true
    }

    /// Run a result-bearing task; the caller awaits the returned handle
    ///
    /// Returns `None` when the pool has stopped accepting work.
    pub fn submit<F, T>(&self, fut: F) -> Option<JoinHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if !self.accepting.load(Ordering::Acquire) {
            return None;
        }
        let semaphore = Arc::clone(&self.semaphore);
        Some(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            fut.await
        }))
    }

    /// Stop accepting work and wait for tracked tasks to finish
    ///
    /// Tasks still running when `timeout` elapses are aborted. Returns
    /// whether everything finished cleanly within the timeout.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.accepting.store(false, Ordering::Release);

        let handles: Vec<JoinHandle<()>> = {
            let mut tracked = self.tracked.lock();
            tracked.drain(..).collect()
        };
        if handles.is_empty() {
            return true;
        }

        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        match tokio::time::timeout(timeout, futures::future::join_all(handles)).await {
            Ok(results) => {
                let mut clean = true;
                for result in results {
                    if let Err(e) = result {
                        if e.is_panic() {
                            error!(error = %e, "worker task panicked");
                            clean = false;
                        }
                    }
                }
                clean
            }
            Err(_) => {
                for abort in aborts {
                    abort.abort();
                }
                error!(?timeout, "worker pool shutdown timed out, tasks aborted");
                false
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_spawn_runs_task() {
        let pool = WorkerPool::new(2);
        let ran = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&ran);
        assert!(pool.spawn(async move {
            flag.store(true, Ordering::SeqCst);
        }));

        assert!(pool.shutdown(Duration::from_secs(1)).await);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_submit_returns_result() {
        let pool = WorkerPool::new(2);
        let handle = pool.submit(async { 41 + 1 }).unwrap();
        assert_eq!(handle.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = Arc::new(WorkerPool::new(2));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let handle = pool
                .submit(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .unwrap();
            handles.push(handle);
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2, "pool must bound concurrency");
    }

    #[tokio::test]
    async fn test_pool_size_clamped_to_minimum() {
        assert_eq!(WorkerPool::new(0).size(), 2);
        assert_eq!(WorkerPool::new(1).size(), 2);
        assert_eq!(WorkerPool::new(4).size(), 4);
    }

    #[tokio::test]
    async fn test_rejects_work_after_shutdown() {
        let pool = WorkerPool::new(2);
        assert!(pool.shutdown(Duration::from_millis(100)).await);

        assert!(!pool.spawn(async {}));
        assert!(pool.submit(async { 1 }).is_none());
    }

    #[tokio::test]
    async fn test_shutdown_times_out_on_stuck_task() {
        let pool = WorkerPool::new(2);
        pool.spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let clean = pool.shutdown(Duration::from_millis(50)).await;
        assert!(!clean, "stuck task should force an unclean shutdown");
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_inflight_task() {
        let pool = WorkerPool::new(2);
        let done = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&done);
        pool.spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            flag.store(true, Ordering::SeqCst);
        });

        assert!(pool.shutdown(Duration::from_secs(1)).await);
        assert!(done.load(Ordering::SeqCst));
    }
}
