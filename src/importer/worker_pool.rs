//! Bounded pool of sheet workers.
//!
//! Each item runs as its own tokio task, gated by a semaphore so no more
//! than `max_workers` are in flight. Results come back in input order. A
//! panicking worker is reported as a failed item; its siblings keep going.
//!
//! On a current-thread runtime, or with a single worker, items run one
//! after another on the caller's task instead.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::Semaphore;
use tracing::{debug, error};

/// Default number of concurrent sheet workers.
pub const DEFAULT_IMPORT_WORKERS: usize = 4;

/// Execution strategy picked for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolMode {
    Concurrent,
    Sequential,
}

/// Statistics about a pool run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub items_completed: u64,
    pub items_panicked: u64,
    /// Highest number of items observed running at once.
    pub peak_active: u64,
}

#[derive(Default)]
struct SharedPoolStats {
    items_completed: AtomicU64,
    items_panicked: AtomicU64,
    active: AtomicU64,
    peak_active: AtomicU64,
}

impl SharedPoolStats {
    fn enter(self: &Arc<Self>) -> ActiveGuard {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now, Ordering::SeqCst);
        ActiveGuard(Arc::clone(self))
    }

    fn to_pool_stats(&self) -> PoolStats {
        PoolStats {
            items_completed: self.items_completed.load(Ordering::SeqCst),
            items_panicked: self.items_panicked.load(Ordering::SeqCst),
            peak_active: self.peak_active.load(Ordering::SeqCst),
        }
    }
}

/// Decrements the active count when a worker finishes or unwinds.
struct ActiveGuard(Arc<SharedPoolStats>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Worker pool with a hard concurrency cap.
pub struct SheetWorkerPool {
    max_workers: usize,
    stats: Arc<SharedPoolStats>,
}

impl SheetWorkerPool {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            stats: Arc::new(SharedPoolStats::default()),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Strategy that [`run`](Self::run) will use on the current runtime.
    pub fn mode(&self) -> PoolMode {
        let multi_thread = Handle::try_current()
            .map(|h| h.runtime_flavor() == RuntimeFlavor::MultiThread)
            .unwrap_or(false);

        if self.max_workers > 1 && multi_thread {
            PoolMode::Concurrent
        } else {
            PoolMode::Sequential
        }
    }

    /// Returns statistics accumulated across runs.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats()
    }

    /// Runs `work` over every item and returns the outputs in input order.
    ///
    /// `Err` carries the panic message of a worker that did not finish.
    pub async fn run<T, F, Fut>(&self, items: Vec<T>, work: F) -> Vec<Result<Fut::Output, String>>
    where
        T: Send + 'static,
        F: Fn(T) -> Fut,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        match self.mode() {
            PoolMode::Sequential => {
                debug!(items = items.len(), "Running sheet workers sequentially");
                let mut results = Vec::with_capacity(items.len());
                for item in items {
                    let guard = self.stats.enter();
                    let output = work(item).await;
                    drop(guard);
                    self.stats.items_completed.fetch_add(1, Ordering::SeqCst);
                    results.push(Ok(output));
                }
                results
            }
            PoolMode::Concurrent => self.run_concurrent(items, work).await,
        }
    }

    async fn run_concurrent<T, F, Fut>(
        &self,
        items: Vec<T>,
        work: F,
    ) -> Vec<Result<Fut::Output, String>>
    where
        T: Send + 'static,
        F: Fn(T) -> Fut,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        debug!(
            items = items.len(),
            max_workers = self.max_workers,
            "Running sheet workers concurrently"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut handles = Vec::with_capacity(items.len());

        for item in items {
            // Taking the permit before spawning keeps at most max_workers
            // tasks alive; the semaphore is never closed.
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    handles.push(Err(e.to_string()));
                    continue;
                }
            };

            let fut = work(item);
            let stats = Arc::clone(&self.stats);
            handles.push(Ok(tokio::spawn(async move {
                let _active = stats.enter();
                let _permit = permit;
                fut.await
            })));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            let result = match handle {
                Ok(handle) => match handle.await {
                    Ok(output) => {
                        self.stats.items_completed.fetch_add(1, Ordering::SeqCst);
                        Ok(output)
                    }
                    Err(e) => {
                        self.stats.items_panicked.fetch_add(1, Ordering::SeqCst);
                        error!(error = %e, "Sheet worker task failed");
                        Err(e.to_string())
                    }
                },
                Err(message) => Err(message),
            };
            results.push(result);
        }
        results
    }
}

impl Default for SheetWorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_IMPORT_WORKERS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_is_capped() {
        let pool = SheetWorkerPool::new(3);
        assert_eq!(pool.mode(), PoolMode::Concurrent);

        let results = pool
            .run((0..12).collect::<Vec<u32>>(), |i| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                i * 2
            })
            .await;

        let outputs: Vec<u32> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(outputs, (0..12).map(|i| i * 2).collect::<Vec<_>>());

        let stats = pool.stats();
        assert_eq!(stats.items_completed, 12);
        assert!(stats.peak_active <= 3);
        assert!(stats.peak_active >= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panicking_worker_does_not_abort_siblings() {
        let pool = SheetWorkerPool::new(2);

        let results = pool
            .run(vec![1u32, 2, 3], |i| async move {
                if i == 2 {
                    panic!("sheet exploded");
                }
                i
            })
            .await;

        assert_eq!(results[0].as_ref().unwrap(), &1);
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap(), &3);
        assert_eq!(pool.stats().items_panicked, 1);
    }

    #[tokio::test]
    async fn test_current_thread_runtime_runs_sequentially() {
        let pool = SheetWorkerPool::new(4);
        assert_eq!(pool.mode(), PoolMode::Sequential);

        let results = pool
            .run(vec!["a", "b"], |s| async move { s.to_uppercase() })
            .await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].as_deref().unwrap(), "B");
        assert_eq!(pool.stats().peak_active, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_single_worker_is_sequential() {
        let pool = SheetWorkerPool::new(1);
        assert_eq!(pool.mode(), PoolMode::Sequential);
    }
}
