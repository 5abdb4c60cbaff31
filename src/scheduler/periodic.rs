//! In-process timer that runs refills on a fixed interval.
//!
//! One task owns the timer, so runs never overlap. Stopping sends a
//! broadcast signal and waits for an in-flight refill to finish.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use super::refill::RefillScheduler;

#[derive(Debug, Error)]
pub enum PeriodicError {
    #[error("Periodic refill is already running")]
    AlreadyRunning,

    #[error("Periodic refill is not running")]
    NotRunning,

    #[error("Refill interval must be greater than zero")]
    ZeroInterval,

    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Counters shared with the timer task.
#[derive(Debug, Default)]
struct RunCounters {
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Runs [`RefillScheduler::refill`] every `interval`.
pub struct PeriodicRefill {
    scheduler: Arc<RefillScheduler>,
    interval: Duration,
    batch_size: usize,
    batches: usize,
    run_immediately: bool,
    shutdown_timeout: Duration,
    shutdown_tx: broadcast::Sender<()>,
    handle: Option<JoinHandle<()>>,
    counters: Arc<RunCounters>,
}

impl PeriodicRefill {
    pub fn new(
        scheduler: Arc<RefillScheduler>,
        interval: Duration,
        batch_size: usize,
        batches: usize,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            scheduler,
            interval,
            batch_size,
            batches,
            run_immediately: false,
            shutdown_timeout: Duration::from_secs(60),
            shutdown_tx,
            handle: None,
            counters: Arc::new(RunCounters::default()),
        }
    }

    /// Runs the first refill at start instead of after one interval.
    pub fn with_run_immediately(mut self, run_immediately: bool) -> Self {
        self.run_immediately = run_immediately;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Completed runs as `(succeeded, failed)`.
    pub fn runs(&self) -> (u64, u64) {
        (
            self.counters.succeeded.load(Ordering::SeqCst),
            self.counters.failed.load(Ordering::SeqCst),
        )
    }

    /// Spawns the timer task.
    pub fn start(&mut self) -> Result<(), PeriodicError> {
        if self.handle.is_some() {
            return Err(PeriodicError::AlreadyRunning);
        }
        if self.interval.is_zero() {
            return Err(PeriodicError::ZeroInterval);
        }

        let scheduler = Arc::clone(&self.scheduler);
        let counters = Arc::clone(&self.counters);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let interval = self.interval;
        let (batch_size, batches) = (self.batch_size, self.batches);
        let first_tick = if self.run_immediately {
            tokio::time::Instant::now()
        } else {
            tokio::time::Instant::now() + interval
        };

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(first_tick, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Periodic refill received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        match scheduler.refill(batch_size, batches).await {
                            Ok(_) => {
                                counters.succeeded.fetch_add(1, Ordering::SeqCst);
                            }
                            Err(e) => {
                                counters.failed.fetch_add(1, Ordering::SeqCst);
                                error!(error = %e, "Scheduled refill failed");
                            }
                        }
                    }
                }
            }
        });

        self.handle = Some(handle);
        info!(interval_secs = interval.as_secs(), "Periodic refill started");
        Ok(())
    }

    /// Signals the timer task and waits for it to exit.
    pub async fn shutdown(&mut self) -> Result<(), PeriodicError> {
        let Some(handle) = self.handle.take() else {
            return Err(PeriodicError::NotRunning);
        };

        // Ignore send error - the task may have already stopped
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(self.shutdown_timeout, handle).await {
            Ok(Ok(())) => {
                info!("Periodic refill stopped");
                Ok(())
            }
            Ok(Err(e)) => {
                error!(error = %e, "Periodic refill task panicked");
                Ok(())
            }
            Err(_) => Err(PeriodicError::ShutdownTimeout(self.shutdown_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{FastQueue, MemoryQueue};
    use crate::storage::KeywordStore;

    async fn scheduler_with(
        words: &[&str],
    ) -> (tempfile::TempDir, KeywordStore, Arc<MemoryQueue>, Arc<RefillScheduler>) {
        let dir = tempfile::tempdir().unwrap();
        let store = KeywordStore::open(&dir.path().join("periodic.db")).await.unwrap();
        let words: Vec<String> = words.iter().map(|s| s.to_string()).collect();
        store.insert_sheet("t", &words).await.unwrap();
        let queue = Arc::new(MemoryQueue::new());
        let dyn_queue: Arc<dyn FastQueue> = queue.clone();
        let scheduler = Arc::new(RefillScheduler::new(store.clone(), dyn_queue));
        (dir, store, queue, scheduler)
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let (_dir, _store, _queue, scheduler) = scheduler_with(&[]).await;
        let mut periodic = PeriodicRefill::new(scheduler, Duration::ZERO, 10, 1);
        assert!(matches!(periodic.start(), Err(PeriodicError::ZeroInterval)));
    }

    #[tokio::test]
    async fn test_run_immediately_then_shutdown() {
        let (_dir, store, queue, scheduler) = scheduler_with(&["a", "b"]).await;
        let mut periodic = PeriodicRefill::new(scheduler, Duration::from_secs(3600), 10, 1)
            .with_run_immediately(true);

        periodic.start().unwrap();
        assert!(matches!(periodic.start(), Err(PeriodicError::AlreadyRunning)));

        for _ in 0..100 {
            if periodic.runs().0 >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        periodic.shutdown().await.unwrap();
        assert!(!periodic.is_running());
        assert_eq!(periodic.runs(), (1, 0));
        assert_eq!(queue.snapshot(), vec!["b", "a"]);
        assert_eq!(store.stats().await.unwrap().unread, 0);
    }

    #[tokio::test]
    async fn test_shutdown_before_first_tick() {
        let (_dir, store, _queue, scheduler) = scheduler_with(&["a"]).await;
        let mut periodic = PeriodicRefill::new(scheduler, Duration::from_secs(3600), 10, 1);

        periodic.start().unwrap();
        periodic.shutdown().await.unwrap();

        assert_eq!(periodic.runs(), (0, 0));
        assert_eq!(store.stats().await.unwrap().unread, 1);
        assert!(matches!(periodic.shutdown().await, Err(PeriodicError::NotRunning)));
    }
}
