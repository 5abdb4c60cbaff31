//! Batch refill of the fast tier from the durable store.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::RefillError;
use crate::metrics::MetricsCollector;
use crate::queue::FastQueue;
use crate::storage::KeywordStore;

/// Default rows fetched per refill batch.
pub const DEFAULT_REFILL_BATCH_SIZE: usize = 1000;

/// Default number of batches per refill run.
pub const DEFAULT_REFILL_BATCHES: usize = 10;

/// Progress of one refill run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefillReport {
    /// Batches fully pushed and marked.
    pub batches: usize,
    /// Unread rows fetched from the store.
    pub fetched: usize,
    /// Keywords pushed to the fast tier.
    pub pushed: usize,
    /// Rows this run flipped to read.
    pub marked: usize,
    /// Rows not pushed because the same text was already pushed this run.
    pub duplicates: usize,
}

/// Moves unread keywords into the fast tier, marking them read.
///
/// Each run starts by clearing the fast tier, then walks the unread rows
/// newest first. Within a batch the keywords are pushed before their ids are
/// marked, so a crash in between re-pushes them next run instead of losing
/// them.
///
/// Runs are not guarded against overlap; callers serialize them.
pub struct RefillScheduler {
    store: KeywordStore,
    queue: Arc<dyn FastQueue>,
    dedupe: bool,
    metrics: MetricsCollector,
}

impl RefillScheduler {
    pub fn new(store: KeywordStore, queue: Arc<dyn FastQueue>) -> Self {
        Self {
            store,
            queue,
            dedupe: true,
            metrics: MetricsCollector::new(),
        }
    }

    /// Enables or disables skipping repeated keyword text within a run.
    pub fn with_dedupe(mut self, dedupe: bool) -> Self {
        self.dedupe = dedupe;
        self
    }

    /// Runs one refill of up to `batch_size * batches` rows.
    ///
    /// # Errors
    ///
    /// Stops at the first failing fetch, push, or mark. The error carries the
    /// report of the batches completed before it.
    pub async fn refill(
        &self,
        batch_size: usize,
        batches: usize,
    ) -> Result<RefillReport, RefillError> {
        let started = Instant::now();
        info!(
            backend = self.queue.backend(),
            batch_size,
            batches,
            "Starting refill"
        );

        if let Err(e) = self.queue.clear().await {
            warn!(error = %e, "Failed to clear fast tier before refill, continuing");
        }

        let result = self.run_batches(batch_size, batches).await;
        self.finish(&result, started.elapsed()).await;
        result
    }

    async fn run_batches(
        &self,
        batch_size: usize,
        batches: usize,
    ) -> Result<RefillReport, RefillError> {
        let mut report = RefillReport::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut cursor: Option<i64> = None;

        if batch_size == 0 {
            return Ok(report);
        }

        for batch in 0..batches {
            let rows = match self.store.select_unread(batch_size, cursor).await {
                Ok(rows) => rows,
                Err(source) => {
                    return Err(RefillError::Fetch {
                        batch,
                        source,
                        completed: report,
                    })
                }
            };

            if rows.is_empty() {
                debug!(batch, "No unread keywords left, stopping early");
                break;
            }

            cursor = rows.last().map(|row| row.id);
            report.fetched += rows.len();

            let mut keywords = Vec::with_capacity(rows.len());
            let mut duplicates = 0;
            for row in &rows {
                let keyword = row.keyword.trim();
                if keyword.is_empty() {
                    continue;
                }
                if self.dedupe && !seen.insert(keyword.to_string()) {
                    duplicates += 1;
                    continue;
                }
                keywords.push(keyword.to_string());
            }

            if !keywords.is_empty() {
                if let Err(source) = self.queue.push_many(&keywords).await {
                    return Err(RefillError::Push {
                        batch,
                        source,
                        completed: report,
                    });
                }
            }

            let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
            let flipped = match self.store.mark_read(&ids).await {
                Ok(flipped) => flipped,
                Err(source) => {
                    report.pushed += keywords.len();
                    report.duplicates += duplicates;
                    return Err(RefillError::Mark {
                        batch,
                        source,
                        completed: report,
                    });
                }
            };

            report.batches += 1;
            report.pushed += keywords.len();
            report.duplicates += duplicates;
            report.marked += flipped.len();

            debug!(
                batch,
                fetched = rows.len(),
                pushed = keywords.len(),
                marked = flipped.len(),
                "Refill batch complete"
            );

            if rows.len() < batch_size {
                break;
            }
        }

        Ok(report)
    }

    async fn finish(&self, result: &Result<RefillReport, RefillError>, elapsed: Duration) {
        match result {
            Ok(report) => {
                self.metrics.record_refill(true, report.pushed);
                info!(
                    batches = report.batches,
                    fetched = report.fetched,
                    pushed = report.pushed,
                    marked = report.marked,
                    duplicates = report.duplicates,
                    duration_ms = elapsed.as_millis() as u64,
                    "Refill complete"
                );
            }
            Err(e) => {
                self.metrics.record_refill(false, e.completed().pushed);
                warn!(
                    error = %e,
                    batches = e.completed().batches,
                    pushed = e.completed().pushed,
                    "Refill stopped"
                );
            }
        }

        if let Ok(depth) = self.queue.len().await {
            self.metrics.update_queue_depth(depth);
        }
    }
}
