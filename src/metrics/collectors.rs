//! Recording helpers over the raw Prometheus metrics.
//!
//! Every method is a no-op until [`init_metrics`](super::init_metrics) has
//! run, so library code can record unconditionally.

use super::prometheus::{
    DISPATCH_LATENCY, DISPATCH_TOTAL, IMPORT_ROWS_TOTAL, IMPORT_SHEETS_TOTAL, QUEUE_DEPTH,
    REFILL_PUSHED_TOTAL, REFILL_RUNS_TOTAL,
};

/// Metrics collector for keyword_relay operations.
///
/// # Example
///
/// ```ignore
/// use keyword_relay::metrics::{init_metrics, MetricsCollector};
///
/// init_metrics().expect("Failed to init metrics");
/// let collector = MetricsCollector::new();
/// collector.record_dispatch("queue", 0.002);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record one dispatch call.
    ///
    /// `source` is one of `queue`, `store`, `direct`, `empty` or `error`.
    pub fn record_dispatch(&self, source: &str, latency_secs: f64) {
        if let Some(total) = DISPATCH_TOTAL.get() {
            total.with_label_values(&[source]).inc();
        }

        if let Some(latency) = DISPATCH_LATENCY.get() {
            latency.observe(latency_secs);
        }

        tracing::trace!(
            source = source,
            latency_secs = latency_secs,
            "Recorded dispatch metric"
        );
    }

    /// Record the end of a refill run.
    pub fn record_refill(&self, success: bool, pushed: usize) {
        let status = if success { "success" } else { "failure" };

        if let Some(runs) = REFILL_RUNS_TOTAL.get() {
            runs.with_label_values(&[status]).inc();
        }

        if let Some(counter) = REFILL_PUSHED_TOTAL.get() {
            counter.inc_by(pushed as f64);
        }

        tracing::trace!(status = status, pushed = pushed, "Recorded refill metric");
    }

    /// Record one imported sheet.
    pub fn record_import_sheet(&self, committed: bool, rows: u64) {
        let status = if committed { "committed" } else { "rolled_back" };

        if let Some(sheets) = IMPORT_SHEETS_TOTAL.get() {
            sheets.with_label_values(&[status]).inc();
        }

        if let Some(counter) = IMPORT_ROWS_TOTAL.get() {
            counter.with_label_values(&[status]).inc_by(rows as f64);
        }
    }

    /// Update the last observed fast-tier length.
    pub fn update_queue_depth(&self, depth: usize) {
        if let Some(queue_depth) = QUEUE_DEPTH.get() {
            queue_depth.set(depth as f64);
        }

        tracing::trace!(depth = depth, "Updated queue depth metric");
    }
}
