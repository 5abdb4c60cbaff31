//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by keyword_relay and
//! provides functions for initializing, registering, and exporting them.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all keyword_relay metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Dispatch calls, labeled by where the keyword came from
/// (`queue`, `store`, `direct`, `empty`, `error`).
pub static DISPATCH_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Dispatch latency in seconds.
pub static DISPATCH_LATENCY: OnceLock<Histogram> = OnceLock::new();

/// Keywords pushed to the fast tier by refill runs.
pub static REFILL_PUSHED_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Refill runs, labeled by outcome.
pub static REFILL_RUNS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Imported rows, labeled by sheet outcome (`committed` or `rolled_back`).
pub static IMPORT_ROWS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Imported sheets, labeled by outcome.
pub static IMPORT_SHEETS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Last observed fast-tier length.
pub static QUEUE_DEPTH: OnceLock<Gauge> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Later calls build a fresh registry that is then
/// discarded, so they are harmless.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    // Dispatch
    let dispatch_total = CounterVec::new(
        Opts::new("keyword_relay_dispatch_total", "Dispatch calls by keyword source"),
        &["source"],
    )?;

    let dispatch_latency = Histogram::with_opts(
        HistogramOpts::new(
            "keyword_relay_dispatch_latency_seconds",
            "Dispatch latency in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
    )?;

    // Refill
    let refill_pushed_total = Counter::new(
        "keyword_relay_refill_pushed_total",
        "Keywords pushed to the fast tier by refill",
    )?;

    let refill_runs_total = CounterVec::new(
        Opts::new("keyword_relay_refill_runs_total", "Refill runs by outcome"),
        &["status"],
    )?;

    // Import
    let import_rows_total = CounterVec::new(
        Opts::new("keyword_relay_import_rows_total", "Imported keyword rows"),
        &["status"],
    )?;

    let import_sheets_total = CounterVec::new(
        Opts::new("keyword_relay_import_sheets_total", "Imported sheets by outcome"),
        &["status"],
    )?;

    let queue_depth = Gauge::new(
        "keyword_relay_queue_depth",
        "Last observed number of keywords in the fast tier",
    )?;

    registry.register(Box::new(dispatch_total.clone()))?;
    registry.register(Box::new(dispatch_latency.clone()))?;
    registry.register(Box::new(refill_pushed_total.clone()))?;
    registry.register(Box::new(refill_runs_total.clone()))?;
    registry.register(Box::new(import_rows_total.clone()))?;
    registry.register(Box::new(import_sheets_total.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = DISPATCH_TOTAL.set(dispatch_total);
    let _ = DISPATCH_LATENCY.set(dispatch_latency);
    let _ = REFILL_PUSHED_TOTAL.set(refill_pushed_total);
    let _ = REFILL_RUNS_TOTAL.set(refill_runs_total);
    let _ = IMPORT_ROWS_TOTAL.set(import_rows_total);
    let _ = IMPORT_SHEETS_TOTAL.set(import_sheets_total);
    let _ = QUEUE_DEPTH.set(queue_depth);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead when the registry has not been
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

/// HTTP handler for the /metrics endpoint.
pub async fn metrics_handler() -> String {
    export_metrics()
}
