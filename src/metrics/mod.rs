//! Prometheus metrics for dispatch, refill and import.
//!
//! # Example
//!
//! ```ignore
//! use keyword_relay::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let collector = MetricsCollector::new();
//! collector.record_refill(true, 1000);
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use self::collectors::MetricsCollector;
pub use self::prometheus::{export_metrics, init_metrics, metrics_handler};

pub use self::prometheus::{
    DISPATCH_LATENCY, DISPATCH_TOTAL, IMPORT_ROWS_TOTAL, IMPORT_SHEETS_TOTAL, QUEUE_DEPTH,
    REFILL_PUSHED_TOTAL, REFILL_RUNS_TOTAL, REGISTRY,
};
