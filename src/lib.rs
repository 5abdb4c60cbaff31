//! keyword_relay: two-tier keyword distribution.
//!
//! Keywords are bulk-imported from spreadsheets into a durable SQLite store,
//! moved in batches into a fast queue tier (a Redis list), and served one
//! per request to concurrent pollers. Every served keyword is marked read in
//! the store so it is not delivered again.

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod importer;
pub mod metrics;
pub mod queue;
pub mod scheduler;
pub mod server;
pub mod storage;

pub use config::RelayConfig;
pub use dispatch::{DispatchOutcome, DispatchService, DispatchSource};
pub use error::{ConfigError, DispatchError, ImportError, RefillError};
pub use importer::{BulkImporter, ImportReport, SheetOutcome, UploadedFile};
pub use queue::{build_queue, FastQueue, MemoryQueue, QueueBackend, QueueError, RedisQueue};
pub use scheduler::{PeriodicRefill, RefillReport, RefillScheduler};
pub use storage::{KeywordRecord, KeywordStore, StoreError, StoreStats};
