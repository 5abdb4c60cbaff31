//! Error types for keyword-relay operations.
//!
//! Storage and fast-tier errors live next to their clients
//! ([`crate::storage::StoreError`], [`crate::queue::QueueError`]); this
//! module holds the errors of the components composed on top of them:
//! - Configuration loading
//! - Bulk import
//! - Refill runs
//! - Dispatch

use std::path::PathBuf;

use thiserror::Error;

use crate::queue::QueueError;
use crate::scheduler::RefillReport;
use crate::storage::StoreError;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors that can occur during a bulk import.
///
/// File-level variants abort the import before the store is touched;
/// sheet-level failures are reported per sheet instead.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Unsupported file type '.{extension}' for '{file}': expected .xlsx, .xls or .csv")]
    UnsupportedFormat { file: String, extension: String },

    #[error("Failed to read workbook '{file}': {message}")]
    Workbook { file: String, message: String },

    #[error("Failed to read sheet '{sheet}': {message}")]
    Sheet { sheet: String, message: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Import worker for sheet '{sheet}' failed: {message}")]
    Worker { sheet: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that stop a refill run. Each carries the progress made before
/// the failure; batches already pushed and marked stay that way.
#[derive(Debug, Error)]
pub enum RefillError {
    #[error("Refill batch {batch}: fetching unread keywords failed: {source}")]
    Fetch {
        batch: usize,
        #[source]
        source: StoreError,
        completed: RefillReport,
    },

    #[error("Refill batch {batch}: pushing to the fast tier failed: {source}")]
    Push {
        batch: usize,
        #[source]
        source: QueueError,
        completed: RefillReport,
    },

    #[error("Refill batch {batch}: marking keywords read failed: {source}")]
    Mark {
        batch: usize,
        #[source]
        source: StoreError,
        completed: RefillReport,
    },
}

impl RefillError {
    /// Progress made before the run stopped.
    pub fn completed(&self) -> &RefillReport {
        match self {
            RefillError::Fetch { completed, .. }
            | RefillError::Push { completed, .. }
            | RefillError::Mark { completed, .. } => completed,
        }
    }
}

/// Errors surfaced by the dispatch service.
///
/// Fast-tier failures never appear here; they are logged and bypassed.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("No keyword available: durable store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}
