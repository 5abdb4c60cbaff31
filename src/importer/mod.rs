//! Bulk keyword import from spreadsheet uploads.
//!
//! An import is a full replace: the upload is validated, the keyword table
//! is truncated, then every sheet is loaded by its own worker with its own
//! connection and transaction.
//!
//! ```text
//!   upload ──► detect format ──► list sheets ──► truncate
//!                  │ (reject)        │ (reject)       │
//!                  ▼                 ▼                ▼
//!               error             error       ┌───────┴────────┐
//!                                             ▼                ▼
//!                                        worker 1  ...    worker N   (≤ import_workers)
//!                                        parse + tx       parse + tx
//!                                             └───────┬────────┘
//!                                                     ▼
//!                                               ImportReport
//! ```
//!
//! A failing sheet rolls back only its own transaction and is reported in
//! its [`SheetOutcome`]; sibling sheets still commit.

pub mod source;
pub mod worker_pool;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::ImportError;
use crate::metrics::MetricsCollector;
use crate::storage::KeywordStore;

pub use source::{FileFormat, SheetSpec, UploadedFile};
pub use worker_pool::{PoolMode, PoolStats, SheetWorkerPool, DEFAULT_IMPORT_WORKERS};

/// Result of importing one sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SheetOutcome {
    /// Sheet name, as written to the `type` column.
    pub sheet: String,
    /// Rows committed for this sheet (0 when `error` is set).
    pub inserted: u64,
    /// Why the sheet was rolled back, if it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SheetOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Summary of one import call.
#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub file: String,
    /// Rows removed by the initial truncate.
    pub truncated: u64,
    /// One entry per sheet, in workbook order.
    pub sheets: Vec<SheetOutcome>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl ImportReport {
    pub fn total_inserted(&self) -> u64 {
        self.sheets.iter().map(|s| s.inserted).sum()
    }

    pub fn failed_sheets(&self) -> impl Iterator<Item = &SheetOutcome> {
        self.sheets.iter().filter(|s| !s.is_success())
    }

    pub fn all_succeeded(&self) -> bool {
        self.sheets.iter().all(SheetOutcome::is_success)
    }
}

/// Loads spreadsheet uploads into the keyword store.
pub struct BulkImporter {
    store: KeywordStore,
    pool: SheetWorkerPool,
    metrics: MetricsCollector,
}

impl BulkImporter {
    /// Creates an importer running at most `workers` sheets at once.
    pub fn new(store: KeywordStore, workers: usize) -> Self {
        Self {
            store,
            pool: SheetWorkerPool::new(workers),
            metrics: MetricsCollector::new(),
        }
    }

    /// Pool statistics accumulated across imports.
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Imports an upload, replacing all existing keywords.
    ///
    /// # Errors
    ///
    /// File-level problems (unsupported extension, unreadable workbook) are
    /// returned before the store is modified. A failed truncate is returned
    /// as `ImportError::Store`. Sheet failures do not produce an `Err`; see
    /// [`ImportReport::sheets`].
    pub async fn import(&self, upload: &UploadedFile) -> Result<ImportReport, ImportError> {
        let started = Instant::now();
        let format = FileFormat::detect(&upload.original_name)?;

        let sheets = {
            let upload = upload.clone();
            tokio::task::spawn_blocking(move || source::list_sheets(&upload, format))
                .await
                .map_err(|e| ImportError::Worker {
                    sheet: "*".to_string(),
                    message: e.to_string(),
                })??
        };

        info!(
            file = %upload.original_name,
            format = ?format,
            sheets = sheets.len(),
            mode = ?self.pool.mode(),
            "Starting keyword import"
        );

        let truncated = self.store.truncate().await?;
        info!(rows = truncated, "Keyword table truncated for full import");

        let names: Vec<String> = sheets.iter().map(|s| s.kind.clone()).collect();
        let shared = Arc::new(upload.clone());
        let store = self.store.clone();

        let results = self
            .pool
            .run(sheets, move |sheet| {
                import_sheet(store.clone(), Arc::clone(&shared), sheet)
            })
            .await;

        let outcomes: Vec<SheetOutcome> = names
            .into_iter()
            .zip(results)
            .map(|(sheet, result)| match result {
                Ok(outcome) => outcome,
                Err(message) => SheetOutcome {
                    sheet,
                    inserted: 0,
                    error: Some(message),
                },
            })
            .collect();

        for outcome in &outcomes {
            self.metrics.record_import_sheet(outcome.is_success(), outcome.inserted);
        }

        let report = ImportReport {
            file: upload.original_name.clone(),
            truncated,
            sheets: outcomes,
            duration: started.elapsed(),
        };

        let failed = report.failed_sheets().count();
        if failed > 0 {
            warn!(
                file = %report.file,
                inserted = report.total_inserted(),
                failed_sheets = failed,
                "Keyword import finished with failed sheets"
            );
        } else {
            info!(
                file = %report.file,
                inserted = report.total_inserted(),
                sheets = report.sheets.len(),
                duration_ms = report.duration.as_millis() as u64,
                "Keyword import finished"
            );
        }

        Ok(report)
    }
}

/// Parses one sheet on the blocking pool, then inserts it in a single
/// transaction. The parsed rows are dropped before the next sheet starts
/// on this worker.
async fn import_sheet(
    store: KeywordStore,
    upload: Arc<UploadedFile>,
    sheet: SheetSpec,
) -> SheetOutcome {
    let started = Instant::now();
    let kind = sheet.kind.clone();

    let result: Result<u64, ImportError> = async {
        let path = upload.path.clone();
        let spec = sheet.clone();
        let keywords =
            tokio::task::spawn_blocking(move || source::read_sheet_keywords(&path, &spec))
                .await
                .map_err(|e| ImportError::Worker {
                    sheet: sheet.kind.clone(),
                    message: e.to_string(),
                })??;

        Ok(store.insert_sheet(&sheet.kind, &keywords).await?)
    }
    .await;

    match result {
        Ok(inserted) => {
            info!(
                sheet = %kind,
                inserted,
                duration_ms = started.elapsed().as_millis() as u64,
                "Sheet imported"
            );
            SheetOutcome {
                sheet: kind,
                inserted,
                error: None,
            }
        }
        Err(e) => {
            error!(sheet = %kind, error = %e, "Sheet import failed, transaction rolled back");
            SheetOutcome {
                sheet: kind,
                inserted: 0,
                error: Some(e.to_string()),
            }
        }
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}
