//! Streaming import/export pipeline
//!
//! Decodes uploads row by row, validates in fixed-size batches, persists
//! accepted records through the store, and keeps the job registry current.
//! Exports run the other way: a store cursor is serialised row by row into
//! a response stream or a server-side file.
//!
//! Memory stays bounded by the batch size on the import side and by the
//! flush interval on the export side, independent of payload size.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::jobs::JobRegistry;
use crate::models::{ImportFormat, ResourceKind};
use crate::store::{DynStore, StoreError};

pub mod export;
pub mod import;

/// Records accumulated before a batch is validated and persisted
pub const BATCH_SIZE: usize = 1000;

/// Streaming exports emit one response frame per this many rows
pub const EXPORT_FLUSH_EVERY: usize = 100;

/// File exports report progress every this many rows
pub const EXPORT_PROGRESS_EVERY: u64 = 1000;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("unsupported format '{format}' for resource type '{kind}'")]
    UnsupportedFormat { kind: ResourceKind, format: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("CSV error: {0}")]
    CsvDecode(#[from] csv_async::Error),

    #[error("CSV encode error: {0}")]
    CsvEncode(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// How an import run ended, short of an operational error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    /// The stream drained and the job was terminalised
    Completed,
    /// The cancellation signal fired; the in-flight batch was discarded
    /// and the job was left in `processing`
    Cancelled,
}

/// How a file export run ended, short of an operational error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Completed {
        download_url: String,
        rows_written: u64,
    },
    /// The partial file has been removed; the job is left in `processing`
    Cancelled,
}

/// Streaming processor shared by all jobs
///
/// Holds the store handle, the job registry for progress updates, and the
/// directory async exports are written into. Per-job state (batches,
/// validators, counters) lives on the task stack, so one processor is safe
/// to share across concurrent jobs.
pub struct Processor {
    store: DynStore,
    registry: Arc<JobRegistry>,
    export_dir: PathBuf,
}

impl Processor {
    pub fn new(store: DynStore, registry: Arc<JobRegistry>, export_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            registry,
            export_dir: export_dir.into(),
        }
    }

    /// Run an import job to completion, cancellation, or operational error
    ///
    /// Selects the decoder for `(kind, format)`; unsupported combinations
    /// fail synchronously. The caller owns job terminalisation on error.
    pub async fn process_import(
        &self,
        cancel: &CancellationToken,
        job_id: Uuid,
        kind: ResourceKind,
        format: ImportFormat,
        path: &Path,
    ) -> Result<ImportOutcome, PipelineError> {
        match (kind, format) {
            (ResourceKind::Users, ImportFormat::Csv) => {
                self.import_users_csv(cancel, job_id, path).await
            }
            (ResourceKind::Articles, ImportFormat::Ndjson) => {
                self.import_ndjson::<crate::models::Article>(cancel, job_id, path)
                    .await
            }
            (ResourceKind::Comments, ImportFormat::Ndjson) => {
                self.import_ndjson::<crate::models::Comment>(cancel, job_id, path)
                    .await
            }
            (kind, format) => Err(PipelineError::UnsupportedFormat {
                kind,
                format: format.as_str().to_string(),
            }),
        }
    }
}
