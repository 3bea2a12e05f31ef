//! Import decoders and the batch loop
//!
//! The CSV decoder maps header names to column indices and tolerates
//! missing or unknown columns. The NDJSON decoder reads one object per
//! line and skips blank lines. Field-level parse failures become row-level
//! validation errors and the row is skipped; the stream keeps going.
//!
//! Rows carry their 1-based physical position through the batch so error
//! labels stay correct even when parse-skipped rows leave gaps. For CSV
//! the header line counts as row 1.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use csv_async::{AsyncReaderBuilder, StringRecord};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::{Article, Comment, JobStatus, User, ValidationError};
use crate::validation::BatchValidator;

use super::{ImportOutcome, PipelineError, Processor, BATCH_SIZE};

/// Running counters for one import job
#[derive(Debug, Default)]
struct ImportProgress {
    processed: u64,
    valid: u64,
    parse_errors: u64,
}

impl ImportProgress {
    /// Total size is unknown mid-stream, so progress is approximated with
    /// a monotonic curve that stays below 50 until the job terminalises.
    fn running_progress(&self) -> u8 {
        (self.processed * 50 / (self.processed + 1000)) as u8
    }
}

/// A record kind that can flow through the generic batch loop
#[async_trait]
pub(super) trait Importable: Sized + Send + 'static {
    async fn validate_batch(
        validator: &mut BatchValidator,
        batch: Vec<(u64, Self)>,
    ) -> Result<Vec<Self>, crate::store::StoreError>;

    async fn upsert(
        store: &crate::store::DynStore,
        records: &[Self],
    ) -> Result<(), crate::store::StoreError>;
}

#[async_trait]
impl Importable for User {
    async fn validate_batch(
        validator: &mut BatchValidator,
        batch: Vec<(u64, Self)>,
    ) -> Result<Vec<Self>, crate::store::StoreError> {
        validator.validate_users(batch).await
    }

    async fn upsert(
        store: &crate::store::DynStore,
        records: &[Self],
    ) -> Result<(), crate::store::StoreError> {
        store.batch_upsert_users(records).await
    }
}

#[async_trait]
impl Importable for Article {
    async fn validate_batch(
        validator: &mut BatchValidator,
        batch: Vec<(u64, Self)>,
    ) -> Result<Vec<Self>, crate::store::StoreError> {
        validator.validate_articles(batch).await
    }

    async fn upsert(
        store: &crate::store::DynStore,
        records: &[Self],
    ) -> Result<(), crate::store::StoreError> {
        store.batch_upsert_articles(records).await
    }
}

#[async_trait]
impl Importable for Comment {
    async fn validate_batch(
        validator: &mut BatchValidator,
        batch: Vec<(u64, Self)>,
    ) -> Result<Vec<Self>, crate::store::StoreError> {
        validator.validate_comments(batch).await
    }

    async fn upsert(
        store: &crate::store::DynStore,
        records: &[Self],
    ) -> Result<(), crate::store::StoreError> {
        store.batch_upsert_comments(records).await
    }
}

impl Processor {
    /// Users arrive as CSV with a header row
    pub(super) async fn import_users_csv(
        &self,
        cancel: &CancellationToken,
        job_id: Uuid,
        path: &Path,
    ) -> Result<ImportOutcome, PipelineError> {
        let file = File::open(path).await?;
        let mut reader = AsyncReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .create_reader(file);

        let headers = reader.headers().await?.clone();
        let columns: HashMap<String, usize> = headers
            .iter()
            .enumerate()
            .map(|(index, name)| (name.trim().to_string(), index))
            .collect();

        let mut validator = BatchValidator::new(self.store.clone());
        let mut progress = ImportProgress::default();
        let mut batch: Vec<(u64, User)> = Vec::with_capacity(BATCH_SIZE);
        let mut record = StringRecord::new();
        let mut row: u64 = 1; // the header line

        loop {
            if cancel.is_cancelled() {
                return Ok(ImportOutcome::Cancelled);
            }
            row += 1;

            match reader.read_record(&mut record).await {
                Ok(false) => break,
                Ok(true) => {
                    progress.processed += 1;
                    match parse_user_record(&record, &columns) {
                        Ok(user) => batch.push((row, user)),
                        Err(message) => {
                            progress.parse_errors += 1;
                            self.push_import_update(
                                job_id,
                                &progress,
                                &mut validator,
                                vec![ValidationError::new(row, "parsing", message)],
                            );
                        }
                    }
                }
                Err(err) => {
                    // The reader recovers at the next record boundary.
                    progress.parse_errors += 1;
                    self.push_import_update(
                        job_id,
                        &progress,
                        &mut validator,
                        vec![ValidationError::new(
                            row,
                            "csv",
                            format!("CSV parsing error: {}", err),
                        )],
                    );
                    continue;
                }
            }

            if batch.len() >= BATCH_SIZE {
                if cancel.is_cancelled() {
                    return Ok(ImportOutcome::Cancelled);
                }
                self.flush_batch(&mut validator, &mut batch, &mut progress)
                    .await?;
                self.push_import_update(job_id, &progress, &mut validator, vec![]);
            }
        }

        if !batch.is_empty() {
            if cancel.is_cancelled() {
                return Ok(ImportOutcome::Cancelled);
            }
            self.flush_batch(&mut validator, &mut batch, &mut progress)
                .await?;
        }

        self.finish_import(job_id, &progress, &mut validator);
        Ok(ImportOutcome::Completed)
    }

    /// Articles and comments arrive as NDJSON, one object per line
    pub(super) async fn import_ndjson<T>(
        &self,
        cancel: &CancellationToken,
        job_id: Uuid,
        path: &Path,
    ) -> Result<ImportOutcome, PipelineError>
    where
        T: Importable + serde::de::DeserializeOwned,
    {
        let file = File::open(path).await?;
        let mut lines = BufReader::new(file).lines();

        let mut validator = BatchValidator::new(self.store.clone());
        let mut progress = ImportProgress::default();
        let mut batch: Vec<(u64, T)> = Vec::with_capacity(BATCH_SIZE);
        let mut row: u64 = 0;

        while let Some(line) = lines.next_line().await? {
            if cancel.is_cancelled() {
                return Ok(ImportOutcome::Cancelled);
            }
            row += 1;

            if line.trim().is_empty() {
                continue;
            }
            progress.processed += 1;

            match serde_json::from_str::<T>(&line) {
                Ok(record) => batch.push((row, record)),
                Err(err) => {
                    progress.parse_errors += 1;
                    self.push_import_update(
                        job_id,
                        &progress,
                        &mut validator,
                        vec![ValidationError::new(
                            row,
                            "json",
                            format!("JSON parsing error: {}", err),
                        )],
                    );
                }
            }

            if batch.len() >= BATCH_SIZE {
                if cancel.is_cancelled() {
                    return Ok(ImportOutcome::Cancelled);
                }
                self.flush_batch(&mut validator, &mut batch, &mut progress)
                    .await?;
                self.push_import_update(job_id, &progress, &mut validator, vec![]);
            }
        }

        if !batch.is_empty() {
            if cancel.is_cancelled() {
                return Ok(ImportOutcome::Cancelled);
            }
            self.flush_batch(&mut validator, &mut batch, &mut progress)
                .await?;
        }

        self.finish_import(job_id, &progress, &mut validator);
        Ok(ImportOutcome::Completed)
    }

    /// Validate a full batch and persist the accepted subset atomically
    async fn flush_batch<T: Importable>(
        &self,
        validator: &mut BatchValidator,
        batch: &mut Vec<(u64, T)>,
        progress: &mut ImportProgress,
    ) -> Result<(), PipelineError> {
        if batch.is_empty() {
            return Ok(());
        }
        let accepted = T::validate_batch(validator, std::mem::take(batch)).await?;
        if !accepted.is_empty() {
            T::upsert(&self.store, &accepted).await?;
            progress.valid += accepted.len() as u64;
        }
        Ok(())
    }

    /// Deliver cumulative counters plus errors new since the last update
    fn push_import_update(
        &self,
        job_id: Uuid,
        progress: &ImportProgress,
        validator: &mut BatchValidator,
        mut extra: Vec<ValidationError>,
    ) {
        let mut new_errors = validator.drain_pending();
        new_errors.append(&mut extra);
        let error_count = progress.parse_errors + validator.total_errors();

        self.registry.update_import_job(
            job_id,
            JobStatus::Processing,
            progress.running_progress(),
            progress.processed,
            progress.valid,
            error_count,
            new_errors,
        );
    }

    /// Terminalise the job once the stream has drained
    fn finish_import(
        &self,
        job_id: Uuid,
        progress: &ImportProgress,
        validator: &mut BatchValidator,
    ) {
        let error_count = progress.parse_errors + validator.total_errors();
        let status = if progress.valid == 0 && error_count > 0 {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };

        metrics::counter!("bix_import_records_processed_total").increment(progress.processed);
        metrics::counter!("bix_import_records_valid_total").increment(progress.valid);

        tracing::info!(
            job_id = %job_id,
            status = status.as_str(),
            processed = progress.processed,
            valid = progress.valid,
            errors = error_count,
            "import finished"
        );

        self.registry.update_import_job(
            job_id,
            status,
            100,
            progress.processed,
            progress.valid,
            error_count,
            validator.drain_pending(),
        );
    }
}

fn parse_timestamp(raw: &str, field: &str) -> Result<Option<DateTime<Utc>>, String> {
    if raw.is_empty() {
        return Ok(None);
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| Some(ts.with_timezone(&Utc)))
        .map_err(|_| format!("invalid {} value: {}", field, raw))
}

/// Decode one CSV record into a user via the header-derived column map.
/// Missing columns and empty cells map to zero values.
fn parse_user_record(
    record: &StringRecord,
    columns: &HashMap<String, usize>,
) -> Result<User, String> {
    let cell = |name: &str| -> &str {
        columns
            .get(name)
            .and_then(|&index| record.get(index))
            .map(str::trim)
            .unwrap_or("")
    };

    let id = match cell("id") {
        "" => Uuid::nil(),
        raw => Uuid::parse_str(raw).map_err(|_| format!("invalid id value: {}", raw))?,
    };

    let active = match cell("active") {
        "" => false,
        raw => raw
            .parse::<bool>()
            .map_err(|_| format!("invalid active value: {}", raw))?,
    };

    Ok(User {
        id,
        email: cell("email").to_string(),
        name: cell("name").to_string(),
        role: cell("role").to_string(),
        active,
        created_at: parse_timestamp(cell("created_at"), "created_at")?,
        updated_at: parse_timestamp(cell("updated_at"), "updated_at")?,
    })
}
