//! Export serialisation and the two export paths
//!
//! Both paths share the per-row serialisers: CSV rows for users, compact
//! JSON lines for everything else. The streaming path chunks rows into
//! response frames every `EXPORT_FLUSH_EVERY` rows; the file path writes
//! under the export directory and records a `/downloads/` URL on success.
//! A failed or cancelled file export removes its partial file.

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::{
    export_format_supported, ExportFormat, JobStatus, ResourceKind, User,
};
use crate::store::Filters;

use super::{
    ExportOutcome, PipelineError, Processor, EXPORT_FLUSH_EVERY, EXPORT_PROGRESS_EVERY,
};

/// Header line for user CSV exports
pub const USER_CSV_HEADER: &[u8] = b"id,email,name,role,active,created_at,updated_at\n";

type ByteStream = BoxStream<'static, Result<Bytes, PipelineError>>;

fn format_timestamp(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

/// One CSV row for a user, standard quoting, LF terminated
pub(crate) fn user_csv_row(user: &User) -> Result<Bytes, PipelineError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record([
        user.id.to_string(),
        user.email.clone(),
        user.name.clone(),
        user.role.clone(),
        user.active.to_string(),
        format_timestamp(user.created_at),
        format_timestamp(user.updated_at),
    ])?;
    let buf = writer
        .into_inner()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?;
    Ok(Bytes::from(buf))
}

/// One compact JSON object, LF terminated
pub(crate) fn json_row<T: Serialize>(record: &T) -> Result<Bytes, PipelineError> {
    let mut buf = serde_json::to_vec(record)?;
    buf.push(b'\n');
    Ok(Bytes::from(buf))
}

fn export_header(kind: ResourceKind, format: ExportFormat) -> Option<Bytes> {
    match (kind, format) {
        (ResourceKind::Users, ExportFormat::Csv) => Some(Bytes::from_static(USER_CSV_HEADER)),
        _ => None,
    }
}

/// Group row frames into chunks of `size`, concatenated into one frame
/// each. An error ends the stream at the chunk boundary.
fn chunk_every(rows: ByteStream, size: usize) -> ByteStream {
    Box::pin(rows.try_chunks(size).map(|chunk| match chunk {
        Ok(parts) => {
            let mut buf = Vec::with_capacity(parts.iter().map(Bytes::len).sum());
            for part in &parts {
                buf.extend_from_slice(part);
            }
            Ok(Bytes::from(buf))
        }
        Err(err) => Err(err.1),
    }))
}

impl Processor {
    /// Serialised rows for `(kind, format)`, no header, one frame per row
    fn serialised_rows(
        &self,
        kind: ResourceKind,
        format: ExportFormat,
        filters: &Filters,
    ) -> ByteStream {
        match kind {
            ResourceKind::Users => {
                let users = self.store.stream_users(filters);
                match format {
                    ExportFormat::Csv => Box::pin(users.map(|row| {
                        row.map_err(PipelineError::from)
                            .and_then(|user| user_csv_row(&user))
                    })),
                    ExportFormat::Ndjson | ExportFormat::Json => Box::pin(users.map(|row| {
                        row.map_err(PipelineError::from)
                            .and_then(|user| json_row(&user))
                    })),
                }
            }
            ResourceKind::Articles => Box::pin(self.store.stream_articles(filters).map(|row| {
                row.map_err(PipelineError::from)
                    .and_then(|article| json_row(&article))
            })),
            ResourceKind::Comments => Box::pin(self.store.stream_comments(filters).map(|row| {
                row.map_err(PipelineError::from)
                    .and_then(|comment| json_row(&comment))
            })),
        }
    }

    /// Streaming export: header plus rows, flushed every
    /// `EXPORT_FLUSH_EVERY` rows as one response frame
    pub fn stream_export(
        &self,
        kind: ResourceKind,
        format: ExportFormat,
        filters: &Filters,
    ) -> Result<ByteStream, PipelineError> {
        if !export_format_supported(kind, format) {
            return Err(PipelineError::UnsupportedFormat {
                kind,
                format: format.as_str().to_string(),
            });
        }

        let rows = self.serialised_rows(kind, format, filters);
        let stream: ByteStream = match export_header(kind, format) {
            Some(header) => Box::pin(stream::once(async move { Ok(header) }).chain(rows)),
            None => rows,
        };

        Ok(chunk_every(stream, EXPORT_FLUSH_EVERY))
    }

    /// Async export to `<export_dir>/<kind>_<format>_<unix_ts>.<ext>`
    ///
    /// On success returns the `/downloads/` URL; on error or cancellation
    /// the partial file is removed.
    pub async fn process_export(
        &self,
        cancel: &CancellationToken,
        job_id: Uuid,
        kind: ResourceKind,
        format: ExportFormat,
        filters: &Filters,
    ) -> Result<ExportOutcome, PipelineError> {
        if !export_format_supported(kind, format) {
            return Err(PipelineError::UnsupportedFormat {
                kind,
                format: format.as_str().to_string(),
            });
        }

        let file_name = format!(
            "{}_{}_{}.{}",
            kind.as_str(),
            format.as_str(),
            Utc::now().timestamp(),
            format.extension()
        );
        let path = self.export_dir.join(&file_name);
        let mut file = File::create(&path).await?;

        let written = self
            .write_rows(cancel, job_id, &mut file, kind, format, filters)
            .await;

        match written {
            Ok(Some(rows_written)) => {
                file.flush().await?;
                metrics::counter!("bix_export_rows_total").increment(rows_written);
                tracing::info!(
                    job_id = %job_id,
                    file = %file_name,
                    rows = rows_written,
                    "export file written"
                );
                Ok(ExportOutcome::Completed {
                    download_url: format!("/downloads/{}", file_name),
                    rows_written,
                })
            }
            Ok(None) => {
                drop(file);
                let _ = tokio::fs::remove_file(&path).await;
                Ok(ExportOutcome::Cancelled)
            }
            Err(err) => {
                drop(file);
                let _ = tokio::fs::remove_file(&path).await;
                Err(err)
            }
        }
    }

    /// Write header and rows; `Ok(None)` means the run was cancelled
    async fn write_rows<W: AsyncWrite + Unpin>(
        &self,
        cancel: &CancellationToken,
        job_id: Uuid,
        writer: &mut W,
        kind: ResourceKind,
        format: ExportFormat,
        filters: &Filters,
    ) -> Result<Option<u64>, PipelineError> {
        if let Some(header) = export_header(kind, format) {
            writer.write_all(&header).await?;
        }

        let mut rows = self.serialised_rows(kind, format, filters);
        let mut processed: u64 = 0;

        while let Some(row) = rows.try_next().await? {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            writer.write_all(&row).await?;
            processed += 1;

            if processed % EXPORT_PROGRESS_EVERY == 0 {
                let progress = std::cmp::min(90, processed * 90 / 10_000) as u8;
                self.registry.update_export_job(
                    job_id,
                    JobStatus::Processing,
                    progress,
                    processed,
                    None,
                );
            }
        }

        Ok(Some(processed))
    }
}
