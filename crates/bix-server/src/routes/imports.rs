//! Import endpoints
//!
//! POST /v1/imports accepts either a multipart upload (`file`,
//! `resource_type`, `format`) or a JSON body naming a `file_url` to fetch.
//! The payload lands in the uploads directory, an import job is created,
//! and the pipeline runs on a detached task; the response is 202 with the
//! job id. An `Idempotency-Key` hit short-circuits to the existing job.

use std::path::PathBuf;

use axum::{
    extract::{FromRequest, Multipart, Path, Request, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use futures::StreamExt;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{import_format_supported, ImportFormat, ImportRequest, ResourceKind};

use super::AppState;

/// Everything needed to start the pipeline for a saved payload
struct SavedPayload {
    kind: ResourceKind,
    format: ImportFormat,
    path: PathBuf,
    file_name: String,
}

/// POST /v1/imports
pub async fn create_import_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
) -> Result<Response, AppError> {
    let idempotency_key = headers
        .get("idempotency-key")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    if let Some(key) = idempotency_key.as_deref() {
        if let Some(job_id) = state.ledger.check(key) {
            if let Some(job) = state.registry.get_import_job(job_id) {
                return Ok((
                    StatusCode::OK,
                    Json(json!({
                        "job_id": job.id,
                        "status": job.status,
                        "message": "Job already exists for this idempotency key",
                    })),
                )
                    .into_response());
            }
        }
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    let payload = if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(request, &()).await.map_err(|err| {
            AppError::BadRequest(format!("Failed to read multipart body: {}", err))
        })?;
        save_multipart(&state, multipart).await?
    } else {
        let Json(import_request) = Json::<ImportRequest>::from_request(request, &())
            .await
            .map_err(|err| AppError::BadRequest(err.to_string()))?;
        let url = import_request
            .file_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                AppError::BadRequest("file_url is required for JSON requests".to_string())
            })?;
        let (path, file_name) = download_from_url(&state, url).await?;
        SavedPayload {
            kind: import_request.resource_type,
            format: import_request.format,
            path,
            file_name,
        }
    };

    if !import_format_supported(payload.kind, payload.format) {
        return Err(AppError::UnsupportedFormat {
            kind: payload.kind.as_str().to_string(),
            format: payload.format.as_str().to_string(),
        });
    }

    let job = state
        .registry
        .create_import_job(payload.kind, &payload.file_name);

    if let Some(key) = idempotency_key.as_deref() {
        state.ledger.insert(key, job.id);
    }

    state
        .runner
        .spawn_import(job.id, payload.kind, payload.format, payload.path);

    tracing::info!(
        job_id = %job.id,
        kind = payload.kind.as_str(),
        format = payload.format.as_str(),
        file = %payload.file_name,
        "import job created"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "job_id": job.id,
            "status": job.status,
            "message": "Import job created successfully",
        })),
    )
        .into_response())
}

/// GET /v1/imports/:job_id
pub async fn get_import_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, AppError> {
    let job = Uuid::parse_str(&job_id)
        .ok()
        .and_then(|id| state.registry.get_import_job(id))
        .ok_or_else(|| AppError::NotFound("Job not found".to_string()))?;

    Ok((StatusCode::OK, Json(job)).into_response())
}

/// Drop any path components a client smuggles into the file name
fn sanitize_file_name(name: &str) -> String {
    name.rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
        .trim()
        .to_string()
}

/// Stream the multipart payload to the uploads directory
async fn save_multipart(
    state: &AppState,
    mut multipart: Multipart,
) -> Result<SavedPayload, AppError> {
    let mut resource_type: Option<String> = None;
    let mut format: Option<String> = None;
    let mut saved: Option<(PathBuf, String)> = None;

    while let Some(mut field) = multipart.next_field().await.map_err(|err| {
        AppError::BadRequest(format!("Failed to read multipart field: {}", err))
    })? {
        match field.name().unwrap_or("") {
            "file" => {
                let original = field
                    .file_name()
                    .map(sanitize_file_name)
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| "upload".to_string());
                let file_name = format!("{}_{}", Utc::now().timestamp(), original);
                let path = state.config.dirs.uploads.join(&file_name);

                let mut file = tokio::fs::File::create(&path).await?;
                let mut written: u64 = 0;
                loop {
                    let chunk = field.chunk().await.map_err(|err| {
                        AppError::BadRequest(format!("Failed to read file field: {}", err))
                    })?;
                    let Some(chunk) = chunk else { break };
                    written += chunk.len() as u64;
                    if written > state.config.limits.max_upload_bytes {
                        drop(file);
                        let _ = tokio::fs::remove_file(&path).await;
                        return Err(AppError::PayloadTooLarge);
                    }
                    file.write_all(&chunk).await?;
                }
                file.flush().await?;
                saved = Some((path, file_name));
            }
            "resource_type" => {
                resource_type = Some(field.text().await.map_err(|err| {
                    AppError::BadRequest(format!("Failed to read resource_type field: {}", err))
                })?);
            }
            "format" => {
                format = Some(field.text().await.map_err(|err| {
                    AppError::BadRequest(format!("Failed to read format field: {}", err))
                })?);
            }
            _ => {}
        }
    }

    let (resource_type, format) = match (resource_type, format) {
        (Some(resource_type), Some(format)) => (resource_type, format),
        _ => {
            return Err(AppError::BadRequest(
                "resource_type and format are required".to_string(),
            ))
        }
    };

    let kind: ResourceKind = resource_type
        .parse()
        .map_err(|_| AppError::BadRequest(format!("unknown resource kind: {}", resource_type)))?;
    let format: ImportFormat = format
        .parse()
        .map_err(|_| AppError::BadRequest(format!("unknown import format: {}", format)))?;

    let (path, file_name) = saved
        .ok_or_else(|| AppError::BadRequest("Failed to get file from request".to_string()))?;

    Ok(SavedPayload {
        kind,
        format,
        path,
        file_name,
    })
}

/// Fetch a remote payload into the uploads directory, size-capped
async fn download_from_url(state: &AppState, url: &str) -> Result<(PathBuf, String), AppError> {
    let response = reqwest::get(url)
        .await
        .map_err(|err| AppError::BadRequest(format!("Failed to download file: {}", err)))?;

    if !response.status().is_success() {
        return Err(AppError::BadRequest(format!(
            "Failed to download file: HTTP {}",
            response.status().as_u16()
        )));
    }

    if let Some(length) = response.content_length() {
        if length > state.config.limits.max_upload_bytes {
            return Err(AppError::PayloadTooLarge);
        }
    }

    let file_name = format!("download_{}", Utc::now().timestamp());
    let path = state.config.dirs.uploads.join(&file_name);

    let mut file = tokio::fs::File::create(&path).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk
            .map_err(|err| AppError::BadRequest(format!("Failed to download file: {}", err)))?;
        written += chunk.len() as u64;
        if written > state.config.limits.max_upload_bytes {
            drop(file);
            let _ = tokio::fs::remove_file(&path).await;
            return Err(AppError::PayloadTooLarge);
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    Ok((path, file_name))
}
