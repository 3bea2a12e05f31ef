//! Export endpoints
//!
//! GET /v1/exports streams the filtered export directly into the response
//! body; POST /v1/exports creates an asynchronous job that writes a file
//! under the export directory instead.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{export_format_supported, ExportFormat, ExportRequest, ResourceKind};
use crate::store::Filters;

use super::AppState;

/// GET /v1/exports?resource=<kind>&format=<format>&<filters...>
pub async fn stream_export(
    State(state): State<AppState>,
    Query(params): Query<std::collections::HashMap<String, String>>,
) -> Result<Response, AppError> {
    let resource = params
        .get("resource")
        .ok_or_else(|| AppError::BadRequest("resource parameter is required".to_string()))?;
    let kind: ResourceKind = resource
        .parse()
        .map_err(|_| AppError::BadRequest(format!("unknown resource kind: {}", resource)))?;

    let format_raw = params.get("format").map(String::as_str).unwrap_or("ndjson");
    let format: ExportFormat = format_raw
        .parse()
        .map_err(|_| AppError::BadRequest(format!("unknown export format: {}", format_raw)))?;

    let mut filters = Filters::new();
    for (key, value) in &params {
        if key != "resource" && key != "format" {
            filters.insert(key.clone(), value.clone());
        }
    }

    let stream = state.processor.stream_export(kind, format, &filters)?;

    let response = Response::builder()
        .header(header::CONTENT_TYPE, format.content_type())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename={}.{}", kind.as_str(), format.as_str()),
        )
        .body(Body::from_stream(stream))
        .map_err(|err| AppError::Internal(err.to_string()))?;

    Ok(response)
}

/// POST /v1/exports
pub async fn create_export_job(
    State(state): State<AppState>,
    Json(request): Json<ExportRequest>,
) -> Result<Response, AppError> {
    if !export_format_supported(request.resource_type, request.format) {
        return Err(AppError::UnsupportedFormat {
            kind: request.resource_type.as_str().to_string(),
            format: request.format.as_str().to_string(),
        });
    }

    let job = state.registry.create_export_job(
        request.resource_type,
        request.format,
        request.filters.clone(),
    );

    state.runner.spawn_export(
        job.id,
        request.resource_type,
        request.format,
        request.filters,
    );

    tracing::info!(
        job_id = %job.id,
        kind = request.resource_type.as_str(),
        format = request.format.as_str(),
        "export job created"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "job_id": job.id,
            "status": job.status,
            "message": "Export job created successfully",
        })),
    )
        .into_response())
}

/// GET /v1/exports/:job_id
pub async fn get_export_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, AppError> {
    let job = Uuid::parse_str(&job_id)
        .ok()
        .and_then(|id| state.registry.get_export_job(id))
        .ok_or_else(|| AppError::NotFound("Job not found".to_string()))?;

    Ok((StatusCode::OK, Json(job)).into_response())
}
