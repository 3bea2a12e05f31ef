//! Health, metrics, stats, and the 404 fallback

use axum::{
    extract::State,
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;

use crate::api::response::ErrorResponse;

use super::AppState;

/// GET /health
pub async fn health_check() -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "timestamp": Utc::now(),
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
        .into_response()
}

/// GET /metrics
pub async fn metrics_exposition(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
        .into_response()
}

/// GET /v1/admin/stats
pub async fn job_stats(State(state): State<AppState>) -> Response {
    (StatusCode::OK, Json(state.registry.stats())).into_response()
}

/// Fallback for unknown routes
pub async fn not_found(uri: Uri) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse::new(
            "NOT_FOUND",
            format!("Endpoint not found: {}", uri.path()),
        )),
    )
        .into_response()
}
