//! HTTP surface
//!
//! Route handlers are thin: they translate requests into registry,
//! runner, and processor calls and map failures onto the shared error
//! envelope. All heavy lifting happens in the pipeline tasks.

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::services::ServeDir;

use crate::config::Config;
use crate::jobs::{IdempotencyLedger, JobRegistry, JobRunner};
use crate::middleware::{self, rate_limit};
use crate::pipeline::Processor;

pub mod admin;
pub mod exports;
pub mod imports;

/// Shared state for all route handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<JobRegistry>,
    pub ledger: Arc<IdempotencyLedger>,
    pub runner: Arc<JobRunner>,
    pub processor: Arc<Processor>,
    pub config: Arc<Config>,
    pub metrics: PrometheusHandle,
}

/// Build the application router with all routes and middleware
pub fn router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/imports", post(imports::create_import_job))
        .route("/imports/:job_id", get(imports::get_import_job))
        .route(
            "/exports",
            get(exports::stream_export).post(exports::create_export_job),
        )
        .route("/exports/:job_id", get(exports::get_export_job))
        .route("/admin/stats", get(admin::job_stats));

    let router = Router::new()
        .route("/health", get(admin::health_check))
        .route("/metrics", get(admin::metrics_exposition))
        .nest("/v1", v1)
        .nest_service("/downloads", ServeDir::new(&state.config.dirs.exports))
        .fallback(admin::not_found)
        .layer(DefaultBodyLimit::max(
            state.config.limits.max_upload_bytes as usize,
        ))
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&state.config.cors));

    let rate_config = rate_limit::RateLimitConfig {
        requests_per_minute: state.config.limits.rate_limit_per_minute,
    };

    rate_limit::apply(router, rate_config).with_state(state)
}
