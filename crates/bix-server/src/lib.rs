//! BIX Server Library
//!
//! Bulk import/export HTTP service for users, articles, and comments.
//!
//! # Overview
//!
//! - **Streaming pipeline**: bounded-memory CSV/NDJSON decoding, batched
//!   validation and upserts, streamed and file-based exports
//! - **Job registry**: in-process directory of import/export jobs with
//!   progress, counters, and a bounded error log
//! - **Idempotency ledger**: client-keyed dedup for import retries
//! - **Store adapter**: narrow capability boundary over PostgreSQL (SQLx)
//! - **HTTP surface**: axum routes with CORS, tracing, rate limiting, and
//!   body caps
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bix_server::config::Config;
//! use bix_server::jobs::{IdempotencyLedger, JobRegistry, JobRunner};
//! use bix_server::pipeline::Processor;
//! use bix_server::routes::{router, AppState};
//! use bix_server::store::{DynStore, PgStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Arc::new(Config::load()?);
//!     let pool = sqlx::PgPool::connect(&config.database.url).await?;
//!     let store: DynStore = Arc::new(PgStore::new(pool));
//!     let registry = Arc::new(JobRegistry::new());
//!     let processor = Arc::new(Processor::new(
//!         store.clone(),
//!         registry.clone(),
//!         config.dirs.exports.clone(),
//!     ));
//!     let state = AppState {
//!         registry: registry.clone(),
//!         ledger: Arc::new(IdempotencyLedger::new()),
//!         runner: Arc::new(JobRunner::new(registry, store, processor.clone())),
//!         processor,
//!         config,
//!         metrics: bix_server::metrics::init_metrics()?,
//!     };
//!     let app = router(state);
//!     # let _ = app;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod pipeline;
pub mod routes;
pub mod store;
pub mod validation;

// Re-export commonly used types
pub use error::AppError;
