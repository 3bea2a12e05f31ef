//! BIX Server - Main entry point

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bix_common::logging::{init_logging, LogConfig};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing::info;

use bix_server::{
    config::Config,
    jobs::{
        sweeper::{spawn_sweeper, SweeperConfig},
        IdempotencyLedger, JobRegistry, JobRunner,
    },
    metrics::init_metrics,
    pipeline::Processor,
    routes::{router, AppState},
    store::{DynStore, PgStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with configuration from environment
    let mut log_config = LogConfig::from_env()?;
    if std::env::var("LOG_DIRECTIVES").is_err() {
        log_config = log_config.with_directives("bix_server=debug,tower_http=info,sqlx=warn");
    }
    init_logging(&log_config)?;

    info!("Starting BIX Server");

    // Load configuration
    let config = Arc::new(Config::load()?);
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    // Initialize database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .connect(&config.database.url)
        .await?;

    info!("Database connection pool established");

    // Run migrations
    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .map_err(|err| anyhow::anyhow!("Failed to run migrations: {}", err))?;

    info!("Database migrations completed");

    // Create upload/export directories
    tokio::fs::create_dir_all(&config.dirs.uploads).await?;
    tokio::fs::create_dir_all(&config.dirs.exports).await?;

    // Install the metrics recorder
    let metrics = init_metrics()?;

    // Wire up the core components
    let store: DynStore = Arc::new(PgStore::new(pool));
    let registry = Arc::new(JobRegistry::new());
    let ledger = Arc::new(IdempotencyLedger::new());
    let processor = Arc::new(Processor::new(
        store.clone(),
        registry.clone(),
        config.dirs.exports.clone(),
    ));
    let runner = Arc::new(JobRunner::new(
        registry.clone(),
        store.clone(),
        processor.clone(),
    ));

    // Start the background sweeper
    let sweeper_handle = spawn_sweeper(
        registry.clone(),
        ledger.clone(),
        SweeperConfig {
            interval: Duration::from_secs(config.cleanup.interval_secs),
            job_max_age: Duration::from_secs(config.cleanup.job_max_age_hours * 3600),
            idempotency_max_age: Duration::from_secs(
                config.cleanup.idempotency_max_age_hours * 3600,
            ),
            uploads_dir: config.dirs.uploads.clone(),
            uploads_max_age: Duration::from_secs(config.cleanup.uploads_max_age_hours * 3600),
            exports_dir: config.dirs.exports.clone(),
            exports_max_age: Duration::from_secs(config.cleanup.exports_max_age_hours * 3600),
        },
    );
    info!("Background sweeper started");

    // Build the application router
    let state = AppState {
        registry,
        ledger,
        runner,
        processor,
        config: config.clone(),
        metrics,
    };
    let app = router(state);

    // Create socket address
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Connect info feeds the rate limiter's peer-IP key extractor
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(config.server.shutdown_timeout_secs))
    .await?;

    sweeper_handle.abort();
    info!("Server shut down gracefully");

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", err);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to install SIGTERM handler: {}", err);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    // Give in-flight requests a moment to finish; detached pipeline tasks
    // are lost at shutdown by design.
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
