//! Configuration management

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8080;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/bix";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 25;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default upload directory.
pub const DEFAULT_UPLOADS_DIR: &str = "./uploads";

/// Default export directory.
pub const DEFAULT_EXPORTS_DIR: &str = "./exports";

/// Default upload body cap: 100 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

/// Default rate limit per client per minute.
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u64 = 100;

/// Default CORS allowed origin for local development.
pub const DEFAULT_CORS_ALLOWED_ORIGIN: &str = "*";

/// Default sweep interval in seconds (hourly).
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 3600;

/// Default job retention in hours.
pub const DEFAULT_JOB_MAX_AGE_HOURS: u64 = 24;

/// Default idempotency key retention in hours.
pub const DEFAULT_IDEMPOTENCY_MAX_AGE_HOURS: u64 = 1;

/// Default upload file retention in hours (1 day).
pub const DEFAULT_UPLOADS_MAX_AGE_HOURS: u64 = 24;

/// Default export file retention in hours (7 days).
pub const DEFAULT_EXPORTS_MAX_AGE_HOURS: u64 = 7 * 24;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub dirs: DirConfig,
    pub limits: LimitConfig,
    pub cors: CorsConfig,
    pub cleanup: CleanupConfig,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
}

/// Directories for uploaded payloads and finished exports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirConfig {
    pub uploads: PathBuf,
    pub exports: PathBuf,
}

/// Request caps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitConfig {
    pub max_upload_bytes: u64,
    pub rate_limit_per_minute: u64,
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

/// Retention windows enforced by the sweeper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    pub interval_secs: u64,
    pub job_max_age_hours: u64,
    pub idempotency_max_age_hours: u64,
    pub uploads_max_age_hours: u64,
    pub exports_max_age_hours: u64,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            server: ServerConfig {
                host: std::env::var("BIX_HOST").unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
                port: env_parse("BIX_PORT", DEFAULT_SERVER_PORT),
                shutdown_timeout_secs: env_parse(
                    "BIX_SHUTDOWN_TIMEOUT",
                    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                ),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_parse(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
                min_connections: env_parse(
                    "DATABASE_MIN_CONNECTIONS",
                    DEFAULT_DATABASE_MIN_CONNECTIONS,
                ),
                connect_timeout_secs: env_parse(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
            },
            dirs: DirConfig {
                uploads: PathBuf::from(
                    std::env::var("UPLOADS_DIR").unwrap_or_else(|_| DEFAULT_UPLOADS_DIR.to_string()),
                ),
                exports: PathBuf::from(
                    std::env::var("EXPORTS_DIR").unwrap_or_else(|_| DEFAULT_EXPORTS_DIR.to_string()),
                ),
            },
            limits: LimitConfig {
                max_upload_bytes: env_parse("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES),
                rate_limit_per_minute: env_parse(
                    "RATE_LIMIT_REQUESTS_PER_MINUTE",
                    DEFAULT_RATE_LIMIT_PER_MINUTE,
                ),
            },
            cors: CorsConfig {
                allowed_origins: std::env::var("CORS_ALLOWED_ORIGINS")
                    .unwrap_or_else(|_| DEFAULT_CORS_ALLOWED_ORIGIN.to_string())
                    .split(',')
                    .map(|origin| origin.trim().to_string())
                    .collect(),
                allow_credentials: env_parse("CORS_ALLOW_CREDENTIALS", false),
            },
            cleanup: CleanupConfig {
                interval_secs: env_parse("CLEANUP_INTERVAL_SECS", DEFAULT_CLEANUP_INTERVAL_SECS),
                job_max_age_hours: env_parse("JOB_MAX_AGE_HOURS", DEFAULT_JOB_MAX_AGE_HOURS),
                idempotency_max_age_hours: env_parse(
                    "IDEMPOTENCY_MAX_AGE_HOURS",
                    DEFAULT_IDEMPOTENCY_MAX_AGE_HOURS,
                ),
                uploads_max_age_hours: env_parse(
                    "UPLOADS_MAX_AGE_HOURS",
                    DEFAULT_UPLOADS_MAX_AGE_HOURS,
                ),
                exports_max_age_hours: env_parse(
                    "EXPORTS_MAX_AGE_HOURS",
                    DEFAULT_EXPORTS_MAX_AGE_HOURS,
                ),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.limits.max_upload_bytes == 0 {
            anyhow::bail!("max_upload_bytes must be greater than 0");
        }

        if self.limits.rate_limit_per_minute == 0 {
            anyhow::bail!("rate_limit_per_minute must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            },
            dirs: DirConfig {
                uploads: PathBuf::from(DEFAULT_UPLOADS_DIR),
                exports: PathBuf::from(DEFAULT_EXPORTS_DIR),
            },
            limits: LimitConfig {
                max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
                rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
            },
            cors: CorsConfig {
                allowed_origins: vec![DEFAULT_CORS_ALLOWED_ORIGIN.to_string()],
                allow_credentials: false,
            },
            cleanup: CleanupConfig {
                interval_secs: DEFAULT_CLEANUP_INTERVAL_SECS,
                job_max_age_hours: DEFAULT_JOB_MAX_AGE_HOURS,
                idempotency_max_age_hours: DEFAULT_IDEMPOTENCY_MAX_AGE_HOURS,
                uploads_max_age_hours: DEFAULT_UPLOADS_MAX_AGE_HOURS,
                exports_max_age_hours: DEFAULT_EXPORTS_MAX_AGE_HOURS,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_zero_port_rejected() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pool_bounds_rejected() {
        let mut config = Config::default();
        config.database.min_connections = 50;
        config.database.max_connections = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_upload_cap_rejected() {
        let mut config = Config::default();
        config.limits.max_upload_bytes = 0;
        assert!(config.validate().is_err());
    }
}
