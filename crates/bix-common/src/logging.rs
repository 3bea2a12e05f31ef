//! Logging configuration and initialisation
//!
//! Centralised `tracing` setup for all BIX binaries. Console output is
//! always enabled; an optional daily-rotated file sink can be layered on
//! top. Configuration comes from the environment:
//!
//! - `LOG_DIRECTIVES`: filter directives, e.g. `bix_server=debug,sqlx=warn`
//! - `LOG_FORMAT`: `text` (default) or `json`
//! - `LOG_DIR`: when set, also log to daily-rotated files in this directory
//! - `LOG_FILE_PREFIX`: file name prefix for the file sink (default `bix`)
//!
//! Prefer structured fields over string interpolation:
//!
//! ```rust,ignore
//! tracing::info!(job_id = %job.id, records = total, "batch committed");
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for structured log shipping
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(anyhow::anyhow!("Invalid log format: {}", s)),
        }
    }
}

/// File sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogFileConfig {
    /// Directory for rotated log files
    pub dir: PathBuf,
    /// File name prefix (e.g. "bix-server" -> "bix-server.2025-01-14")
    pub prefix: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Filter directives (`EnvFilter` syntax). Falls back to `info`.
    pub directives: String,
    /// Output format for all sinks
    pub format: LogFormat,
    /// Optional file sink; `None` means console only
    pub file: Option<LogFileConfig>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            directives: "info".to_string(),
            format: LogFormat::Text,
            file: None,
        }
    }
}

impl LogConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(directives) = std::env::var("LOG_DIRECTIVES") {
            config.directives = directives;
        }

        if let Ok(format) = std::env::var("LOG_FORMAT") {
            config.format = format.parse()?;
        }

        if let Ok(dir) = std::env::var("LOG_DIR") {
            config.file = Some(LogFileConfig {
                dir: PathBuf::from(dir),
                prefix: std::env::var("LOG_FILE_PREFIX").unwrap_or_else(|_| "bix".to_string()),
            });
        }

        Ok(config)
    }

    /// Override the filter directives
    pub fn with_directives(mut self, directives: impl Into<String>) -> Self {
        self.directives = directives.into();
        self
    }
}

/// Initialise the global tracing subscriber
///
/// Call once at startup. Returns an error if a subscriber is already
/// installed or a filter directive fails to parse.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&config.directives)
        .context("Failed to parse log filter directives")?;

    let console_layer = match config.format {
        LogFormat::Text => fmt::layer().with_target(true).boxed(),
        LogFormat::Json => fmt::layer().json().with_target(true).boxed(),
    };

    let file_layer = match &config.file {
        Some(file) => {
            std::fs::create_dir_all(&file.dir).context("Failed to create log directory")?;
            let appender = tracing_appender::rolling::daily(&file.dir, &file.prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            // The guard must outlive the process for the sink to keep flushing.
            std::mem::forget(guard);

            let layer = match config.format {
                LogFormat::Text => fmt::layer().with_writer(writer).with_ansi(false).boxed(),
                LogFormat::Json => fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_ansi(false)
                    .boxed(),
            };
            Some(layer)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("yaml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.directives, "info");
        assert_eq!(config.format, LogFormat::Text);
        assert!(config.file.is_none());
    }

    #[test]
    fn test_with_directives() {
        let config = LogConfig::default().with_directives("bix_server=debug");
        assert_eq!(config.directives, "bix_server=debug");
    }
}
