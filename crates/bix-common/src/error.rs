//! Error types shared across the BIX workspace
//!
//! Errors carry enough context to tell the operator what failed and where,
//! without leaking internals into HTTP responses.

use thiserror::Error;

/// Result type alias for BIX operations
pub type Result<T> = std::result::Result<T, BixError>;

/// Workspace-wide error type
#[derive(Error, Debug)]
pub enum BixError {
    /// File system operations failed (read, write, create directory, etc.)
    #[error("File operation failed: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("Failed to process JSON data: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Network request failed
    #[error("Network request to '{url}' failed: {reason}")]
    Network { url: String, reason: String },

    /// Failed to parse input data
    #[error("Failed to parse {data_type}: {reason}")]
    Parse { data_type: String, reason: String },

    /// Configuration is missing or invalid
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl BixError {
    /// Shorthand for a network failure against a given URL
    pub fn network(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        BixError::Network {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for a parse failure of a named input shape
    pub fn parse(data_type: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        BixError::Parse {
            data_type: data_type.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_error_display() {
        let err = BixError::network("https://example.com/data.csv", "connection refused");
        let msg = err.to_string();
        assert!(msg.contains("https://example.com/data.csv"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn test_parse_error_display() {
        let err = BixError::parse("ndjson record", "unexpected end of input");
        assert!(err.to_string().contains("ndjson record"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: BixError = io.into();
        assert!(matches!(err, BixError::Io(_)));
    }
}
