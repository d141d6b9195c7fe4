//! Error types for the Hippocampus memory runtime
//!
//! This module provides crate-level error handling using thiserror for
//! structured error definitions and anyhow for error propagation at the
//! binary edge. Scheduler-local failures live in `scheduler::JobError` and
//! `scheduler::SchedulerError`; they never escape as `HippocampusError`.

use thiserror::Error;

/// Main error type for Hippocampus operations
#[derive(Error, Debug)]
pub enum HippocampusError {
    /// Storage backend rejected or failed an operation
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Task specification rejected at registration
    #[error("Invalid task: {0}")]
    InvalidTask(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for Hippocampus operations
pub type Result<T> = std::result::Result<T, HippocampusError>;

/// Convert anyhow::Error to HippocampusError
impl From<anyhow::Error> for HippocampusError {
    fn from(err: anyhow::Error) -> Self {
        HippocampusError::Other(err.to_string())
    }
}

impl From<rusqlite::Error> for HippocampusError {
    fn from(err: rusqlite::Error) -> Self {
        HippocampusError::Database(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HippocampusError::InvalidTask("interval must be positive".to_string());
        assert_eq!(err.to_string(), "Invalid task: interval must be positive");
    }

    #[test]
    fn test_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json");
        assert!(json_err.is_err());

        let err: HippocampusError = json_err.unwrap_err().into();
        assert!(matches!(err, HippocampusError::Serialization(_)));
    }

    #[test]
    fn test_anyhow_conversion() {
        let err: HippocampusError = anyhow::anyhow!("boom").into();
        assert_eq!(err.to_string(), "boom");
    }
}
