//! Error types for the fleet deployer

use std::time::Duration;

use thiserror::Error;

/// Main error type for the fleet deployer
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Inventory error (row {row}): {message}")]
    InventoryError { row: usize, message: String },

    #[error("Unsupported platform: '{0}' (must be one of: macos, radxa, raspberrypi)")]
    UnsupportedPlatform(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Timed out after {}s", .0.as_secs())]
    TimeoutError(Duration),

    #[error("Remote execution failed (exit {exit_code}): {summary}")]
    RemoteExecutionError { exit_code: i32, summary: String },

    #[error("State store error: {0}")]
    StateStoreError(String),

    #[error("Install payload error: {0}")]
    PayloadError(String),

    #[error("Monitoring API error: {0}")]
    ApiError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployError {
    /// Whether the error belongs to a single device attempt.
    ///
    /// Per-device errors are converted into a failed attempt at the worker
    /// boundary. Of the rest, state store and internal errors abort the run
    /// while controller-side faults fail the attempt and are logged loudly.
    pub fn is_per_device(&self) -> bool {
        matches!(
            self,
            DeployError::UnsupportedPlatform(_)
                | DeployError::ConnectionError(_)
                | DeployError::TimeoutError(_)
                | DeployError::RemoteExecutionError { .. }
                | DeployError::PayloadError(_)
        )
    }

    /// Short stable tag recorded next to the error text in the state file
    pub fn classification(&self) -> &'static str {
        match self {
            DeployError::IoError(_) => "io",
            DeployError::JsonError(_) => "json",
            DeployError::CsvError(_) => "csv",
            DeployError::HttpError(_) => "http",
            DeployError::InventoryError { .. } => "inventory",
            DeployError::UnsupportedPlatform(_) => "unsupported-platform",
            DeployError::ConnectionError(_) => "connection",
            DeployError::TimeoutError(_) => "timeout",
            DeployError::RemoteExecutionError { .. } => "remote-exit",
            DeployError::StateStoreError(_) => "state-store",
            DeployError::PayloadError(_) => "payload",
            DeployError::ApiError(_) => "api",
            DeployError::ConfigError(_) => "config",
            DeployError::Internal(_) => "internal",
        }
    }

    /// Human-readable one-line summary stored as `error_summary`
    pub fn summary(&self) -> String {
        format!("[{}] {}", self.classification(), self)
    }
}

impl From<anyhow::Error> for DeployError {
    fn from(err: anyhow::Error) -> Self {
        DeployError::Internal(err.to_string())
    }
}
