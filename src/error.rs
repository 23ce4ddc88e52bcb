//! Error types for WaveDiff
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

use crate::domain::{RunKind, RunStatus};

/// All error types that can occur in the orchestration engine
#[derive(Debug, Error)]
pub enum WavediffError {
    /// Run not found in storage
    #[error("{kind} run not found: {id}")]
    RunNotFound { kind: RunKind, id: i64 },

    /// Generation requested against a training run that has not succeeded
    #[error("Training run {train_run_id} status: {status}")]
    NotReady { train_run_id: i64, status: RunStatus },

    /// Some other precondition does not hold
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Submitted parameters are out of range
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// A worker program exited unsuccessfully
    #[error("Worker failed: {diagnostic}")]
    WorkerFailed { run_id: Option<i64>, diagnostic: String },

    /// Requested generated image does not exist
    #[error("Image not found: {0}")]
    ImageNotFound(String),

    /// Storage/persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for WaveDiff operations
pub type Result<T> = std::result::Result<T, WavediffError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_not_found_error() {
        let err = WavediffError::RunNotFound {
            kind: RunKind::Train,
            id: 7,
        };
        assert_eq!(err.to_string(), "train run not found: 7");
    }

    #[test]
    fn test_not_ready_names_status() {
        let err = WavediffError::NotReady {
            train_run_id: 3,
            status: RunStatus::Failed,
        };
        assert_eq!(err.to_string(), "Training run 3 status: failed");
    }

    #[test]
    fn test_worker_failed_error() {
        let err = WavediffError::WorkerFailed {
            run_id: Some(1),
            diagnostic: "Traceback: boom".to_string(),
        };
        assert_eq!(err.to_string(), "Worker failed: Traceback: boom");
    }

    #[test]
    fn test_invalid_params_error() {
        let err = WavediffError::InvalidParams("epochs must be positive".to_string());
        assert_eq!(err.to_string(), "Invalid parameters: epochs must be positive");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: WavediffError = io_err.into();
        assert!(matches!(err, WavediffError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: WavediffError = json_err.into();
        assert!(matches!(err, WavediffError::Json(_)));
    }

    #[test]
    fn test_sqlite_error_conversion() {
        let err: WavediffError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, WavediffError::Sqlite(_)));
    }
}
