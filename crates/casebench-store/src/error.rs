//! Error types for casebench-store

use thiserror::Error;

/// Errors raised by result stores.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("run not found: {run_id}")]
    NotFound { run_id: String },

    /// Run ids become file names, so separators and empty ids are refused.
    #[error("invalid run id: {run_id:?}")]
    InvalidRunId { run_id: String },
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
