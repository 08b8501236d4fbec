//! Storage errors.

use thiserror::Error;

/// Storage error types.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Record not found.
    #[error("Record not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend (database) error.
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Create a not-found error.
    pub fn not_found(bucket: &str, key: &str) -> Self {
        Self::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }

    /// Whether this error reports a missing record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<tokio_rusqlite::Error> for StorageError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        Self::Backend(e.to_string())
    }
}
