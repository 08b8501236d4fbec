//! Monitor errors.

use beacon_storage::StorageError;
use thiserror::Error;

/// Monitor error types.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// A check task for this source is already running.
    #[error("Source already monitored: {0}")]
    AlreadyMonitored(String),

    /// No check task is running for this source.
    #[error("Source not monitored: {0}")]
    NotMonitored(String),

    /// Source exists neither in the cache nor in storage.
    #[error("Source not found: {0}")]
    SourceNotFound(String),

    /// Notification delivery failed.
    #[error("Delivery failed via {channel}: {message}")]
    Delivery { channel: String, message: String },

    /// Chat channel credential was rejected.
    #[error("Chat channel rejected credential: {0}")]
    Credential(String),

    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl MonitorError {
    pub fn delivery(channel: &str, message: impl Into<String>) -> Self {
        Self::Delivery {
            channel: channel.to_string(),
            message: message.into(),
        }
    }
}
