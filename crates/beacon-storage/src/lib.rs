//! # Beacon Storage
//!
//! Durable persistence for monitored sources, status-change history,
//! live configuration and notification targets.
//!
//! ## Layers
//!
//! - [`KvStore`]: bucketed key/value store with ordered prefix scans
//!   ([`MemoryStore`] for tests, [`SqliteStore`] for deployments)
//! - [`Repository`]: typed operations over a `KvStore`
//! - [`models`]: the persisted records

pub mod error;
pub mod kv;
pub mod models;
pub mod repository;
pub mod sqlite;

pub use error::StorageError;
pub use kv::{KvStore, MemoryStore};
pub use models::{
    CheckKind, CheckOutcome, ConfigEntry, MonitoredSource, SourceStatus, StatusChangeEvent,
    WebhookTarget,
};
pub use repository::Repository;
pub use sqlite::SqliteStore;
