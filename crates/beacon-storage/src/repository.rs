//! Typed access to the key/value store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StorageError;
use crate::kv::KvStore;
use crate::models::{ConfigEntry, MonitoredSource, StatusChangeEvent, WebhookTarget};

pub const SOURCES: &str = "sources";
pub const STATUS_CHANGES: &str = "status_changes";
pub const CONFIG: &str = "config";
pub const WEBHOOKS: &str = "webhooks";
pub const SOURCE_WEBHOOKS: &str = "source_webhooks";
pub const SOURCE_CHATS: &str = "source_chats";

/// Composite key of a status change. Sorts chronologically within a source.
fn event_key(source_id: &str, at: DateTime<Utc>) -> String {
    let nanos = at.timestamp_nanos_opt().unwrap_or_default().max(0);
    format!("{}:{:020}", source_id, nanos)
}

fn link_key(source_id: &str, other: &str) -> String {
    format!("{}:{}", source_id, other)
}

fn link_prefix(source_id: &str) -> String {
    format!("{}:", source_id)
}

/// Repository over a [`KvStore`].
///
/// Read-modify-write operations are serialized through an internal lock so
/// concurrent updates of different fields never lose each other.
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn KvStore>,
    write_lock: Arc<Mutex<()>>,
}

impl Repository {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Repository backed by a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(crate::kv::MemoryStore::new()))
    }

    async fn read<T: DeserializeOwned>(&self, bucket: &str, key: &str) -> Result<Option<T>, StorageError> {
        match self.store.get(bucket, key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn write<T: Serialize>(&self, bucket: &str, key: &str, value: &T) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(value)?;
        self.store.put(bucket, key, bytes).await
    }

    async fn scan<T: DeserializeOwned>(&self, bucket: &str, prefix: &str) -> Result<Vec<T>, StorageError> {
        self.store
            .scan_prefix(bucket, prefix)
            .await?
            .into_iter()
            .map(|(_, bytes)| serde_json::from_slice(&bytes).map_err(StorageError::from))
            .collect()
    }

    async fn delete_prefix(&self, bucket: &str, prefix: &str) -> Result<usize, StorageError> {
        let keys = self.store.scan_prefix(bucket, prefix).await?;
        let count = keys.len();
        for (key, _) in keys {
            self.store.delete(bucket, &key).await?;
        }
        Ok(count)
    }

    async fn require_source(&self, id: &str) -> Result<MonitoredSource, StorageError> {
        self.get_source(id)
            .await?
            .ok_or_else(|| StorageError::not_found(SOURCES, id))
    }

    // ---- sources ----

    pub async fn save_source(&self, source: &MonitoredSource) -> Result<(), StorageError> {
        self.write(SOURCES, &source.id, source).await
    }

    pub async fn get_source(&self, id: &str) -> Result<Option<MonitoredSource>, StorageError> {
        self.read(SOURCES, id).await
    }

    pub async fn list_sources(&self) -> Result<Vec<MonitoredSource>, StorageError> {
        self.scan(SOURCES, "").await
    }

    pub async fn enabled_sources(&self) -> Result<Vec<MonitoredSource>, StorageError> {
        Ok(self
            .list_sources()
            .await?
            .into_iter()
            .filter(|s| s.enabled)
            .collect())
    }

    /// Delete a source together with its links and history.
    pub async fn delete_source(&self, id: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        self.store.delete(SOURCES, id).await?;
        let prefix = link_prefix(id);
        self.delete_prefix(SOURCE_WEBHOOKS, &prefix).await?;
        self.delete_prefix(SOURCE_CHATS, &prefix).await?;
        let events = self.delete_prefix(STATUS_CHANGES, &prefix).await?;
        debug!(source_id = %id, events, "Deleted source");
        Ok(())
    }

    pub async fn find_source_by_token(&self, token: &str) -> Result<Option<MonitoredSource>, StorageError> {
        if token.is_empty() {
            return Ok(None);
        }
        Ok(self
            .list_sources()
            .await?
            .into_iter()
            .find(|s| s.heartbeat_token.as_deref() == Some(token)))
    }

    /// Persist status, change time and check time from `source`.
    ///
    /// Other fields of the stored record (notably `enabled`) are kept.
    pub async fn update_status_fields(&self, source: &MonitoredSource) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut stored = self.require_source(&source.id).await?;
        stored.status = source.status;
        stored.last_change_time = source.last_change_time;
        stored.last_check_time = source.last_check_time;
        self.save_source(&stored).await
    }

    /// Record a check that did not change the status.
    pub async fn touch_last_check(&self, id: &str, at: DateTime<Utc>) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut stored = self.require_source(id).await?;
        stored.last_check_time = Some(at);
        self.save_source(&stored).await
    }

    /// Set the enabled flag. Nothing is written when it already matches.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<MonitoredSource, StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut stored = self.require_source(id).await?;
        if stored.enabled != enabled {
            stored.enabled = enabled;
            self.save_source(&stored).await?;
        }
        Ok(stored)
    }

    /// Persist an inbound heartbeat: status online, check time `at`.
    pub async fn record_heartbeat(&self, id: &str, at: DateTime<Utc>) -> Result<MonitoredSource, StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut stored = self.require_source(id).await?;
        stored.record_heartbeat(at);
        self.save_source(&stored).await?;
        Ok(stored)
    }

    // ---- status changes ----

    pub async fn save_status_change(&self, event: &StatusChangeEvent) -> Result<(), StorageError> {
        let key = event_key(&event.source_id, event.timestamp);
        self.write(STATUS_CHANGES, &key, event).await
    }

    /// Most recent events of one source, newest first.
    pub async fn status_changes(&self, source_id: &str, limit: usize) -> Result<Vec<StatusChangeEvent>, StorageError> {
        let rows = self
            .store
            .scan_prefix(STATUS_CHANGES, &link_prefix(source_id))
            .await?;
        rows.into_iter()
            .rev()
            .take(limit)
            .map(|(_, bytes)| serde_json::from_slice(&bytes).map_err(StorageError::from))
            .collect()
    }

    /// Most recent events across all sources, newest first.
    pub async fn recent_changes(&self, limit: usize) -> Result<Vec<StatusChangeEvent>, StorageError> {
        let mut events: Vec<StatusChangeEvent> = self.scan(STATUS_CHANGES, "").await?;
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        events.truncate(limit);
        Ok(events)
    }

    pub async fn last_status_change(&self, source_id: &str) -> Result<Option<StatusChangeEvent>, StorageError> {
        Ok(self.status_changes(source_id, 1).await?.into_iter().next())
    }

    /// Delete events older than `cutoff`. Returns how many were removed.
    pub async fn purge_status_changes(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let rows = self.store.scan_prefix(STATUS_CHANGES, "").await?;
        let mut removed = 0;
        for (key, bytes) in rows {
            let event: StatusChangeEvent = serde_json::from_slice(&bytes)?;
            if event.timestamp < cutoff {
                self.store.delete(STATUS_CHANGES, &key).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    // ---- config ----

    pub async fn get_config(&self, key: &str) -> Result<Option<ConfigEntry>, StorageError> {
        self.read(CONFIG, key).await
    }

    pub async fn set_config(&self, entry: &ConfigEntry) -> Result<(), StorageError> {
        self.write(CONFIG, &entry.key, entry).await
    }

    pub async fn delete_config(&self, key: &str) -> Result<(), StorageError> {
        self.store.delete(CONFIG, key).await
    }

    pub async fn list_config(&self) -> Result<Vec<ConfigEntry>, StorageError> {
        self.scan(CONFIG, "").await
    }

    // ---- webhooks ----

    pub async fn save_webhook(&self, webhook: &WebhookTarget) -> Result<(), StorageError> {
        self.write(WEBHOOKS, &webhook.id, webhook).await
    }

    pub async fn get_webhook(&self, id: &str) -> Result<Option<WebhookTarget>, StorageError> {
        self.read(WEBHOOKS, id).await
    }

    pub async fn list_webhooks(&self) -> Result<Vec<WebhookTarget>, StorageError> {
        self.scan(WEBHOOKS, "").await
    }

    pub async fn delete_webhook(&self, id: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        self.store.delete(WEBHOOKS, id).await?;
        let suffix = format!(":{}", id);
        for (key, _) in self.store.scan_prefix(SOURCE_WEBHOOKS, "").await? {
            if key.ends_with(&suffix) {
                self.store.delete(SOURCE_WEBHOOKS, &key).await?;
            }
        }
        Ok(())
    }

    pub async fn link_webhook(&self, source_id: &str, webhook_id: &str) -> Result<(), StorageError> {
        self.store
            .put(SOURCE_WEBHOOKS, &link_key(source_id, webhook_id), webhook_id.as_bytes().to_vec())
            .await
    }

    pub async fn unlink_webhook(&self, source_id: &str, webhook_id: &str) -> Result<(), StorageError> {
        self.store
            .delete(SOURCE_WEBHOOKS, &link_key(source_id, webhook_id))
            .await
    }

    /// Webhooks linked to a source. Dangling links are skipped.
    pub async fn source_webhooks(&self, source_id: &str) -> Result<Vec<WebhookTarget>, StorageError> {
        let links = self
            .store
            .scan_prefix(SOURCE_WEBHOOKS, &link_prefix(source_id))
            .await?;
        let mut hooks = Vec::with_capacity(links.len());
        for (_, id) in links {
            let id = String::from_utf8_lossy(&id).into_owned();
            if let Some(hook) = self.get_webhook(&id).await? {
                hooks.push(hook);
            }
        }
        Ok(hooks)
    }

    pub async fn mark_webhook_triggered(&self, id: &str, at: DateTime<Utc>) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut hook = self
            .get_webhook(id)
            .await?
            .ok_or_else(|| StorageError::not_found(WEBHOOKS, id))?;
        hook.last_triggered = Some(at);
        self.save_webhook(&hook).await
    }

    // ---- chat subscriptions ----

    pub async fn subscribe_chat(&self, source_id: &str, chat_id: i64) -> Result<(), StorageError> {
        self.store
            .put(
                SOURCE_CHATS,
                &link_key(source_id, &chat_id.to_string()),
                chat_id.to_string().into_bytes(),
            )
            .await
    }

    pub async fn unsubscribe_chat(&self, source_id: &str, chat_id: i64) -> Result<(), StorageError> {
        self.store
            .delete(SOURCE_CHATS, &link_key(source_id, &chat_id.to_string()))
            .await
    }

    /// Chats subscribed to a source.
    pub async fn source_chats(&self, source_id: &str) -> Result<Vec<i64>, StorageError> {
        let rows = self
            .store
            .scan_prefix(SOURCE_CHATS, &link_prefix(source_id))
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(_, v)| String::from_utf8_lossy(&v).parse().ok())
            .collect())
    }
}

#[cfg(test)]
#[path = "repository_tests.rs"]
mod tests;
