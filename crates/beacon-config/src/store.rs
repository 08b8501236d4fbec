//! Persisted live configuration with change subscriptions.

use std::collections::HashMap;

use beacon_storage::{ConfigEntry, Repository};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::settings::{Settings, is_secret, keys, mask_secret};

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// A committed configuration write.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigChange {
    pub key: String,
    /// New value, or `None` when the key was deleted.
    pub value: Option<String>,
}

/// Live configuration store.
///
/// Values are cached in memory and persisted in the `config` bucket.
/// Subscribers are notified after each write has been persisted; nothing
/// runs inside the write path itself.
pub struct ConfigStore {
    repo: Repository,
    cache: RwLock<HashMap<String, String>>,
    changes: broadcast::Sender<ConfigChange>,
}

impl ConfigStore {
    pub fn new(repo: Repository) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            repo,
            cache: RwLock::new(HashMap::new()),
            changes,
        }
    }

    /// Load persisted values, or seed them from the process environment on
    /// first boot.
    pub async fn load(&self) -> Result<(), ConfigError> {
        self.load_with(|key| std::env::var(key).ok()).await
    }

    /// Like [`load`](Self::load) with an explicit environment lookup.
    pub async fn load_with<F>(&self, env: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let entries = self.repo.list_config().await?;
        let mut values = HashMap::new();

        if !entries.is_empty() {
            info!("Loading configuration from database ({} entries)", entries.len());
            for entry in entries {
                values.insert(entry.key, entry.value);
            }
        } else {
            info!("No stored configuration, reading environment");
            for key in keys::ALL {
                let Some(value) = env(key).filter(|v| !v.is_empty()) else {
                    continue;
                };
                if let Err(e) = self.repo.set_config(&ConfigEntry::new(*key, &value, "env")).await {
                    warn!("Failed to persist {} from environment: {}", key, e);
                }
                values.insert(key.to_string(), value);
            }
        }

        for (key, value) in Settings::default_values() {
            values.entry(key).or_insert(value);
        }

        let count = values.len();
        *self.cache.write() = values;
        info!("Loaded {} configuration values", count);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.cache.read().get(key).cloned()
    }

    /// Copy of every cached value.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.cache.read().clone()
    }

    /// Snapshot with secret values masked.
    pub fn masked_snapshot(&self) -> HashMap<String, String> {
        self.snapshot()
            .into_iter()
            .map(|(k, v)| {
                let v = if is_secret(&k) { mask_secret(&v) } else { v };
                (k, v)
            })
            .collect()
    }

    /// Parsed settings from the current values.
    pub fn settings(&self) -> Settings {
        Settings::from_map(&self.cache.read())
    }

    /// Persist a value and notify subscribers.
    pub async fn set(&self, key: &str, value: &str, updated_by: &str) -> Result<(), ConfigError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::invalid("key", "must not be empty"));
        }
        Settings::check_value(key, value)?;

        self.repo
            .set_config(&ConfigEntry::new(key, value, updated_by))
            .await?;
        self.cache.write().insert(key.to_string(), value.to_string());
        info!("Config updated: {}", key);

        self.publish(ConfigChange {
            key: key.to_string(),
            value: Some(value.to_string()),
        });
        Ok(())
    }

    /// Remove a value and notify subscribers. Defaults apply afterwards.
    pub async fn delete(&self, key: &str) -> Result<(), ConfigError> {
        self.repo.delete_config(key).await?;
        {
            let mut cache = self.cache.write();
            cache.remove(key);
            if let Some(default) = Settings::default_values().remove(key) {
                cache.insert(key.to_string(), default);
            }
        }
        info!("Config deleted: {}", key);

        self.publish(ConfigChange {
            key: key.to_string(),
            value: None,
        });
        Ok(())
    }

    /// Receive every committed change from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.changes.subscribe()
    }

    fn publish(&self, change: ConfigChange) {
        // No receivers is fine: nobody is interested yet.
        let _ = self.changes.send(change);
    }
}
