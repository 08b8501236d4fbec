//! Key/value store abstraction.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StorageError;

/// Bucketed key/value store.
///
/// Writes must be durable before the call returns. Keys within a bucket are
/// ordered bytewise, so `scan_prefix` yields records in ascending key order.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value.
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Insert or replace a value.
    async fn put(&self, bucket: &str, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

    /// Delete a value. Deleting a missing key is not an error.
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError>;

    /// All entries whose key starts with `prefix`, ordered by key.
    async fn scan_prefix(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, StorageError>;
}

/// In-memory store for testing.
pub struct MemoryStore {
    buckets: RwLock<HashMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    /// Create a new memory store.
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let buckets = self.buckets.read().await;
        Ok(buckets.get(bucket).and_then(|b| b.get(key)).cloned())
    }

    async fn put(&self, bucket: &str, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        let mut buckets = self.buckets.write().await;
        buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        let mut buckets = self.buckets.write().await;
        if let Some(b) = buckets.get_mut(bucket) {
            b.remove(key);
        }
        Ok(())
    }

    async fn scan_prefix(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let buckets = self.buckets.read().await;
        let Some(b) = buckets.get(bucket) else {
            return Ok(Vec::new());
        };

        Ok(b.range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_put_get() {
        let store = MemoryStore::new();
        store.put("b", "k", b"v".to_vec()).await.unwrap();

        assert_eq!(store.get("b", "k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.get("b", "missing").await.unwrap(), None);
        assert_eq!(store.get("other", "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_store_delete() {
        let store = MemoryStore::new();
        store.put("b", "k", b"v".to_vec()).await.unwrap();
        store.delete("b", "k").await.unwrap();
        store.delete("b", "never-existed").await.unwrap();

        assert!(store.get("b", "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_scan_prefix_is_ordered() {
        let store = MemoryStore::new();
        for key in ["a:3", "a:1", "b:1", "a:2", "ab:1"] {
            store.put("b", key, key.as_bytes().to_vec()).await.unwrap();
        }

        let keys: Vec<String> = store
            .scan_prefix("b", "a:")
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();

        assert_eq!(keys, vec!["a:1", "a:2", "a:3"]);
    }

    #[tokio::test]
    async fn test_memory_store_scan_empty_prefix_returns_all() {
        let store = MemoryStore::new();
        store.put("b", "x", vec![1]).await.unwrap();
        store.put("b", "y", vec![2]).await.unwrap();

        assert_eq!(store.scan_prefix("b", "").await.unwrap().len(), 2);
        assert!(store.scan_prefix("empty", "").await.unwrap().is_empty());
    }
}
