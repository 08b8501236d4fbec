//! SQLite-backed key/value store.

use std::path::Path;

use async_trait::async_trait;
use rusqlite::{OptionalExtension, params};
use tokio_rusqlite::Connection;
use tracing::debug;

use crate::error::StorageError;
use crate::kv::KvStore;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    bucket TEXT NOT NULL,
    key TEXT NOT NULL,
    value BLOB NOT NULL,
    PRIMARY KEY (bucket, key)
) WITHOUT ROWID;
"#;

/// SQLite key/value store.
///
/// Every bucket lives in a single table keyed by `(bucket, key)`. Writes run
/// in autocommit mode, so they are durable once the call returns.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) a database file.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let conn = Connection::open(&path).await?;
        conn.call(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "FULL")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        debug!("SqliteStore initialized at {:?}", path);
        Ok(Self { conn })
    }

    /// Create a new in-memory database.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().await?;
        conn.call(|conn| Ok(conn.execute_batch(SCHEMA)?)).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        let value = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT value FROM kv WHERE bucket = ?1 AND key = ?2",
                        params![bucket, key],
                        |row| row.get::<_, Vec<u8>>(0),
                    )
                    .optional()?)
            })
            .await?;
        Ok(value)
    }

    async fn put(&self, bucket: &str, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO kv (bucket, key, value) VALUES (?1, ?2, ?3)
                     ON CONFLICT(bucket, key) DO UPDATE SET value = excluded.value",
                    params![bucket, key, value],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM kv WHERE bucket = ?1 AND key = ?2",
                    params![bucket, key],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn scan_prefix(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let bucket = bucket.to_string();
        let prefix = prefix.to_string();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT key, value FROM kv
                     WHERE bucket = ?1 AND key >= ?2
                     ORDER BY key",
                )?;
                let mut rows = stmt.query(params![bucket, prefix])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    let key: String = row.get(0)?;
                    if !key.starts_with(&prefix) {
                        break;
                    }
                    out.push((key, row.get::<_, Vec<u8>>(1)?));
                }
                Ok(out)
            })
            .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sqlite_store_roundtrip_on_disk() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("state.db");

        {
            let store = SqliteStore::open(&path).await.unwrap();
            store.put("sources", "a", b"one".to_vec()).await.unwrap();
            store.put("sources", "a", b"two".to_vec()).await.unwrap();
        }

        let reopened = SqliteStore::open(&path).await.unwrap();
        assert_eq!(
            reopened.get("sources", "a").await.unwrap(),
            Some(b"two".to_vec())
        );
    }

    #[tokio::test]
    async fn test_sqlite_store_delete() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.put("b", "k", vec![1]).await.unwrap();
        store.delete("b", "k").await.unwrap();
        store.delete("b", "k").await.unwrap();
        assert!(store.get("b", "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_store_scan_prefix_stays_in_bucket() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.put("events", "s1:002", vec![2]).await.unwrap();
        store.put("events", "s1:001", vec![1]).await.unwrap();
        store.put("events", "s2:001", vec![3]).await.unwrap();
        store.put("other", "s1:000", vec![9]).await.unwrap();

        let rows = store.scan_prefix("events", "s1:").await.unwrap();
        let keys: Vec<&str> = rows.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["s1:001", "s1:002"]);
    }
}
