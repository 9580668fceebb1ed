//! SQLite-backed durable store

use std::fmt::Display;
use std::marker::PhantomData;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};

use super::{migrations, DurableStore, StoreError, StoreResult};

/// Durable store keeping JSON-encoded values in one namespace of a shared
/// `cache_entries` table. Several caches can share a pool with distinct
/// namespaces.
pub struct SqliteStore<K, V> {
    pool: Pool<SqliteConnectionManager>,
    namespace: String,
    _marker: PhantomData<fn(K) -> V>,
}

impl<K, V> SqliteStore<K, V> {
    /// Open (or create) a database file and run migrations
    pub fn open(path: impl AsRef<Path>, namespace: impl Into<String>) -> StoreResult<Self> {
        let pool = Pool::new(SqliteConnectionManager::file(path))?;
        Self::with_pool(pool, namespace)
    }

    /// In-memory database; a single connection so every caller sees the same data
    pub fn in_memory(namespace: impl Into<String>) -> StoreResult<Self> {
        let pool = Pool::builder()
            .max_size(1)
            .build(SqliteConnectionManager::memory())?;
        Self::with_pool(pool, namespace)
    }

    pub fn with_pool(
        pool: Pool<SqliteConnectionManager>,
        namespace: impl Into<String>,
    ) -> StoreResult<Self> {
        migrations::migrate(&pool)?;
        Ok(Self {
            pool,
            namespace: namespace.into(),
            _marker: PhantomData,
        })
    }

    /// Another namespace over the same pool
    pub fn namespace<K2, V2>(&self, namespace: impl Into<String>) -> SqliteStore<K2, V2> {
        SqliteStore {
            pool: self.pool.clone(),
            namespace: namespace.into(),
            _marker: PhantomData,
        }
    }

    /// Remove every entry in this namespace, returning how many went
    pub fn clear_namespace(&self) -> StoreResult<usize> {
        let conn = self.pool.get()?;
        let removed = conn.execute(
            "DELETE FROM cache_entries WHERE namespace = ?",
            params![self.namespace],
        )?;
        Ok(removed)
    }
}

impl<K, V> DurableStore<K, V> for SqliteStore<K, V>
where
    K: Display,
    V: Serialize + DeserializeOwned,
{
    fn read(&self, key: &K) -> StoreResult<Option<V>> {
        let key = key.to_string();
        let conn = self.pool.get()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM cache_entries WHERE namespace = ? AND key = ?",
                params![self.namespace, key],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|json| {
            serde_json::from_str(&json).map_err(|e| StoreError::Corrupted {
                key,
                reason: e.to_string(),
            })
        })
        .transpose()
    }

    fn write(&self, key: &K, value: &V) -> StoreResult<()> {
        let json =
            serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();

        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO cache_entries (namespace, key, value, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value,
                                                       updated_at = excluded.updated_at",
            params![self.namespace, key.to_string(), json, now],
        )?;
        Ok(())
    }

    fn delete(&self, key: &K) -> StoreResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "DELETE FROM cache_entries WHERE namespace = ? AND key = ?",
            params![self.namespace, key.to_string()],
        )?;
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        self.clear_namespace().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_read_delete() {
        let store: SqliteStore<String, Vec<u32>> = SqliteStore::in_memory("friends").unwrap();
        let key = "alice".to_string();
        assert_eq!(store.read(&key).unwrap(), None);

        store.write(&key, &vec![1, 2]).unwrap();
        store.write(&key, &vec![3]).unwrap();
        assert_eq!(store.read(&key).unwrap(), Some(vec![3]));

        store.delete(&key).unwrap();
        assert_eq!(store.read(&key).unwrap(), None);
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let circles: SqliteStore<u64, String> = SqliteStore::in_memory("circles").unwrap();
        let nearby: SqliteStore<u64, String> = circles.namespace("nearby");

        circles.write(&1, &"park".to_string()).unwrap();
        assert_eq!(nearby.read(&1).unwrap(), None);
        assert_eq!(circles.clear_namespace().unwrap(), 1);
        assert_eq!(circles.read(&1).unwrap(), None);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.db");
        {
            let store: SqliteStore<u64, String> = SqliteStore::open(&path, "circles").unwrap();
            store.write(&7, &"library".to_string()).unwrap();
        }

        let reopened: SqliteStore<u64, String> = SqliteStore::open(&path, "circles").unwrap();
        assert_eq!(reopened.read(&7).unwrap(), Some("library".to_string()));
    }

    #[test]
    fn test_corrupted_value_is_reported() {
        let store: SqliteStore<u64, Vec<u32>> = SqliteStore::in_memory("blocked").unwrap();
        let text: SqliteStore<u64, String> = store.namespace("blocked");
        text.write(&1, &"not a list".to_string()).unwrap();

        let err = store.read(&1).unwrap_err();
        assert!(matches!(err, StoreError::Corrupted { .. }));
    }
}
