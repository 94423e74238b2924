use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Row, Sqlite, sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous}};
use tokio::sync::RwLock;

use crate::error::StoreError;

/// Durable key/value storage shared by the session and document layers.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<bool, StoreError>;
    /// All entries whose key starts with `prefix`, ordered by key.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError>;
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    pub async fn initialize(database_url: Option<String>) -> Result<Self, StoreError> {
        let url = match database_url {
            Some(u) => u,
            None => resolve_default_db_url()?,
        };
        let options = url.parse::<SqliteConnectOptions>()?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);
        let pool = Pool::<Sqlite>::connect_with(options).await?;
        sqlx::query("PRAGMA busy_timeout = 5000;").execute(&pool).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::debug!(%url, "sqlite store ready");
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub fn pool(&self) -> &Pool<Sqlite> { &self.pool }
}

fn resolve_default_db_url() -> Result<String, StoreError> {
    let base = std::env::var("XDG_DATA_HOME").ok().map(PathBuf::from).unwrap_or_else(|| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        PathBuf::from(home).join(".local").join("share")
    });
    let dir = base.join("docchat");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("docchat.db");
    Ok(format!("sqlite://{}", path.to_string_lossy()))
}

#[async_trait]
impl PersistentStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let res = sqlx::query("DELETE FROM kv WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        let rows = sqlx::query("SELECT key, value FROM kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key")
            .bind(prefix)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<String, _>("key"), r.get::<String, _>("value")))
            .collect())
    }
}

/// In-process store; contents vanish with the process.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.write().await.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn exercise(store: &dyn PersistentStore) {
        assert_eq!(store.get("chat/a").await.unwrap(), None);
        store.put("chat/a", "1").await.unwrap();
        store.put("chat/b", "2").await.unwrap();
        store.put("chatter/c", "3").await.unwrap();
        store.put("documents/u", "4").await.unwrap();

        store.put("chat/a", "updated").await.unwrap();
        assert_eq!(store.get("chat/a").await.unwrap().as_deref(), Some("updated"));

        let scanned = store.scan_prefix("chat/").await.unwrap();
        assert_eq!(
            scanned,
            vec![("chat/a".to_string(), "updated".to_string()), ("chat/b".to_string(), "2".to_string())]
        );

        assert!(store.remove("chat/a").await.unwrap());
        assert!(!store.remove("chat/a").await.unwrap());
        assert_eq!(store.scan_prefix("chat/").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn memory_store_contract() {
        exercise(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn sqlite_store_contract() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let url = format!("sqlite://{}", path.to_string_lossy());
        let store = SqliteStore::initialize(Some(url)).await.unwrap();
        exercise(&store).await;
    }

    #[tokio::test]
    async fn sqlite_pragmas_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let url = format!("sqlite://{}", path.to_string_lossy());
        let store = SqliteStore::initialize(Some(url.clone())).await.unwrap();
        store.put("k", "v").await.unwrap();

        let row = sqlx::query("PRAGMA journal_mode;").fetch_one(store.pool()).await.unwrap();
        let mode: String = row.get(0);
        assert!(mode.eq_ignore_ascii_case("wal"), "journal_mode should be WAL, got {}", mode);

        // Migrations are idempotent and data survives a reopen.
        let reopened = SqliteStore::initialize(Some(url)).await.unwrap();
        assert_eq!(reopened.get("k").await.unwrap().as_deref(), Some("v"));
    }
}
