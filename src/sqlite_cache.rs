//! SQLite-backed [`TranslationCache`].
//!
//! One row per cache key. Inserts use `ON CONFLICT DO NOTHING`, so the first
//! translation stored for a key is the one every later lookup returns.
//! SQLite in WAL mode serializes writers internally; concurrent writes to
//! distinct keys never interfere.

use std::path::Path;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::warn;

use translatex_core::cache::{CacheEntry, CacheKey, TranslationCache};
use translatex_core::error::{Result, TranslateError};

use crate::{db, migrate};

pub struct SqliteCache {
    pool: SqlitePool,
}

impl SqliteCache {
    /// Open the cache database at `path`, creating the schema if needed.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path)
            .await
            .map_err(|e| TranslateError::CacheIo(format!("{}: {e:#}", path.display())))?;
        migrate::run_migrations(&pool)
            .await
            .map_err(|e| TranslateError::CacheIo(format!("{e:#}")))?;
        Ok(Self { pool })
    }

    /// Like [`open`](Self::open), but a failure degrades to "no cache" with a
    /// warning instead of an error.
    pub async fn open_or_disable(path: &Path) -> Option<Self> {
        match Self::open(path).await {
            Ok(cache) => Some(cache),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cache unavailable, continuing without it");
                None
            }
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn io_err(e: sqlx::Error) -> TranslateError {
    TranslateError::CacheIo(e.to_string())
}

#[async_trait]
impl TranslationCache for SqliteCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let row = sqlx::query(
            "SELECT translated, created_at FROM translation_cache WHERE cache_key = ?",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(io_err)?;

        Ok(row.map(|r| {
            let created_at: i64 = r.get("created_at");
            CacheEntry {
                translated: r.get("translated"),
                created_at: chrono::DateTime::from_timestamp(created_at, 0).unwrap_or_default(),
            }
        }))
    }

    async fn put(&self, key: &CacheKey, source_text: &str, translated: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO translation_cache (cache_key, source_text, translated, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(cache_key) DO NOTHING
            "#,
        )
        .bind(key.as_str())
        .bind(source_text)
        .bind(translated)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(io_err)?;
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM translation_cache")
            .fetch_one(&self.pool)
            .await
            .map_err(io_err)?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cache.sqlite");
        let key = CacheKey::new("Hello", "ctx", "Vietnamese");

        let cache = SqliteCache::open(&path).await.unwrap();
        assert!(cache.get(&key).await.unwrap().is_none());
        cache.put(&key, "Hello", "Xin chào").await.unwrap();
        cache.close().await;

        let cache = SqliteCache::open(&path).await.unwrap();
        let hit = cache.get(&key).await.unwrap().unwrap();
        assert_eq!(hit.translated, "Xin chào");
        assert_eq!(cache.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_first_writer_wins() {
        let tmp = TempDir::new().unwrap();
        let cache = SqliteCache::open(&tmp.path().join("c.sqlite")).await.unwrap();
        let key = CacheKey::new("Hello", "ctx", "vi");
        cache.put(&key, "Hello", "one").await.unwrap();
        cache.put(&key, "Hello", "two").await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap().unwrap().translated, "one");
    }

    #[tokio::test]
    async fn test_unopenable_path_disables_cache() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, b"not a dir").unwrap();
        // Parent is a regular file, so the database cannot be created.
        let cache = SqliteCache::open_or_disable(&blocker.join("cache.sqlite")).await;
        assert!(cache.is_none());
    }
}
