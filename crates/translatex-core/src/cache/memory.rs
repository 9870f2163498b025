//! In-memory [`TranslationCache`] for tests and cache-less runs that still
//! want in-job deduplication.
//!
//! Uses a `HashMap` behind `std::sync::RwLock`.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{Result, TranslateError};

use super::{CacheEntry, CacheKey, TranslationCache};

pub struct MemoryCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> TranslateError {
    TranslateError::CacheIo("memory cache lock poisoned".to_string())
}

#[async_trait]
impl TranslationCache for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, key: &CacheKey, _source_text: &str, translated: &str) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.entry(key.clone()).or_insert_with(|| CacheEntry {
            translated: translated.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.read().map_err(|_| poisoned())?.len())
    }
}
