//! Content-addressed translation cache.
//!
//! A [`CacheKey`] is the SHA-256 of `(normalized source text, context hash,
//! target language)`. Normalization strips leading and trailing whitespace
//! only; case and punctuation are significant.
//!
//! The context hash comes from [`TranslationContext`]: the settings that
//! change what a provider would return for the same text (source language,
//! model, glossary). The advisory context snippet is not part of it.
//!
//! Backends implement [`TranslationCache`]. [`memory::MemoryCache`] is the
//! in-process backend; the `translatex` crate adds a SQLite one.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(source_text: &str, context_hash: &str, target_lang: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(normalize(source_text).as_bytes());
        hasher.update([0u8]);
        hasher.update(context_hash.as_bytes());
        hasher.update([0u8]);
        hasher.update(target_lang.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Cache-key normalization: trim surrounding whitespace.
pub fn normalize(text: &str) -> &str {
    text.trim()
}

/// Split `text` into `(leading whitespace, core, trailing whitespace)`.
///
/// Only the core is translated and cached; the padding is re-applied to the
/// translation so spacing between adjacent runs survives.
pub fn split_padding(text: &str) -> (&str, &str, &str) {
    let core = text.trim();
    if core.is_empty() {
        return (text, "", "");
    }
    let start = text.len() - text.trim_start().len();
    let end = start + core.len();
    (&text[..start], core, &text[end..])
}

/// Settings that feed the cache context hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationContext {
    pub source_lang: String,
    pub model: String,
    pub glossary_fingerprint: String,
}

impl TranslationContext {
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.source_lang.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.model.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.glossary_fingerprint.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub translated: String,
    pub created_at: DateTime<Utc>,
}

/// Persistent or in-memory translation cache.
///
/// `put` is first-writer-wins: once a key has an entry, later writes for the
/// same key are ignored, so a key always yields the same translation.
/// Implementations must tolerate concurrent readers and concurrent writers
/// to distinct keys.
#[async_trait]
pub trait TranslationCache: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;

    async fn put(&self, key: &CacheKey, source_text: &str, translated: &str) -> Result<()>;

    async fn len(&self) -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ignores_surrounding_whitespace() {
        let a = CacheKey::new("  Hello world\n", "ctx", "Vietnamese");
        let b = CacheKey::new("Hello world", "ctx", "Vietnamese");
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_is_case_and_punctuation_sensitive() {
        let base = CacheKey::new("Hello", "ctx", "vi");
        assert_ne!(base, CacheKey::new("hello", "ctx", "vi"));
        assert_ne!(base, CacheKey::new("Hello!", "ctx", "vi"));
        assert_ne!(base, CacheKey::new("Hello", "other", "vi"));
        assert_ne!(base, CacheKey::new("Hello", "ctx", "fr"));
    }

    #[test]
    fn test_split_padding() {
        assert_eq!(split_padding(" Hello  "), (" ", "Hello", "  "));
        assert_eq!(split_padding("Hi"), ("", "Hi", ""));
        assert_eq!(split_padding("   "), ("   ", "", ""));
        assert_eq!(split_padding("\ta b\n"), ("\t", "a b", "\n"));
    }

    #[test]
    fn test_context_hash_changes_with_model() {
        let a = TranslationContext {
            source_lang: "English".into(),
            model: "gpt-4o-mini".into(),
            glossary_fingerprint: "g".into(),
        };
        let mut b = a.clone();
        b.model = "gpt-4o".into();
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.hash(), a.clone().hash());
    }
}
