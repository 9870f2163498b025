//! Core data models used throughout TranslateX.
//!
//! A document is reduced to an arena of [`Run`]s addressed by [`RunId`].
//! Runs are grouped into [`Chunk`]s for provider calls, and progress is
//! persisted as a [`CheckpointRecord`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identifier of a [`Run`]: its ordinal in document order.
///
/// Ids are assigned by the extractor while walking the package, so the same
/// input bytes always produce the same ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub u32);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Where a run lives in the package. Passed back unchanged; only the
/// reassembler and the review artifact look at it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleContext {
    /// Zip entry name of the XML part, e.g. `word/document.xml`.
    pub part: String,
    /// Paragraph ordinal within the part, when the text sits in a paragraph.
    pub paragraph: Option<u32>,
    /// Raw run properties (`<w:rPr>…</w:rPr>`) of the enclosing run.
    pub run_properties: Option<String>,
}

/// A minimal unit of translatable text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub id: RunId,
    pub text: String,
    pub style_context: StyleContext,
    pub translated: Option<String>,
}

impl Run {
    pub fn new(id: RunId, text: impl Into<String>, style_context: StyleContext) -> Self {
        Self {
            id,
            text: text.into(),
            style_context,
            translated: None,
        }
    }

    /// Length used for chunk budgeting (characters, not bytes).
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// The text to write back: the translation if present, else the source.
    pub fn output_text(&self) -> &str {
        self.translated.as_deref().unwrap_or(&self.text)
    }
}

pub type ChunkId = u32;

/// A batch of consecutive runs sent in one provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_id: ChunkId,
    pub run_ids: Vec<RunId>,
    /// Advisory context from the previous chunk; filled at dispatch time.
    pub context_snippet: String,
}

/// Scheduler state of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Pending,
    InFlight,
    Done,
    Failed,
}

/// Persisted progress for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// SHA-256 of the input file bytes.
    pub document_id: String,
    /// Fingerprint of the chunk plan the completed ids refer to.
    pub plan_hash: String,
    pub total_chunks: usize,
    pub completed: BTreeSet<ChunkId>,
    /// Translations of every run in a completed chunk.
    pub translations: BTreeMap<RunId, String>,
    pub updated_at: DateTime<Utc>,
}

impl CheckpointRecord {
    pub fn new(document_id: impl Into<String>, plan_hash: impl Into<String>, total_chunks: usize) -> Self {
        Self {
            document_id: document_id.into(),
            plan_hash: plan_hash.into(),
            total_chunks,
            completed: BTreeSet::new(),
            translations: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    /// Whether this record describes the same document and chunk plan.
    pub fn matches(&self, document_id: &str, plan_hash: &str) -> bool {
        self.document_id == document_id && self.plan_hash == plan_hash
    }

    pub fn is_done(&self, chunk_id: ChunkId) -> bool {
        self.completed.contains(&chunk_id)
    }

    /// Record a completed chunk. Returns `false` if it was already recorded.
    pub fn mark_done(
        &mut self,
        chunk_id: ChunkId,
        translations: impl IntoIterator<Item = (RunId, String)>,
    ) -> bool {
        if !self.completed.insert(chunk_id) {
            return false;
        }
        self.translations.extend(translations);
        self.updated_at = Utc::now();
        true
    }

    pub fn is_complete(&self) -> bool {
        self.completed.len() >= self.total_chunks
    }
}
