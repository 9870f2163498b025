//! Per-document checkpoint sidecar.
//!
//! Progress is stored as JSON at `<output_dir>/<input stem>.checkpoint.json`.
//! The record carries the document id (SHA-256 of the input bytes) and the
//! chunk-plan hash; a record that matches neither the current document nor
//! its plan is discarded on open.
//!
//! Every [`CheckpointStore::mark_done`] inserts one chunk id under a mutex
//! and rewrites the file (temp file + rename), so concurrent completions
//! never lose an update and a crash leaves either the old or the new record.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use translatex_core::error::{Result, TranslateError};
use translatex_core::models::{CheckpointRecord, ChunkId, RunId};

/// SHA-256 of the document bytes, used as the checkpoint's document id.
pub fn document_id(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub struct CheckpointStore {
    path: PathBuf,
    record: Mutex<CheckpointRecord>,
}

fn ck_err(path: &Path, e: impl std::fmt::Display) -> TranslateError {
    TranslateError::Checkpoint(format!("{}: {e}", path.display()))
}

impl CheckpointStore {
    /// Sidecar location for `input` under `output_dir`.
    pub fn path_for(output_dir: &Path, input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        output_dir.join(format!("{stem}.checkpoint.json"))
    }

    /// Open the checkpoint for this job.
    ///
    /// With `resume` set, a matching record on disk is reused; anything else
    /// (no file, unreadable file, different document or plan) starts fresh.
    /// Without `resume`, an existing file is discarded.
    pub async fn open(
        path: PathBuf,
        document_id: &str,
        plan_hash: &str,
        total_chunks: usize,
        resume: bool,
    ) -> Result<Self> {
        let fresh = || CheckpointRecord::new(document_id, plan_hash, total_chunks);

        let record = if !resume {
            remove_if_exists(&path).await?;
            fresh()
        } else {
            match load(&path).await {
                Ok(Some(record)) if record.matches(document_id, plan_hash) => {
                    debug!(path = %path.display(), completed = record.completed.len(), "resuming from checkpoint");
                    record
                }
                Ok(Some(_)) => {
                    warn!(path = %path.display(), "checkpoint belongs to a different document or chunk plan, discarding");
                    fresh()
                }
                Ok(None) => fresh(),
                Err(e) => {
                    warn!(error = %e, "unreadable checkpoint, starting fresh");
                    fresh()
                }
            }
        };

        let store = Self {
            path,
            record: Mutex::new(record),
        };
        store.persist().await?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn snapshot(&self) -> CheckpointRecord {
        self.record.lock().await.clone()
    }

    pub async fn completed(&self) -> BTreeSet<ChunkId> {
        self.record.lock().await.completed.clone()
    }

    /// Record a finished chunk and persist. Returns `false` if the chunk was
    /// already recorded.
    pub async fn mark_done(
        &self,
        chunk_id: ChunkId,
        translations: Vec<(RunId, String)>,
    ) -> Result<bool> {
        let mut record = self.record.lock().await;
        if !record.mark_done(chunk_id, translations) {
            return Ok(false);
        }
        write_atomic(&self.path, &record).await?;
        Ok(true)
    }

    /// Write the current record to disk.
    pub async fn persist(&self) -> Result<()> {
        let record = self.record.lock().await;
        write_atomic(&self.path, &record).await
    }

    /// Delete the sidecar. Called only after a fully successful job.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.record.lock().await;
        remove_if_exists(&self.path).await
    }
}

async fn load(path: &Path) -> Result<Option<CheckpointRecord>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| ck_err(path, e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ck_err(path, e)),
    }
}

async fn write_atomic(path: &Path, record: &CheckpointRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ck_err(path, e))?;
        }
    }
    // Rewritten on every finished chunk, so keep it compact.
    let json = serde_json::to_vec(record).map_err(|e| ck_err(path, e))?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .map_err(|e| ck_err(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| ck_err(path, e))
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ck_err(path, e)),
    }
}
