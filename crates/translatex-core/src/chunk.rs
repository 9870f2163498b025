//! Greedy run chunker.
//!
//! Groups consecutive [`Run`]s into [`Chunk`]s whose combined text stays
//! within a `max_chunk_size` character budget. A run is never split: a run
//! longer than the budget becomes a chunk of its own.
//!
//! # Algorithm
//!
//! 1. Walk runs in document order, keeping a running character count.
//! 2. If adding the next run would exceed `max_chunk_size` and the current
//!    chunk is non-empty, flush the current chunk.
//! 3. Append the run to the current chunk.
//! 4. Flush the remainder at the end.
//!
//! Chunk ids are contiguous from `0`. `context_snippet` is left empty here;
//! the scheduler fills it at dispatch time from the previous chunk.
//!
//! # Example
//!
//! ```rust
//! use translatex_core::chunk::chunk_runs;
//! use translatex_core::models::{Run, RunId, StyleContext};
//!
//! let ctx = StyleContext { part: "word/document.xml".into(), paragraph: None, run_properties: None };
//! let runs = vec![
//!     Run::new(RunId(0), "Hello", ctx.clone()),
//!     Run::new(RunId(1), "world", ctx),
//! ];
//! let chunks = chunk_runs(&runs, 5000);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].run_ids, vec![RunId(0), RunId(1)]);
//! ```

use sha2::{Digest, Sha256};

use crate::models::{Chunk, ChunkId, Run, RunId};

/// Partition `runs` into order-preserving chunks bounded by `max_chunk_size`
/// characters.
///
/// # Guarantees
///
/// - Every run appears in exactly one chunk, in document order.
/// - A chunk exceeds `max_chunk_size` only when it holds exactly one run.
/// - An empty run list yields no chunks.
pub fn chunk_runs(runs: &[Run], max_chunk_size: usize) -> Vec<Chunk> {
    let max_chunk_size = max_chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut current: Vec<RunId> = Vec::new();
    let mut current_len = 0usize;

    for run in runs {
        let len = run.char_len();
        if !current.is_empty() && current_len + len > max_chunk_size {
            push_chunk(&mut chunks, std::mem::take(&mut current));
            current_len = 0;
        }
        current.push(run.id);
        current_len += len;
    }

    if !current.is_empty() {
        push_chunk(&mut chunks, current);
    }

    chunks
}

fn push_chunk(chunks: &mut Vec<Chunk>, run_ids: Vec<RunId>) {
    chunks.push(Chunk {
        chunk_id: chunks.len() as ChunkId,
        run_ids,
        context_snippet: String::new(),
    });
}

/// The last `context_window` run ids of `chunk`.
pub fn context_tail(chunk: &Chunk, context_window: usize) -> &[RunId] {
    let start = chunk.run_ids.len().saturating_sub(context_window);
    &chunk.run_ids[start..]
}

/// SHA-256 fingerprint of a chunk plan.
///
/// Covers chunk boundaries and run texts, so a checkpoint written for one
/// plan is never applied to a document or budget that chunks differently.
pub fn plan_hash(runs: &[Run], chunks: &[Chunk]) -> String {
    let mut hasher = Sha256::new();
    for run in runs {
        hasher.update(run.id.0.to_le_bytes());
        hasher.update(run.text.as_bytes());
        hasher.update([0u8]);
    }
    for chunk in chunks {
        hasher.update(chunk.chunk_id.to_le_bytes());
        hasher.update((chunk.run_ids.len() as u64).to_le_bytes());
        for id in &chunk.run_ids {
            hasher.update(id.0.to_le_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StyleContext;

    fn runs(texts: &[&str]) -> Vec<Run> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| {
                Run::new(
                    RunId(i as u32),
                    *t,
                    StyleContext {
                        part: "word/document.xml".to_string(),
                        paragraph: Some(i as u32),
                        run_properties: None,
                    },
                )
            })
            .collect()
    }

    fn chunk_text(runs: &[Run], chunk: &Chunk) -> usize {
        chunk
            .run_ids
            .iter()
            .map(|id| runs[id.0 as usize].char_len())
            .sum()
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        assert!(chunk_runs(&[], 100).is_empty());
    }

    #[test]
    fn test_single_chunk_when_budget_allows() {
        let r = runs(&["one", "two", "three"]);
        let chunks = chunk_runs(&r, 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].run_ids, vec![RunId(0), RunId(1), RunId(2)]);
        assert!(chunks[0].context_snippet.is_empty());
    }

    #[test]
    fn test_splits_on_budget() {
        let r = runs(&["aaaa", "bbbb", "cccc"]);
        let chunks = chunk_runs(&r, 8);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].run_ids, vec![RunId(0), RunId(1)]);
        assert_eq!(chunks[1].run_ids, vec![RunId(2)]);
    }

    #[test]
    fn test_oversized_run_gets_own_chunk() {
        let r = runs(&["ab", "this run is far too long", "cd"]);
        let chunks = chunk_runs(&r, 5);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].run_ids, vec![RunId(1)]);
    }

    #[test]
    fn test_budget_counts_chars_not_bytes() {
        // 4 chars, 8 bytes each
        let r = runs(&["éééé", "éééé"]);
        let chunks = chunk_runs(&r, 8);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_partition_reconstructs_sequence() {
        let texts: Vec<String> = (0..40).map(|i| "x".repeat(i % 7 + 1)).collect();
        let refs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
        let r = runs(&refs);
        for budget in [1, 3, 6, 10, 1000] {
            let chunks = chunk_runs(&r, budget);
            let flat: Vec<RunId> = chunks.iter().flat_map(|c| c.run_ids.clone()).collect();
            let expected: Vec<RunId> = r.iter().map(|run| run.id).collect();
            assert_eq!(flat, expected);
            for (i, chunk) in chunks.iter().enumerate() {
                assert_eq!(chunk.chunk_id, i as u32);
                assert!(chunk_text(&r, chunk) <= budget || chunk.run_ids.len() == 1);
            }
        }
    }

    #[test]
    fn test_context_tail() {
        let chunk = Chunk {
            chunk_id: 0,
            run_ids: vec![RunId(0), RunId(1), RunId(2)],
            context_snippet: String::new(),
        };
        assert_eq!(context_tail(&chunk, 2), &[RunId(1), RunId(2)]);
        assert_eq!(context_tail(&chunk, 10).len(), 3);
        assert!(context_tail(&chunk, 0).is_empty());
    }

    #[test]
    fn test_plan_hash_depends_on_boundaries() {
        let r = runs(&["aaaa", "bbbb", "cccc"]);
        let a = plan_hash(&r, &chunk_runs(&r, 8));
        let b = plan_hash(&r, &chunk_runs(&r, 100));
        assert_ne!(a, b);
        assert_eq!(a, plan_hash(&r, &chunk_runs(&r, 8)));
    }
}
