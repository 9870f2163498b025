//! Bounded-concurrency chunk scheduler.
//!
//! Each chunk moves through `Pending → InFlight → {Done, Failed}`. The
//! scheduler keeps a ready queue in document order and dispatches at most
//! `max_concurrent` attempts at a time onto a [`JoinSet`].
//!
//! # One attempt
//!
//! 1. Claim each distinct text. A text another attempt already claimed is
//!    awaited instead of requested again; claimed texts are looked up in
//!    the cache (partial hits allowed).
//! 2. If anything missed: acquire a rate-limiter slot, protect glossary
//!    terms, call the translator under a timeout, restore terms, and store
//!    the results in the cache.
//! 3. Record the chunk in the checkpoint.
//!
//! Concurrent chunks that repeat a text therefore cost one provider request
//! for it. If the claiming attempt fails, its waiters fail retryably too.
//!
//! # Failures
//!
//! | Error | Handling |
//! |-------|----------|
//! | `RateLimited`, `Api`, timeout | back off, re-enqueue; after `max_retries` retries the chunk is `Failed` |
//! | `Auth` | abort all in-flight work, return the error |
//! | cancellation | stop dispatching, let in-flight calls finish, return `Cancelled` |
//!
//! Backoff is a timer task that puts the chunk back on the ready queue, so
//! a waiting chunk never holds a concurrency slot.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use translatex_core::cache::{split_padding, CacheKey, TranslationCache};
use translatex_core::chunk::context_tail;
use translatex_core::error::{Result, TranslateError};
use translatex_core::glossary::{Glossary, Protected};
use translatex_core::models::{Chunk, ChunkId, ChunkState, Run, RunId};
use translatex_core::translator::Translator;

use crate::checkpoint::CheckpointStore;
use crate::config::Config;
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter};
use crate::rate_limit::RateLimiter;

/// Upper bound of the random jitter added to a backoff delay.
const MAX_JITTER: f64 = 0.25;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub max_concurrent: usize,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub call_timeout: Duration,
    pub context_window: usize,
    pub target_lang: String,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrent: config.max_concurrent.max(1),
            max_retries: config.max_retries,
            retry_base_delay: config.retry_base_delay(),
            retry_max_delay: config.retry_max_delay(),
            call_timeout: config.timeout(),
            context_window: config.context_window,
            target_lang: config.target_lang.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub done: usize,
    pub failed: usize,
    /// Chunks restored from the checkpoint instead of dispatched.
    pub resumed: usize,
    pub cache_hits: usize,
    pub provider_calls: usize,
    pub retries: usize,
}

#[derive(Debug, Clone)]
pub struct ScheduleOutcome {
    pub states: BTreeMap<ChunkId, ChunkState>,
    pub translations: HashMap<RunId, String>,
    pub stats: SchedulerStats,
}

impl ScheduleOutcome {
    pub fn failed_chunks(&self) -> Vec<ChunkId> {
        self.states
            .iter()
            .filter(|(_, s)| **s == ChunkState::Failed)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.states.values().all(|s| *s == ChunkState::Done)
    }
}

/// Delay before retry number `retry` (0-based).
///
/// `base × 2^retry`, capped at `max`, plus `jitter` (fraction, 0–0.25) of
/// that. A server-suggested `retry_after` raises the delay; the result never
/// exceeds `max`.
pub fn backoff_delay(
    base: Duration,
    max: Duration,
    retry: u32,
    retry_after: Option<Duration>,
    jitter: f64,
) -> Duration {
    let exp = base.saturating_mul(2u32.saturating_pow(retry.min(20)));
    let capped = exp.min(max);
    let jittered = capped + capped.mul_f64(jitter.clamp(0.0, MAX_JITTER));
    let delay = match retry_after {
        Some(ra) => jittered.max(ra),
        None => jittered,
    };
    delay.min(max)
}

struct ChunkJob {
    chunk_id: ChunkId,
    runs: Vec<(RunId, String)>,
    context: String,
}

#[derive(Default)]
struct AttemptStats {
    cache_hits: usize,
    provider_called: bool,
}

struct AttemptOutput {
    chunk_id: ChunkId,
    stats: AttemptStats,
    result: Result<Vec<(RunId, String)>>,
}

/// Everything an attempt task needs, shared across tasks.
struct Shared<T> {
    translator: Arc<T>,
    limiter: Arc<RateLimiter>,
    cache: Arc<dyn TranslationCache>,
    context_hash: String,
    glossary: Arc<Glossary>,
    checkpoint: Option<Arc<CheckpointStore>>,
    target_lang: String,
    call_timeout: Duration,
    /// Keys being translated by a running attempt.
    in_flight: InFlightRegistry,
}

impl<T: Translator> Shared<T> {
    async fn attempt(&self, job: ChunkJob, cancel: CancellationToken) -> AttemptOutput {
        let mut stats = AttemptStats::default();
        let result = self.translate_chunk(&job, &cancel, &mut stats).await;
        AttemptOutput {
            chunk_id: job.chunk_id,
            stats,
            result,
        }
    }

    async fn translate_chunk(
        &self,
        job: &ChunkJob,
        cancel: &CancellationToken,
        stats: &mut AttemptStats,
    ) -> Result<Vec<(RunId, String)>> {
        let mut run_core: Vec<Option<usize>> = vec![None; job.runs.len()];
        let mut cores: Vec<String> = Vec::new();
        let mut core_index: HashMap<String, usize> = HashMap::new();

        for (i, (_, text)) in job.runs.iter().enumerate() {
            let (_, core, _) = split_padding(text);
            if core.is_empty() {
                continue;
            }
            let idx = *core_index.entry(core.to_string()).or_insert_with(|| {
                cores.push(core.to_string());
                cores.len() - 1
            });
            run_core[i] = Some(idx);
        }

        let mut values: Vec<Option<String>> = vec![None; cores.len()];
        let mut owned: Vec<(usize, InFlight<'_>)> = Vec::new();
        let mut waits: Vec<(usize, watch::Receiver<Option<String>>)> = Vec::new();

        for (idx, core) in cores.iter().enumerate() {
            match self.claim(self.key(core)) {
                Claim::Wait(rx) => waits.push((idx, rx)),
                Claim::Owner(slot) => match self.cache_get(core).await {
                    Some(hit) => {
                        slot.publish(&hit);
                        values[idx] = Some(hit);
                    }
                    None => owned.push((idx, slot)),
                },
            }
        }

        if !owned.is_empty() {
            self.limiter.acquire(cancel).await?;

            let protected: Vec<Protected> = owned
                .iter()
                .map(|(idx, _)| self.glossary.protect(&cores[*idx]))
                .collect();
            let request: Vec<String> = protected.iter().map(|p| p.text.clone()).collect();

            stats.provider_called = true;
            let reply = tokio::time::timeout(
                self.call_timeout,
                self.translator
                    .translate(&request, &job.context, &self.target_lang, &self.glossary),
            )
            .await
            .map_err(|_| {
                TranslateError::Api(format!(
                    "provider call timed out after {}s",
                    self.call_timeout.as_secs_f64()
                ))
            })??;

            if reply.len() != request.len() {
                return Err(TranslateError::Api(format!(
                    "provider returned {} segments for {} inputs",
                    reply.len(),
                    request.len()
                )));
            }

            for (((idx, slot), p), translated) in owned.iter().zip(&protected).zip(reply) {
                let restored = p.restore(translated.trim());
                let canonical = self.cache_put(&cores[*idx], &restored).await;
                slot.publish(&canonical);
                values[*idx] = Some(canonical);
            }
        }
        let mut sent = vec![false; cores.len()];
        for (idx, _) in &owned {
            sent[*idx] = true;
        }
        // Release claimed keys before waiting on other attempts' keys.
        drop(owned);

        for (idx, mut rx) in waits {
            // An error means the owning attempt is gone; the value decides.
            let _ = rx.wait_for(Option::is_some).await;
            let value = (*rx.borrow()).clone();
            match value {
                Some(v) => values[idx] = Some(v),
                None if cancel.is_cancelled() => return Err(TranslateError::Cancelled),
                None => {
                    return Err(TranslateError::Api(
                        "concurrent request for the same text failed".into(),
                    ))
                }
            }
        }

        let pairs: Vec<(RunId, String)> = job
            .runs
            .iter()
            .zip(&run_core)
            .map(|((id, text), core)| {
                let Some(idx) = *core else {
                    return (*id, text.clone());
                };
                if !sent[idx] {
                    stats.cache_hits += 1;
                }
                let (lead, _, trail) = split_padding(text);
                let value = values[idx].as_deref().unwrap_or(text.as_str());
                (*id, format!("{lead}{value}{trail}"))
            })
            .collect();

        if let Some(checkpoint) = &self.checkpoint {
            if let Err(e) = checkpoint.mark_done(job.chunk_id, pairs.clone()).await {
                warn!(chunk = job.chunk_id, error = %e, "failed to persist checkpoint");
            }
        }

        Ok(pairs)
    }

    fn key(&self, core: &str) -> CacheKey {
        CacheKey::new(core, &self.context_hash, &self.target_lang)
    }

    /// Claim `key` for this attempt, or get a receiver for the attempt that
    /// already holds it.
    fn claim(&self, key: CacheKey) -> Claim<'_> {
        let mut pending = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(rx) = pending.get(&key) {
            return Claim::Wait(rx.clone());
        }
        let (tx, rx) = watch::channel(None);
        pending.insert(key.clone(), rx);
        Claim::Owner(InFlight {
            registry: &self.in_flight,
            key,
            tx,
        })
    }

    async fn cache_get(&self, core: &str) -> Option<String> {
        match self.cache.get(&self.key(core)).await {
            Ok(entry) => entry.map(|e| e.translated),
            Err(e) => {
                warn!(error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }

    /// Store a translation and return the canonical one for its key.
    async fn cache_put(&self, core: &str, translated: &str) -> String {
        let key = self.key(core);
        if let Err(e) = self.cache.put(&key, core, translated).await {
            warn!(error = %e, "cache write failed");
            return translated.to_string();
        }
        match self.cache.get(&key).await {
            Ok(Some(entry)) => entry.translated,
            _ => translated.to_string(),
        }
    }
}

type InFlightRegistry = Mutex<HashMap<CacheKey, watch::Receiver<Option<String>>>>;

enum Claim<'a> {
    Owner(InFlight<'a>),
    Wait(watch::Receiver<Option<String>>),
}

/// A cache key this attempt is translating. Dropping it releases the key;
/// waiters that saw no value then fail and retry.
struct InFlight<'a> {
    registry: &'a InFlightRegistry,
    key: CacheKey,
    tx: watch::Sender<Option<String>>,
}

impl InFlight<'_> {
    fn publish(&self, translated: &str) {
        self.tx.send_replace(Some(translated.to_string()));
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

pub struct Scheduler<T> {
    translator: Arc<T>,
    limiter: Arc<RateLimiter>,
    cache: Arc<dyn TranslationCache>,
    context_hash: String,
    glossary: Arc<Glossary>,
    checkpoint: Option<Arc<CheckpointStore>>,
    progress: Arc<dyn ProgressReporter>,
    document: String,
    settings: SchedulerSettings,
}

impl<T: Translator + 'static> Scheduler<T> {
    pub fn new(
        translator: Arc<T>,
        limiter: Arc<RateLimiter>,
        cache: Arc<dyn TranslationCache>,
        context_hash: impl Into<String>,
        glossary: Arc<Glossary>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            translator,
            limiter,
            cache,
            context_hash: context_hash.into(),
            glossary,
            checkpoint: None,
            progress: Arc::new(NoProgress),
            document: String::new(),
            settings,
        }
    }

    pub fn with_checkpoint(mut self, checkpoint: Arc<CheckpointStore>) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>, document: impl Into<String>) -> Self {
        self.progress = progress;
        self.document = document.into();
        self
    }

    fn shared(&self) -> Shared<T> {
        Shared {
            translator: self.translator.clone(),
            limiter: self.limiter.clone(),
            cache: self.cache.clone(),
            context_hash: self.context_hash.clone(),
            glossary: self.glossary.clone(),
            checkpoint: self.checkpoint.clone(),
            target_lang: self.settings.target_lang.clone(),
            call_timeout: self.settings.call_timeout,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Advisory context for the chunk at `index`: the last `context_window`
    /// runs of the previous chunk, translated where available.
    fn context_snippet(
        &self,
        chunks: &[Chunk],
        index: usize,
        translations: &HashMap<RunId, String>,
        source: &HashMap<RunId, &str>,
    ) -> String {
        if index == 0 || self.settings.context_window == 0 {
            return String::new();
        }
        context_tail(&chunks[index - 1], self.settings.context_window)
            .iter()
            .filter_map(|id| {
                translations
                    .get(id)
                    .map(String::as_str)
                    .or_else(|| source.get(id).copied())
            })
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn report(&self, finished: u64, total: u64) {
        self.progress.report(ProgressEvent::Translating {
            document: self.document.clone(),
            finished,
            total,
        });
    }

    /// Translate `chunks` of `runs` until every chunk is Done or Failed.
    ///
    /// Chunks already completed in the checkpoint are restored, not
    /// dispatched. Returns `Err(Auth)` on a credential failure and
    /// `Err(Cancelled)` if `cancel` fires before all chunks finish.
    pub async fn run(
        &self,
        runs: &[Run],
        chunks: &[Chunk],
        cancel: &CancellationToken,
    ) -> Result<ScheduleOutcome> {
        let cancel = cancel.child_token();
        let source: HashMap<RunId, &str> = runs.iter().map(|r| (r.id, r.text.as_str())).collect();
        let position: HashMap<ChunkId, usize> = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| (c.chunk_id, i))
            .collect();

        let mut states: BTreeMap<ChunkId, ChunkState> = chunks
            .iter()
            .map(|c| (c.chunk_id, ChunkState::Pending))
            .collect();
        let mut translations: HashMap<RunId, String> = HashMap::new();
        let mut stats = SchedulerStats::default();

        if let Some(checkpoint) = &self.checkpoint {
            let record = checkpoint.snapshot().await;
            for chunk in chunks {
                let restorable = record.is_done(chunk.chunk_id)
                    && chunk
                        .run_ids
                        .iter()
                        .all(|id| record.translations.contains_key(id));
                if !restorable {
                    continue;
                }
                for id in &chunk.run_ids {
                    if let Some(t) = record.translations.get(id) {
                        translations.insert(*id, t.clone());
                    }
                }
                states.insert(chunk.chunk_id, ChunkState::Done);
                stats.resumed += 1;
            }
        }

        let total = chunks.len() as u64;
        let mut finished = stats.resumed as u64;
        let mut ready: VecDeque<ChunkId> = chunks
            .iter()
            .filter(|c| states.get(&c.chunk_id) == Some(&ChunkState::Pending))
            .map(|c| c.chunk_id)
            .collect();

        let shared = Arc::new(self.shared());
        let mut attempts: JoinSet<AttemptOutput> = JoinSet::new();
        let mut timers: JoinSet<ChunkId> = JoinSet::new();
        let mut failures: HashMap<ChunkId, u32> = HashMap::new();
        let mut in_flight = 0usize;
        let mut fatal: Option<TranslateError> = None;

        loop {
            while fatal.is_none()
                && !cancel.is_cancelled()
                && in_flight < self.settings.max_concurrent
            {
                let Some(chunk_id) = ready.pop_front() else {
                    break;
                };
                let index = position[&chunk_id];
                let chunk = &chunks[index];
                let job = ChunkJob {
                    chunk_id,
                    runs: chunk
                        .run_ids
                        .iter()
                        .map(|id| (*id, source.get(id).copied().unwrap_or_default().to_string()))
                        .collect(),
                    context: self.context_snippet(chunks, index, &translations, &source),
                };
                debug!(chunk = chunk_id, runs = job.runs.len(), "dispatching chunk");
                states.insert(chunk_id, ChunkState::InFlight);
                in_flight += 1;

                let shared = shared.clone();
                let cancel = cancel.clone();
                attempts.spawn(async move { shared.attempt(job, cancel).await });
            }

            tokio::select! {
                Some(joined) = attempts.join_next(), if !attempts.is_empty() => {
                    in_flight = in_flight.saturating_sub(1);
                    let output = match joined {
                        Ok(output) => output,
                        Err(e) => {
                            if !e.is_cancelled() {
                                error!(error = %e, "chunk task panicked");
                            }
                            continue;
                        }
                    };
                    stats.cache_hits += output.stats.cache_hits;
                    if output.stats.provider_called {
                        stats.provider_calls += 1;
                    }
                    let chunk_id = output.chunk_id;

                    match output.result {
                        Ok(pairs) => {
                            translations.extend(pairs);
                            states.insert(chunk_id, ChunkState::Done);
                            stats.done += 1;
                            finished += 1;
                            self.report(finished, total);
                        }
                        Err(TranslateError::Cancelled) => {
                            states.insert(chunk_id, ChunkState::Pending);
                        }
                        Err(e) if e.is_retryable() => {
                            let failed_attempts = {
                                let n = failures.entry(chunk_id).or_insert(0);
                                *n += 1;
                                *n
                            };
                            if failed_attempts <= self.settings.max_retries {
                                let jitter = rand::thread_rng().gen_range(0.0..=MAX_JITTER);
                                let delay = backoff_delay(
                                    self.settings.retry_base_delay,
                                    self.settings.retry_max_delay,
                                    failed_attempts - 1,
                                    e.retry_after(),
                                    jitter,
                                );
                                warn!(
                                    chunk = chunk_id,
                                    attempt = failed_attempts,
                                    delay_ms = delay.as_millis() as u64,
                                    error = %e,
                                    "chunk failed, retrying"
                                );
                                stats.retries += 1;
                                states.insert(chunk_id, ChunkState::Pending);
                                let cancel = cancel.clone();
                                timers.spawn(async move {
                                    tokio::select! {
                                        _ = tokio::time::sleep(delay) => {}
                                        _ = cancel.cancelled() => {}
                                    }
                                    chunk_id
                                });
                            } else {
                                warn!(
                                    chunk = chunk_id,
                                    attempts = failed_attempts,
                                    error = %e,
                                    "chunk failed after all retries, leaving it untranslated"
                                );
                                states.insert(chunk_id, ChunkState::Failed);
                                stats.failed += 1;
                                finished += 1;
                                self.report(finished, total);
                            }
                        }
                        Err(e) if e.is_fatal() => {
                            error!(chunk = chunk_id, error = %e, "fatal provider error, aborting job");
                            states.insert(chunk_id, ChunkState::Failed);
                            fatal = Some(e);
                            cancel.cancel();
                            attempts.abort_all();
                            timers.abort_all();
                        }
                        Err(e) => {
                            warn!(chunk = chunk_id, error = %e, "chunk failed");
                            states.insert(chunk_id, ChunkState::Failed);
                            stats.failed += 1;
                            finished += 1;
                            self.report(finished, total);
                        }
                    }
                }
                Some(joined) = timers.join_next(), if !timers.is_empty() => {
                    if let Ok(chunk_id) = joined {
                        if !cancel.is_cancelled() {
                            // Keep the queue in document order.
                            let at = ready
                                .iter()
                                .position(|c| position[c] > position[&chunk_id])
                                .unwrap_or(ready.len());
                            ready.insert(at, chunk_id);
                        }
                    }
                }
                else => break,
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }

        // A chunk whose task panicked never reported back.
        for state in states.values_mut() {
            if *state == ChunkState::InFlight {
                *state = ChunkState::Failed;
                stats.failed += 1;
            }
        }

        if cancel.is_cancelled() && states.values().any(|s| *s == ChunkState::Pending) {
            return Err(TranslateError::Cancelled);
        }

        Ok(ScheduleOutcome {
            states,
            translations,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::RateBudget;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use translatex_core::cache::memory::MemoryCache;
    use translatex_core::chunk::chunk_runs;
    use translatex_core::models::StyleContext;

    /// Uppercases its input and records every batch it sees.
    #[derive(Default)]
    struct Upper {
        calls: AtomicUsize,
        batches: Mutex<Vec<Vec<String>>>,
        contexts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Translator for Upper {
        fn name(&self) -> String {
            "upper".into()
        }
        async fn translate(
            &self,
            texts: &[String],
            context: &str,
            _target_lang: &str,
            _glossary: &Glossary,
        ) -> Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.batches.lock().unwrap().push(texts.to_vec());
            self.contexts.lock().unwrap().push(context.to_string());
            Ok(texts.iter().map(|t| t.to_uppercase()).collect())
        }
    }

    /// Fails every batch containing `poison` with the given error kind.
    struct Failing {
        poison: &'static str,
        auth: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Translator for Failing {
        fn name(&self) -> String {
            "failing".into()
        }
        async fn translate(
            &self,
            texts: &[String],
            _context: &str,
            _target_lang: &str,
            _glossary: &Glossary,
        ) -> Result<Vec<String>> {
            if texts.iter().any(|t| t.contains(self.poison)) {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if self.auth {
                    return Err(TranslateError::Auth("401".into()));
                }
                return Err(TranslateError::Api("503".into()));
            }
            Ok(texts.iter().map(|t| t.to_uppercase()).collect())
        }
    }

    /// Tracks the peak number of concurrent calls.
    #[derive(Default)]
    struct Slow {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Translator for Slow {
        fn name(&self) -> String {
            "slow".into()
        }
        async fn translate(
            &self,
            texts: &[String],
            _context: &str,
            _target_lang: &str,
            _glossary: &Glossary,
        ) -> Result<Vec<String>> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(texts.to_vec())
        }
    }

    /// Wraps its output in model-ish noise that varies per call but keeps
    /// placeholders intact.
    #[derive(Default)]
    struct Noisy {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Translator for Noisy {
        fn name(&self) -> String {
            "noisy".into()
        }
        async fn translate(
            &self,
            texts: &[String],
            _context: &str,
            _target_lang: &str,
            _glossary: &Glossary,
        ) -> Result<Vec<String>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| format!("v{n} {}", t.replace("invoice", &format!("bill{n}"))))
                .collect())
        }
    }

    /// Sleeps, then uppercases; the first `fail_first` calls fail.
    #[derive(Default)]
    struct Flaky {
        fail_first: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Translator for Flaky {
        fn name(&self) -> String {
            "flaky".into()
        }
        async fn translate(
            &self,
            texts: &[String],
            _context: &str,
            _target_lang: &str,
            _glossary: &Glossary,
        ) -> Result<Vec<String>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            if n < self.fail_first {
                return Err(TranslateError::Api("503".into()));
            }
            Ok(texts.iter().map(|t| t.to_uppercase()).collect())
        }
    }

    struct Hanging;

    #[async_trait]
    impl Translator for Hanging {
        fn name(&self) -> String {
            "hanging".into()
        }
        async fn translate(
            &self,
            _texts: &[String],
            _context: &str,
            _target_lang: &str,
            _glossary: &Glossary,
        ) -> Result<Vec<String>> {
            std::future::pending().await
        }
    }

    fn runs(texts: &[&str]) -> Vec<Run> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| {
                Run::new(
                    RunId(i as u32),
                    *t,
                    StyleContext {
                        part: "word/document.xml".into(),
                        paragraph: Some(i as u32),
                        run_properties: None,
                    },
                )
            })
            .collect()
    }

    fn settings(max_concurrent: usize, max_retries: u32) -> SchedulerSettings {
        SchedulerSettings {
            max_concurrent,
            max_retries,
            retry_base_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(5),
            call_timeout: Duration::from_secs(30),
            context_window: 2,
            target_lang: "Vietnamese".into(),
        }
    }

    fn scheduler<T: Translator + 'static>(
        translator: Arc<T>,
        cache: Arc<dyn TranslationCache>,
        glossary: Glossary,
        settings: SchedulerSettings,
    ) -> Scheduler<T> {
        Scheduler::new(
            translator,
            Arc::new(RateLimiter::new(RateBudget::new(10_000, Duration::from_secs(60)))),
            cache,
            "ctx",
            Arc::new(glossary),
            settings,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_chunks_done() {
        let r = runs(&["one", "two", "three", "four"]);
        let chunks = chunk_runs(&r, 6);
        let stub = Arc::new(Upper::default());
        let s = scheduler(stub.clone(), Arc::new(MemoryCache::new()), Glossary::default(), settings(2, 3));

        let outcome = s.run(&r, &chunks, &CancellationToken::new()).await.unwrap();
        assert!(outcome.is_complete());
        assert_eq!(outcome.stats.done, chunks.len());
        assert_eq!(outcome.translations[&RunId(2)], "THREE");
        assert_eq!(stub.calls.load(Ordering::SeqCst), chunks.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_padding_is_preserved() {
        let r = runs(&["Hello ", " world"]);
        let chunks = chunk_runs(&r, 100);
        let stub = Arc::new(Upper::default());
        let s = scheduler(stub.clone(), Arc::new(MemoryCache::new()), Glossary::default(), settings(1, 0));

        let outcome = s.run(&r, &chunks, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.translations[&RunId(0)], "HELLO ");
        assert_eq!(outcome.translations[&RunId(1)], " WORLD");
        assert_eq!(stub.batches.lock().unwrap()[0], vec!["Hello", "world"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound_then_failed() {
        let r = runs(&["good", "bad", "fine"]);
        // One run per chunk.
        let chunks = chunk_runs(&r, 1);
        let stub = Arc::new(Failing {
            poison: "bad",
            auth: false,
            calls: AtomicUsize::new(0),
        });
        let s = scheduler(stub.clone(), Arc::new(MemoryCache::new()), Glossary::default(), settings(3, 3));

        let outcome = s.run(&r, &chunks, &CancellationToken::new()).await.unwrap();
        // First attempt plus exactly max_retries retries.
        assert_eq!(stub.calls.load(Ordering::SeqCst), 4);
        assert_eq!(outcome.failed_chunks(), vec![1]);
        assert_eq!(outcome.states[&0], ChunkState::Done);
        assert_eq!(outcome.states[&2], ChunkState::Done);
        assert_eq!(outcome.stats.retries, 3);
        assert!(!outcome.translations.contains_key(&RunId(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries() {
        let r = runs(&["bad"]);
        let chunks = chunk_runs(&r, 100);
        let stub = Arc::new(Failing {
            poison: "bad",
            auth: false,
            calls: AtomicUsize::new(0),
        });
        let s = scheduler(stub.clone(), Arc::new(MemoryCache::new()), Glossary::default(), settings(1, 0));
        let outcome = s.run(&r, &chunks, &CancellationToken::new()).await.unwrap();
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.stats.failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_error_aborts_job() {
        let r = runs(&["bad", "x", "y"]);
        let chunks = chunk_runs(&r, 1);
        let stub = Arc::new(Failing {
            poison: "bad",
            auth: true,
            calls: AtomicUsize::new(0),
        });
        let s = scheduler(stub.clone(), Arc::new(MemoryCache::new()), Glossary::default(), settings(1, 5));
        let err = s.run(&r, &chunks, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, TranslateError::Auth(_)));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1, "auth is never retried");
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_cache_hits_send_only_misses() {
        let r = runs(&["cached", "fresh"]);
        let chunks = chunk_runs(&r, 100);
        let cache = Arc::new(MemoryCache::new());
        cache
            .put(&CacheKey::new("cached", "ctx", "Vietnamese"), "cached", "từ cache")
            .await
            .unwrap();
        let stub = Arc::new(Upper::default());
        let s = scheduler(stub.clone(), cache, Glossary::default(), settings(1, 0));

        let outcome = s.run(&r, &chunks, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.translations[&RunId(0)], "từ cache");
        assert_eq!(outcome.translations[&RunId(1)], "FRESH");
        assert_eq!(stub.batches.lock().unwrap()[0], vec!["fresh"]);
        assert_eq!(outcome.stats.cache_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cache_hit_skips_provider() {
        let r = runs(&["Hello"]);
        let chunks = chunk_runs(&r, 100);
        let cache: Arc<dyn TranslationCache> = Arc::new(MemoryCache::new());
        let stub = Arc::new(Upper::default());

        let s = scheduler(stub.clone(), cache.clone(), Glossary::default(), settings(1, 0));
        s.run(&r, &chunks, &CancellationToken::new()).await.unwrap();
        let second = s.run(&r, &chunks, &CancellationToken::new()).await.unwrap();

        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.stats.cache_hits, 1);
        assert_eq!(second.stats.provider_calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_texts_in_chunk_sent_once() {
        let r = runs(&["Yes", "No", "Yes"]);
        let chunks = chunk_runs(&r, 100);
        let stub = Arc::new(Upper::default());
        let s = scheduler(stub.clone(), Arc::new(MemoryCache::new()), Glossary::default(), settings(1, 0));
        let outcome = s.run(&r, &chunks, &CancellationToken::new()).await.unwrap();
        assert_eq!(stub.batches.lock().unwrap()[0], vec!["Yes", "No"]);
        assert_eq!(outcome.translations[&RunId(2)], "YES");
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_text_across_concurrent_chunks_sent_once() {
        let r = runs(&["Hello", "Hello", "Hello", "Hello"]);
        let chunks = chunk_runs(&r, 1);
        assert_eq!(chunks.len(), 4);
        let stub = Arc::new(Flaky::default());
        let s = scheduler(stub.clone(), Arc::new(MemoryCache::new()), Glossary::default(), settings(4, 0));

        let outcome = s.run(&r, &chunks, &CancellationToken::new()).await.unwrap();
        assert!(outcome.is_complete());
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.stats.provider_calls, 1);
        assert_eq!(outcome.stats.cache_hits, 3);
        for id in 0..4 {
            assert_eq!(outcome.translations[&RunId(id)], "HELLO");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_retry_when_shared_request_fails() {
        let r = runs(&["Hello", "Hello", "Hello"]);
        let chunks = chunk_runs(&r, 1);
        let stub = Arc::new(Flaky {
            fail_first: 1,
            calls: AtomicUsize::new(0),
        });
        let s = scheduler(stub.clone(), Arc::new(MemoryCache::new()), Glossary::default(), settings(3, 2));

        let outcome = s.run(&r, &chunks, &CancellationToken::new()).await.unwrap();
        assert!(outcome.is_complete());
        assert_eq!(stub.calls.load(Ordering::SeqCst), 2);
        for id in 0..3 {
            assert_eq!(outcome.translations[&RunId(id)], "HELLO");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bound() {
        let texts: Vec<String> = (0..12).map(|i| format!("run {i}")).collect();
        let refs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
        let r = runs(&refs);
        let chunks = chunk_runs(&r, 1);
        let stub = Arc::new(Slow::default());
        let s = scheduler(stub.clone(), Arc::new(MemoryCache::new()), Glossary::default(), settings(3, 0));

        let outcome = s.run(&r, &chunks, &CancellationToken::new()).await.unwrap();
        assert!(outcome.is_complete());
        assert!(stub.peak.load(Ordering::SeqCst) <= 3);
        assert!(stub.peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_glossary_terms_fixed_despite_model_variance() {
        let r = runs(&["Pay the invoice", "Another invoice here", "invoice"]);
        let chunks = chunk_runs(&r, 1);
        let stub = Arc::new(Noisy::default());
        let glossary = Glossary::new([("invoice", "hóa đơn")]);
        let s = scheduler(stub.clone(), Arc::new(MemoryCache::new()), glossary, settings(3, 0));

        let outcome = s.run(&r, &chunks, &CancellationToken::new()).await.unwrap();
        for id in 0..3 {
            let t = &outcome.translations[&RunId(id)];
            assert!(t.contains("hóa đơn"), "{t}");
            assert!(!t.contains("bill"), "{t}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retryable() {
        let r = runs(&["slow"]);
        let chunks = chunk_runs(&r, 100);
        let mut st = settings(1, 2);
        st.call_timeout = Duration::from_secs(1);
        let s = scheduler(Arc::new(Hanging), Arc::new(MemoryCache::new()), Glossary::default(), st);

        let outcome = s.run(&r, &chunks, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.failed_chunks(), vec![0]);
        assert_eq!(outcome.stats.retries, 2);
        assert_eq!(outcome.stats.provider_calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_comes_from_previous_chunk() {
        let r = runs(&["aa", "bb", "cc", "dd"]);
        let chunks = chunk_runs(&r, 6);
        assert_eq!(chunks.len(), 2);
        let stub = Arc::new(Upper::default());
        let s = scheduler(stub.clone(), Arc::new(MemoryCache::new()), Glossary::default(), settings(1, 0));

        s.run(&r, &chunks, &CancellationToken::new()).await.unwrap();
        let contexts = stub.contexts.lock().unwrap().clone();
        assert_eq!(contexts[0], "");
        assert_eq!(contexts[1], "BB CC");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start_dispatches_nothing() {
        let r = runs(&["a", "b"]);
        let chunks = chunk_runs(&r, 1);
        let stub = Arc::new(Upper::default());
        let s = scheduler(stub.clone(), Arc::new(MemoryCache::new()), Glossary::default(), settings(2, 0));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = s.run(&r, &chunks, &cancel).await.unwrap_err();
        assert!(matches!(err, TranslateError::Cancelled));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_returns_promptly() {
        let r = runs(&["bad"]);
        let chunks = chunk_runs(&r, 100);
        let stub = Arc::new(Failing {
            poison: "bad",
            auth: false,
            calls: AtomicUsize::new(0),
        });
        let mut st = settings(1, 5);
        st.retry_base_delay = Duration::from_secs(3600);
        st.retry_max_delay = Duration::from_secs(3600);
        let s = scheduler(stub.clone(), Arc::new(MemoryCache::new()), Glossary::default(), st);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let err = s.run(&r, &chunks, &cancel).await.unwrap_err();
        assert!(matches!(err, TranslateError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(60));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1, "no attempt after cancellation");
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_skips_checkpointed_chunks() {
        let tmp = tempfile::TempDir::new().unwrap();
        let r = runs(&["first", "second", "third"]);
        let chunks = chunk_runs(&r, 1);
        let checkpoint = Arc::new(
            CheckpointStore::open(tmp.path().join("c.json"), "doc", "plan", chunks.len(), true)
                .await
                .unwrap(),
        );
        checkpoint
            .mark_done(0, vec![(RunId(0), "PREVIOUS".to_string())])
            .await
            .unwrap();

        let stub = Arc::new(Upper::default());
        let s = scheduler(stub.clone(), Arc::new(MemoryCache::new()), Glossary::default(), settings(1, 0))
            .with_checkpoint(checkpoint.clone());
        let outcome = s.run(&r, &chunks, &CancellationToken::new()).await.unwrap();

        assert_eq!(outcome.stats.resumed, 1);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.translations[&RunId(0)], "PREVIOUS");
        let seen: Vec<String> = stub.batches.lock().unwrap().iter().flatten().cloned().collect();
        assert!(!seen.contains(&"first".to_string()));
        assert!(checkpoint.snapshot().await.is_complete());
    }

    #[test]
    fn test_backoff_delay() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(10);
        assert_eq!(backoff_delay(base, max, 0, None, 0.0), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, max, 2, None, 0.0), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, max, 10, None, 0.0), max);
        assert_eq!(backoff_delay(base, max, 1, None, 0.25), Duration::from_millis(2500));
        assert_eq!(
            backoff_delay(base, max, 0, Some(Duration::from_secs(7)), 0.0),
            Duration::from_secs(7)
        );
        assert_eq!(backoff_delay(base, max, 0, Some(Duration::from_secs(60)), 0.0), max);
    }
}
