//! Single-document translation job.
//!
//! ```text
//! read input → extract runs → chunk → open checkpoint
//!   → schedule (cache, glossary, rate limit, provider)
//!   → apply translations → reassemble → write output (+ review page)
//! ```
//!
//! Shared, job-independent state (translator, cache, glossary, rate
//! limiter) lives in [`JobResources`] so a batch run can reuse it across
//! files. Fatal errors (`Extraction`, `Auth`, `Cancelled`, I/O) abort the
//! job before any output is written; chunk failures only leave their runs
//! untranslated.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use translatex_core::cache::memory::MemoryCache;
use translatex_core::cache::{TranslationCache, TranslationContext};
use translatex_core::chunk::{chunk_runs, plan_hash};
use translatex_core::error::{Result, TranslateError};
use translatex_core::glossary::Glossary;
use translatex_core::models::RunId;
use translatex_core::translator::Translator;

use crate::checkpoint::{document_id, CheckpointStore};
use crate::config::Config;
use crate::docx;
use crate::glossary_file::load_glossary;
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter};
use crate::rate_limit::{RateBudget, RateLimiter};
use crate::review;
use crate::scheduler::{Scheduler, SchedulerSettings, SchedulerStats};
use crate::sqlite_cache::SqliteCache;

/// State shared by every document of a run.
pub struct JobResources<T> {
    pub translator: Arc<T>,
    pub cache: Arc<dyn TranslationCache>,
    pub glossary: Arc<Glossary>,
    pub limiter: Arc<RateLimiter>,
    pub progress: Arc<dyn ProgressReporter>,
}

impl<T: Translator + 'static> JobResources<T> {
    /// Load the glossary, open the cache, and size the rate limiter for the
    /// configured provider.
    ///
    /// A configured glossary file that cannot be loaded is fatal. A cache
    /// that cannot be opened degrades to an in-memory one.
    pub async fn prepare(config: &Config, output_dir: &Path, translator: Arc<T>) -> Result<Self> {
        let glossary = load_glossary(config.glossary_file.as_deref())?;

        let cache: Arc<dyn TranslationCache> = if config.cache_enabled {
            match SqliteCache::open_or_disable(&config.cache_path_for(output_dir)).await {
                Some(cache) => Arc::new(cache),
                None => Arc::new(MemoryCache::new()),
            }
        } else {
            Arc::new(MemoryCache::new())
        };

        Ok(Self {
            translator,
            cache,
            glossary: Arc::new(glossary),
            limiter: Arc::new(RateLimiter::new(RateBudget::for_provider(&config.provider))),
            progress: Arc::new(NoProgress),
        })
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Cache context for this job: source language, model, glossary.
    pub fn context_hash(&self, config: &Config) -> String {
        TranslationContext {
            source_lang: config.source_lang.clone(),
            model: self.translator.name(),
            glossary_fingerprint: self.glossary.fingerprint(),
        }
        .hash()
    }
}

/// Result of one document job.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub review: Option<PathBuf>,
    pub runs: usize,
    pub chunks: usize,
    pub stats: SchedulerStats,
    /// Runs written back in the source language, in document order.
    pub untranslated: Vec<(RunId, String)>,
    /// Set when chunks failed and the checkpoint was left for a re-run.
    pub checkpoint: Option<PathBuf>,
}

impl JobReport {
    pub fn is_complete(&self) -> bool {
        self.stats.failed == 0 && self.untranslated.is_empty()
    }

    /// Print the job summary to stdout.
    pub fn print_summary(&self) {
        println!("translate {}", self.input.display());
        println!("  runs: {}", self.runs);
        println!(
            "  chunks: {} (done {}, failed {}, resumed {})",
            self.chunks, self.stats.done, self.stats.failed, self.stats.resumed
        );
        println!("  cache hits: {}", self.stats.cache_hits);
        println!("  provider calls: {}", self.stats.provider_calls);
        if self.stats.retries > 0 {
            println!("  retries: {}", self.stats.retries);
        }
        println!("  output: {}", self.output.display());
        if let Some(review) = &self.review {
            println!("  review: {}", review.display());
        }
        if !self.untranslated.is_empty() {
            println!("  untranslated runs: {}", self.untranslated.len());
            for (id, text) in &self.untranslated {
                println!("    {:<6} {:?}", id.to_string(), truncate(text, 60));
            }
        }
        if let Some(checkpoint) = &self.checkpoint {
            println!(
                "  checkpoint kept: {} (re-run to retry failed chunks)",
                checkpoint.display()
            );
        }
        println!("{}", if self.is_complete() { "ok" } else { "partial" });
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}

/// Where the translated copy of `input` goes.
pub fn output_path_for(output_dir: &Path, input: &Path) -> Result<PathBuf> {
    let name = input.file_name().ok_or_else(|| {
        TranslateError::Config(format!("input has no file name: {}", input.display()))
    })?;
    Ok(output_dir.join(name))
}

/// Refuse to overwrite the input document.
fn ensure_distinct(input: &Path, output: &Path) -> Result<()> {
    let input = std::fs::canonicalize(input)?;
    let same = match output.parent().map(std::fs::canonicalize) {
        Some(Ok(dir)) => output.file_name().map(|n| dir.join(n)) == Some(input.clone()),
        _ => false,
    };
    if same {
        return Err(TranslateError::Config(format!(
            "output path {} is the input file; choose a different output directory",
            output.display()
        )));
    }
    Ok(())
}

/// Translate one document into `output_dir`.
pub async fn translate_file<T: Translator + 'static>(
    resources: &JobResources<T>,
    config: &Config,
    input: &Path,
    output_dir: &Path,
    cancel: &CancellationToken,
) -> Result<JobReport> {
    let label = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| input.display().to_string());
    resources.progress.report(ProgressEvent::Extracting {
        document: label.clone(),
    });

    tokio::fs::create_dir_all(output_dir).await?;
    let output = output_path_for(output_dir, input)?;
    ensure_distinct(input, &output)?;

    let bytes = tokio::fs::read(input).await?;
    let docx::ExtractedDocument { package, mut runs } = docx::extract(&bytes)?;
    let chunks = chunk_runs(&runs, config.max_chunk_size);
    let plan = plan_hash(&runs, &chunks);
    info!(document = %label, runs = runs.len(), chunks = chunks.len(), "extracted document");

    let checkpoint_path = CheckpointStore::path_for(output_dir, input);
    let checkpoint = match CheckpointStore::open(
        checkpoint_path,
        &document_id(&bytes),
        &plan,
        chunks.len(),
        config.auto_resume,
    )
    .await
    {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            warn!(error = %e, "checkpoint unavailable, progress will not be resumable");
            None
        }
    };

    let resumed = match &checkpoint {
        Some(store) => store.completed().await.len() as u64,
        None => 0,
    };
    resources.progress.report(ProgressEvent::Planned {
        document: label.clone(),
        runs: runs.len() as u64,
        chunks: chunks.len() as u64,
        resumed,
    });

    let mut scheduler = Scheduler::new(
        resources.translator.clone(),
        resources.limiter.clone(),
        resources.cache.clone(),
        resources.context_hash(config),
        resources.glossary.clone(),
        SchedulerSettings::from_config(config),
    )
    .with_progress(resources.progress.clone(), label.clone());
    if let Some(store) = &checkpoint {
        scheduler = scheduler.with_checkpoint(store.clone());
    }

    let outcome = match scheduler.run(&runs, &chunks, cancel).await {
        Ok(outcome) => outcome,
        Err(e) => {
            if let Some(store) = &checkpoint {
                if let Err(pe) = store.persist().await {
                    warn!(error = %pe, "failed to persist checkpoint");
                }
            }
            return Err(e);
        }
    };

    for run in &mut runs {
        run.translated = outcome.translations.get(&run.id).cloned();
    }

    let translated = package.reassemble(&runs)?;
    let tmp = output.with_extension("docx.tmp");
    tokio::fs::write(&tmp, translated).await?;
    tokio::fs::rename(&tmp, &output).await?;

    let review = if config.review_mode {
        match review::write_review(&output, &config.target_lang, &runs) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, "failed to write review page");
                None
            }
        }
    } else {
        None
    };

    let untranslated: Vec<(RunId, String)> = runs
        .iter()
        .filter(|r| r.translated.is_none())
        .map(|r| (r.id, r.text.clone()))
        .collect();

    let kept_checkpoint = match &checkpoint {
        Some(store) if outcome.is_complete() => {
            if let Err(e) = store.clear().await {
                warn!(error = %e, "failed to remove checkpoint");
            }
            None
        }
        Some(store) => Some(store.path().to_path_buf()),
        None => None,
    };

    Ok(JobReport {
        input: input.to_path_buf(),
        output,
        review,
        runs: runs.len(),
        chunks: chunks.len(),
        stats: outcome.stats,
        untranslated,
        checkpoint: kept_checkpoint,
    })
}
