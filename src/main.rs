//! # TranslateX CLI (`translatex`)
//!
//! ```bash
//! translatex <INPUT> [--output_dir DIR] [--config FILE] [options]
//! ```
//!
//! `INPUT` is a `.docx` file or a directory of them. Translated copies keep
//! their file names and are written to the output directory (default
//! `output/`). An interrupted job resumes from its checkpoint on the next
//! run unless `--no-resume` is given.
//!
//! ## Examples
//!
//! ```bash
//! # Translate one document with the configured provider
//! translatex report.docx
//!
//! # Whole directory, Gemini, with a review page per file
//! translatex ./docs --provider gemini --review -o ./docs-vi
//!
//! # Machine-readable progress on stderr
//! translatex report.docx --progress json
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use translatex::batch;
use translatex::config::{self, Config};
use translatex::logging;
use translatex::pipeline::{self, JobResources};
use translatex::progress::{ProgressMode, ProgressReporter};
use translatex::providers::ProviderClient;

/// TranslateX: translate .docx documents with LLM providers while
/// preserving formatting.
#[derive(Parser)]
#[command(name = "translatex", version)]
struct Cli {
    /// A .docx file, or a directory whose .docx files are translated.
    input: PathBuf,

    /// Directory for translated documents, checkpoints and the cache.
    #[arg(short = 'o', long = "output_dir", default_value = "output")]
    output_dir: PathBuf,

    /// Path to configuration file (TOML). A missing file means defaults.
    #[arg(long, default_value = "./translatex.toml")]
    config: PathBuf,

    /// Provider: openai, gemini, groq, or openrouter.
    #[arg(long)]
    provider: Option<String>,

    /// Model name; defaults per provider.
    #[arg(long)]
    model: Option<String>,

    /// Target language, e.g. "Vietnamese".
    #[arg(long = "target-lang")]
    target_lang: Option<String>,

    /// Also write a side-by-side HTML review page.
    #[arg(long)]
    review: bool,

    /// Ignore and discard any existing checkpoint.
    #[arg(long)]
    no_resume: bool,

    /// Do not read or write the persistent translation cache.
    #[arg(long)]
    no_cache: bool,

    /// Progress output on stderr: off, human, or json.
    ///
    /// Defaults to human when stderr is a terminal, otherwise off.
    #[arg(long)]
    progress: Option<ProgressMode>,
}

impl Cli {
    /// Apply command-line overrides on top of the file configuration.
    fn apply(&self, cfg: &mut Config) {
        if let Some(provider) = &self.provider {
            cfg.provider = provider.clone();
        }
        if let Some(model) = &self.model {
            cfg.model = Some(model.clone());
        }
        if let Some(lang) = &self.target_lang {
            cfg.target_lang = lang.clone();
        }
        if self.review {
            cfg.review_mode = true;
        }
        if self.no_resume {
            cfg.auto_resume = false;
        }
        if self.no_cache {
            cfg.cache_enabled = false;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut cfg = config::load_config(&cli.config)?;
    cli.apply(&mut cfg);
    cfg.validate()?;
    logging::init(&cfg.log_level);

    let progress: Arc<dyn ProgressReporter> = Arc::from(
        cli.progress
            .unwrap_or_else(ProgressMode::default_for_tty)
            .reporter(),
    );

    let translator = Arc::new(ProviderClient::from_config(&cfg)?);
    let resources = JobResources::prepare(&cfg, &cli.output_dir, translator)
        .await?
        .with_progress(progress);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, waiting for in-flight requests to finish");
                cancel.cancel();
            }
        });
    }

    if cli.input.is_dir() {
        let report =
            batch::run_batch(&resources, &cfg, &cli.input, &cli.output_dir, &cancel).await?;
        report.print_table();
        if report.has_failures() {
            bail!("some documents were not translated");
        }
    } else {
        let job = pipeline::translate_file(&resources, &cfg, &cli.input, &cli.output_dir, &cancel)
            .await
            .with_context(|| format!("Failed to translate {}", cli.input.display()))?;
        job.print_summary();
    }

    Ok(())
}
