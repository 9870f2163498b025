//! Directory (batch) mode.
//!
//! Every `*.docx` directly inside the input directory is translated in name
//! order, each with its own checkpoint. Office lock files (`~$report.docx`)
//! are skipped. A failing file does not stop the batch, except for
//! credential errors and cancellation, which skip the remaining files.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use walkdir::WalkDir;

use translatex_core::error::TranslateError;
use translatex_core::translator::Translator;

use crate::config::Config;
use crate::pipeline::{translate_file, JobReport, JobResources};

/// `.docx` files directly in `dir`, lock files excluded, sorted by name.
pub fn collect_inputs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut inputs = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("Failed to read directory: {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with("~$") {
            continue;
        }
        let is_docx = entry
            .path()
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("docx"));
        if is_docx {
            inputs.push(entry.into_path());
        }
    }
    inputs.sort();
    Ok(inputs)
}

#[derive(Debug)]
pub enum FileOutcome {
    Translated(JobReport),
    Failed(TranslateError),
    /// Not attempted because an earlier file aborted the batch.
    Skipped,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub files: Vec<(PathBuf, FileOutcome)>,
}

impl BatchReport {
    /// Whether any file failed or was skipped.
    pub fn has_failures(&self) -> bool {
        self.files
            .iter()
            .any(|(_, o)| !matches!(o, FileOutcome::Translated(_)))
    }

    pub fn print_table(&self) {
        println!("batch: {} files", self.files.len());
        for (path, outcome) in &self.files {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let status = match outcome {
                FileOutcome::Translated(r) if r.is_complete() => "ok".to_string(),
                FileOutcome::Translated(r) => {
                    format!("partial ({} runs untranslated)", r.untranslated.len())
                }
                FileOutcome::Failed(e) => format!("failed: {e}"),
                FileOutcome::Skipped => "skipped".to_string(),
            };
            println!("  {:<40} {}", name, status);
        }
    }
}

/// Translate every input of `dir` into `output_dir`.
pub async fn run_batch<T: Translator + 'static>(
    resources: &JobResources<T>,
    config: &Config,
    dir: &Path,
    output_dir: &Path,
    cancel: &CancellationToken,
) -> Result<BatchReport> {
    let inputs = collect_inputs(dir)?;
    if inputs.is_empty() {
        warn!(dir = %dir.display(), "no .docx files found");
    }

    let mut report = BatchReport::default();
    let mut aborted = false;

    for input in inputs {
        if aborted || cancel.is_cancelled() {
            report.files.push((input, FileOutcome::Skipped));
            continue;
        }
        match translate_file(resources, config, &input, output_dir, cancel).await {
            Ok(job) => {
                job.print_summary();
                report.files.push((input, FileOutcome::Translated(job)));
            }
            Err(e) => {
                error!(file = %input.display(), error = %e, "translation failed");
                if matches!(e, TranslateError::Auth(_) | TranslateError::Cancelled) {
                    aborted = true;
                }
                report.files.push((input, FileOutcome::Failed(e)));
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn collects_docx_only_sorted_and_skips_lock_files() {
        let tmp = TempDir::new().unwrap();
        for name in ["b.docx", "a.DOCX", "~$a.docx", "notes.txt", "c.doc"] {
            std::fs::write(tmp.path().join(name), b"").unwrap();
        }
        std::fs::create_dir(tmp.path().join("nested")).unwrap();
        std::fs::write(tmp.path().join("nested").join("d.docx"), b"").unwrap();

        let inputs = collect_inputs(tmp.path()).unwrap();
        let names: Vec<String> = inputs
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.DOCX", "b.docx"]);
    }

    #[test]
    fn failures_are_reported() {
        let mut report = BatchReport::default();
        assert!(!report.has_failures());
        report.files.push((PathBuf::from("x.docx"), FileOutcome::Skipped));
        assert!(report.has_failures());
    }
}
