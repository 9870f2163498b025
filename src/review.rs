//! Side-by-side review page.
//!
//! With `review_mode` on, the pipeline writes `<stem>.review.html` next to
//! the translated document: one table row per run with the source on the
//! left and the translation on the right. Runs left untranslated are
//! highlighted.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use quick_xml::escape::escape;

use translatex_core::models::Run;

const STYLE: &str = "body{font-family:sans-serif;margin:2em}\
table{border-collapse:collapse;width:100%}\
td,th{border:1px solid #ccc;padding:.4em;vertical-align:top;white-space:pre-wrap}\
th{background:#f4f4f4}\
tr.untranslated td{background:#fde2e2}\
td.id{color:#888;font-family:monospace;white-space:nowrap}";

pub fn review_path(output_path: &Path) -> PathBuf {
    let stem = output_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    output_path.with_file_name(format!("{stem}.review.html"))
}

/// Render the review page for `runs` in document order.
pub fn render_review(title: &str, target_lang: &str, runs: &[Run]) -> String {
    let untranslated = runs.iter().filter(|r| r.translated.is_none()).count();

    let mut html = String::new();
    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Review: {}</title>\
         <style>{STYLE}</style></head><body>\n",
        escape(title)
    );
    let _ = writeln!(
        html,
        "<h1>{}</h1>\n<p>{} runs, {} untranslated. Target language: {}.</p>",
        escape(title),
        runs.len(),
        untranslated,
        escape(target_lang)
    );
    html.push_str("<table>\n<tr><th>Run</th><th>Source</th><th>Translation</th></tr>\n");

    for run in runs {
        let (class, translated) = match &run.translated {
            Some(t) => ("", escape(t.as_str())),
            None => (" class=\"untranslated\"", escape(run.text.as_str())),
        };
        let _ = writeln!(
            html,
            "<tr{class}><td class=\"id\">{}</td><td>{}</td><td>{}</td></tr>",
            run.id,
            escape(run.text.as_str()),
            translated
        );
    }

    html.push_str("</table>\n</body></html>\n");
    html
}

/// Write the review page next to `output_path` and return its path.
pub fn write_review(output_path: &Path, target_lang: &str, runs: &[Run]) -> Result<PathBuf> {
    let path = review_path(output_path);
    let title = output_path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    std::fs::write(&path, render_review(&title, target_lang, runs))
        .with_context(|| format!("Failed to write review file: {}", path.display()))?;
    Ok(path)
}
