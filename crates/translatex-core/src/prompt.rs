//! Prompt construction and run-marker handling.
//!
//! A batch of texts is sent to the model as numbered markers:
//!
//! ```text
//! <R0>first run</R0>
//! <R1>second run</R1>
//! ```
//!
//! and the response is parsed back marker by marker. A response that drops
//! any marker is rejected as a retryable [`TranslateError::Api`], so the
//! returned batch always matches the input cardinality and order.

use crate::error::{Result, TranslateError};
use crate::glossary::Glossary;

/// System prompt naming the language pair, fixed terms and marker rules.
pub fn system_prompt(source_lang: &str, target_lang: &str, glossary: &Glossary) -> String {
    let mut prompt = format!(
        "You are a professional translator. Translate the text from {source_lang} to {target_lang}.\n\
         \n\
         Rules:\n\
         - Each segment is wrapped in numbered markers like <R0>...</R0>. Return every marker, \
         in the same order, each containing only the translation of its segment.\n\
         - Do not merge, split, add or drop segments.\n\
         - Keep placeholders such as [[G0]] exactly as written.\n\
         - Preserve leading and trailing punctuation, numbers and inline symbols.\n\
         - Output only the marked segments, with no commentary.\n"
    );

    let kept: Vec<&str> = glossary
        .entries()
        .iter()
        .filter(|e| e.source == e.target)
        .map(|e| e.source.as_str())
        .collect();
    let fixed: Vec<String> = glossary
        .entries()
        .iter()
        .filter(|e| e.source != e.target)
        .map(|e| format!("- {} => {}", e.source, e.target))
        .collect();

    if !kept.is_empty() {
        prompt.push_str("\nKeep these terms untranslated: ");
        prompt.push_str(&kept.join(", "));
        prompt.push('\n');
    }
    if !fixed.is_empty() {
        prompt.push_str("\nAlways translate these terms exactly as shown:\n");
        prompt.push_str(&fixed.join("\n"));
        prompt.push('\n');
    }
    prompt
}

/// User prompt: optional advisory context, then the marked segments.
pub fn user_prompt(texts: &[String], context: &str) -> String {
    let mut prompt = String::new();
    if !context.trim().is_empty() {
        prompt.push_str("Preceding text, for context only (do not translate):\n");
        prompt.push_str(context.trim());
        prompt.push_str("\n\n");
    }
    prompt.push_str("Segments to translate:\n");
    prompt.push_str(&mark_texts(texts));
    prompt
}

/// Wrap each text in its `<Rn>` marker, one per line.
pub fn mark_texts(texts: &[String]) -> String {
    texts
        .iter()
        .enumerate()
        .map(|(i, t)| format!("<R{i}>{t}</R{i}>"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extract `expected` marked segments from a model response.
pub fn parse_marked(response: &str, expected: usize) -> Result<Vec<String>> {
    let mut out = Vec::with_capacity(expected);
    for i in 0..expected {
        let open = format!("<R{i}>");
        let close = format!("</R{i}>");
        let start = response
            .find(&open)
            .map(|p| p + open.len())
            .ok_or_else(|| TranslateError::Api(format!("response missing marker {open}")))?;
        let len = response[start..]
            .find(&close)
            .ok_or_else(|| TranslateError::Api(format!("response missing marker {close}")))?;
        out.push(response[start..start + len].to_string());
    }
    Ok(out)
}
