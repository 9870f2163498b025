//! Glossary file loading.
//!
//! The file is TOML with a single `[terms]` table:
//!
//! ```toml
//! [terms]
//! "invoice" = "hóa đơn"
//! "Kubernetes" = "Kubernetes"
//! ```
//!
//! Entries override the built-in keep-as-is terms.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use translatex_core::error::{Result, TranslateError};
use translatex_core::glossary::Glossary;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GlossaryFile {
    #[serde(default)]
    terms: BTreeMap<String, String>,
}

/// Build the job glossary: defaults, plus `path` if one is configured.
///
/// Any failure to read or parse a configured file is a
/// [`TranslateError::GlossaryLoad`].
pub fn load_glossary(path: Option<&Path>) -> Result<Glossary> {
    let defaults = Glossary::with_defaults();
    let Some(path) = path else {
        return Ok(defaults);
    };

    let content = std::fs::read_to_string(path)
        .map_err(|e| TranslateError::GlossaryLoad(format!("{}: {e}", path.display())))?;
    let file: GlossaryFile = toml::from_str(&content)
        .map_err(|e| TranslateError::GlossaryLoad(format!("{}: {e}", path.display())))?;

    tracing::debug!(path = %path.display(), terms = file.terms.len(), "loaded glossary file");
    Ok(defaults.with_overrides(file.terms))
}
