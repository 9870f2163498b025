//! Fixed-terminology glossary.
//!
//! A [`Glossary`] maps source terms to fixed target terms. Before a provider
//! call, [`Glossary::protect`] replaces every matched term with an opaque
//! placeholder (`[[G0]]`, `[[G1]]`, …); after the call,
//! [`Protected::restore`] swaps the placeholders for the fixed targets. The
//! model never sees the term, so its rendering cannot vary.
//!
//! Matching is case-sensitive, longest-match-first, and respects word
//! boundaries on alphanumeric term edges (`API` does not match inside
//! `RAPID`).

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

/// Technical terms kept as-is unless a glossary file overrides them.
pub const DEFAULT_KEEP_TERMS: &[&str] = &[
    "API", "URL", "HTTP", "HTTPS", "JSON", "XML", "HTML", "CSS", "JavaScript", "TypeScript",
    "Python", "React", "Node.js", "Git", "GitHub", "Docker", "Kubernetes", "AWS", "Azure", "GCP",
    "SQL", "NoSQL", "REST", "GraphQL", "OAuth", "JWT", "SDK", "CLI", "UI", "UX", "CI/CD",
    "DevOps", "Linux", "macOS", "Windows", "iOS", "Android",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlossaryEntry {
    pub source: String,
    pub target: String,
}

/// Ordered term table, longest source first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Glossary {
    entries: Vec<GlossaryEntry>,
}

impl Glossary {
    /// Build a glossary. Later duplicates of a source term win; empty source
    /// terms are ignored.
    pub fn new<I, K, V>(terms: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = BTreeMap::new();
        for (k, v) in terms {
            let k = k.into();
            if k.is_empty() {
                continue;
            }
            map.insert(k, v.into());
        }
        Self::from_map(map)
    }

    fn from_map(map: BTreeMap<String, String>) -> Self {
        let mut entries: Vec<GlossaryEntry> = map
            .into_iter()
            .map(|(source, target)| GlossaryEntry { source, target })
            .collect();
        // Stable over the BTreeMap order, so ties stay lexicographic.
        entries.sort_by(|a, b| b.source.chars().count().cmp(&a.source.chars().count()));
        Self { entries }
    }

    /// The built-in keep-as-is terms, each mapped to itself.
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_KEEP_TERMS.iter().map(|t| (*t, *t)))
    }

    /// Merge `overrides` on top of this glossary.
    pub fn with_overrides<I, K, V>(self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map: BTreeMap<String, String> = self
            .entries
            .into_iter()
            .map(|e| (e.source, e.target))
            .collect();
        for (k, v) in overrides {
            let k = k.into();
            if !k.is_empty() {
                map.insert(k, v.into());
            }
        }
        Self::from_map(map)
    }

    pub fn entries(&self) -> &[GlossaryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replace glossary terms in `text` with numbered placeholders.
    ///
    /// The placeholder tag is lengthened (`[[G0]]`, `[[GG0]]`, …) until it
    /// occurs in neither the text nor any target, so literal placeholder-like
    /// text in a document is never rewritten by [`Protected::restore`].
    pub fn protect(&self, text: &str) -> Protected {
        let tag = self.placeholder_tag(text);
        let mut out = String::with_capacity(text.len());
        let mut targets = Vec::new();
        let mut prev: Option<char> = None;
        let mut i = 0;

        while i < text.len() {
            let rest = &text[i..];
            let hit = self
                .entries
                .iter()
                .find(|e| rest.starts_with(&e.source) && at_boundary(prev, &e.source, &rest[e.source.len()..]));

            if let Some(entry) = hit {
                out.push_str(&placeholder(&tag, targets.len()));
                targets.push(entry.target.clone());
                prev = entry.source.chars().last();
                i += entry.source.len();
                continue;
            }

            let Some(c) = rest.chars().next() else { break };
            out.push(c);
            prev = Some(c);
            i += c.len_utf8();
        }

        Protected {
            text: out,
            tag,
            targets,
        }
    }

    fn placeholder_tag(&self, text: &str) -> String {
        let mut tag = String::from("G");
        loop {
            let opening = format!("[[{tag}");
            let clashes = text.contains(&opening)
                || self.entries.iter().any(|e| e.target.contains(&opening));
            if !clashes {
                return tag;
            }
            tag.push('G');
        }
    }

    /// SHA-256 over the ordered entries. Part of the cache context hash.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for e in &self.entries {
            hasher.update(e.source.as_bytes());
            hasher.update([0u8]);
            hasher.update(e.target.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }
}

fn at_boundary(prev: Option<char>, term: &str, after: &str) -> bool {
    let starts_word = term.chars().next().is_some_and(char::is_alphanumeric);
    let ends_word = term.chars().last().is_some_and(char::is_alphanumeric);
    if starts_word && prev.is_some_and(char::is_alphanumeric) {
        return false;
    }
    if ends_word && after.chars().next().is_some_and(char::is_alphanumeric) {
        return false;
    }
    true
}

fn placeholder(tag: &str, n: usize) -> String {
    format!("[[{tag}{n}]]")
}

/// Text with glossary terms swapped for placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Protected {
    pub text: String,
    tag: String,
    targets: Vec<String>,
}

impl Protected {
    /// Whether any term was replaced.
    pub fn has_terms(&self) -> bool {
        !self.targets.is_empty()
    }

    /// Substitute the fixed target terms back into a translation.
    pub fn restore(&self, translated: &str) -> String {
        let mut out = translated.to_string();
        // Highest slot first so `[[G1]]` never clobbers part of `[[G10]]`.
        for (n, target) in self.targets.iter().enumerate().rev() {
            out = out.replace(&placeholder(&self.tag, n), target);
        }
        out
    }
}
