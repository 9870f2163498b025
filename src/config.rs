//! TOML configuration.
//!
//! All keys are flat and optional; a missing config file means "all
//! defaults". API keys fall back to the provider's environment variable
//! (`OPENAI_API_KEY`, `GEMINI_API_KEY`, `GROQ_API_KEY`, `OPENROUTER_API_KEY`).
//!
//! ```toml
//! provider = "gemini"
//! model = "gemini-2.0-flash"
//! target_lang = "Vietnamese"
//! max_concurrent = 3
//! glossary_file = "terms.toml"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub gemini_api_key: Option<String>,
    #[serde(default)]
    pub groq_api_key: Option<String>,
    #[serde(default)]
    pub openrouter_api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_source_lang")]
    pub source_lang: String,
    #[serde(default = "default_target_lang")]
    pub target_lang: String,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default = "default_true")]
    pub auto_resume: bool,
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    /// Defaults to `<output_dir>/.translatex-cache.sqlite`.
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    #[serde(default)]
    pub review_mode: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub glossary_file: Option<PathBuf>,
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_source_lang() -> String {
    "English".to_string()
}
fn default_target_lang() -> String {
    "Vietnamese".to_string()
}
fn default_max_concurrent() -> usize {
    5
}
fn default_max_chunk_size() -> usize {
    5000
}
fn default_true() -> bool {
    true
}
fn default_context_window() -> usize {
    2
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    1000
}
fn default_retry_max_delay_ms() -> u64 {
    60_000
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            openai_api_key: None,
            gemini_api_key: None,
            groq_api_key: None,
            openrouter_api_key: None,
            model: None,
            source_lang: default_source_lang(),
            target_lang: default_target_lang(),
            max_concurrent: default_max_concurrent(),
            max_chunk_size: default_max_chunk_size(),
            auto_resume: true,
            cache_enabled: true,
            cache_path: None,
            context_window: default_context_window(),
            review_mode: false,
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            timeout_secs: default_timeout_secs(),
            glossary_file: None,
            api_base_url: None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Model to request: the configured one or the provider default.
    pub fn model_name(&self) -> String {
        if let Some(m) = self.model.as_deref().filter(|m| !m.trim().is_empty()) {
            return m.to_string();
        }
        match self.provider.as_str() {
            "gemini" => "gemini-2.0-flash",
            "groq" => "llama-3.3-70b-versatile",
            "openrouter" => "meta-llama/llama-3.1-8b-instruct:free",
            _ => "gpt-4o-mini",
        }
        .to_string()
    }

    /// API key for the active provider, from config or environment.
    pub fn api_key(&self) -> Option<String> {
        let (configured, env_var) = match self.provider.as_str() {
            "gemini" => (&self.gemini_api_key, "GEMINI_API_KEY"),
            "groq" => (&self.groq_api_key, "GROQ_API_KEY"),
            "openrouter" => (&self.openrouter_api_key, "OPENROUTER_API_KEY"),
            _ => (&self.openai_api_key, "OPENAI_API_KEY"),
        };
        configured
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(env_var).ok().filter(|k| !k.trim().is_empty()))
    }

    pub fn cache_path_for(&self, output_dir: &Path) -> PathBuf {
        self.cache_path
            .clone()
            .unwrap_or_else(|| output_dir.join(".translatex-cache.sqlite"))
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Check value ranges and the provider name.
    pub fn validate(&self) -> Result<()> {
        match self.provider.as_str() {
            "openai" | "gemini" | "groq" | "openrouter" => {}
            other => anyhow::bail!(
                "Unknown provider: '{}'. Must be openai, gemini, groq, or openrouter.",
                other
            ),
        }

        if self.max_concurrent == 0 {
            anyhow::bail!("max_concurrent must be >= 1");
        }

        if self.max_chunk_size == 0 {
            anyhow::bail!("max_chunk_size must be >= 1");
        }

        if self.timeout_secs == 0 {
            anyhow::bail!("timeout_secs must be > 0");
        }

        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            anyhow::bail!("retry_max_delay_ms must be >= retry_base_delay_ms");
        }

        if self.target_lang.trim().is_empty() {
            anyhow::bail!("target_lang must not be empty");
        }

        Ok(())
    }
}

/// Load and validate the config file. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        let config = Config::default();
        config.validate()?;
        return Ok(config);
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    config.validate()?;
    Ok(config)
}
