//! LLM provider adapters.
//!
//! [`ProviderClient`] implements [`Translator`] for every supported
//! provider. The variant is picked once from config ([`ProviderKind`]);
//! variants differ only in endpoint, auth header and request/response
//! shape:
//!
//! | Provider | Endpoint | Auth |
//! |----------|----------|------|
//! | `openai` | `POST {base}/chat/completions` | `Authorization: Bearer` |
//! | `groq` | `POST {base}/chat/completions` | `Authorization: Bearer` |
//! | `openrouter` | `POST {base}/chat/completions` | `Authorization: Bearer`, `X-Title` |
//! | `gemini` | `POST {base}/models/{model}:generateContent` | `x-goog-api-key` |
//!
//! # Error mapping
//!
//! - HTTP 401/403 → [`TranslateError::Auth`] (fatal)
//! - HTTP 429 → [`TranslateError::RateLimited`], carrying `Retry-After`
//! - any other non-success status, network error, timeout, or a response
//!   missing run markers → [`TranslateError::Api`] (retryable)
//!
//! Retrying is the scheduler's job; a client makes exactly one request per
//! call.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use translatex_core::error::{Result, TranslateError};
use translatex_core::glossary::Glossary;
use translatex_core::prompt;
use translatex_core::translator::Translator;

use crate::config::Config;

const TEMPERATURE: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Gemini,
    Groq,
    OpenRouter,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Groq => "groq",
            ProviderKind::OpenRouter => "openrouter",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            ProviderKind::Groq => "https://api.groq.com/openai/v1",
            ProviderKind::OpenRouter => "https://openrouter.ai/api/v1",
        }
    }

    pub fn api_key_env(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Gemini => "GEMINI_API_KEY",
            ProviderKind::Groq => "GROQ_API_KEY",
            ProviderKind::OpenRouter => "OPENROUTER_API_KEY",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = TranslateError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "openai" => Ok(ProviderKind::OpenAi),
            "gemini" => Ok(ProviderKind::Gemini),
            "groq" => Ok(ProviderKind::Groq),
            "openrouter" => Ok(ProviderKind::OpenRouter),
            other => Err(TranslateError::Config(format!(
                "unknown provider '{other}'"
            ))),
        }
    }
}

/// A configured provider endpoint.
pub struct ProviderClient {
    kind: ProviderKind,
    model: String,
    api_key: String,
    base_url: String,
    source_lang: String,
    client: reqwest::Client,
}

impl ProviderClient {
    pub fn new(
        kind: ProviderKind,
        model: impl Into<String>,
        api_key: impl Into<String>,
        base_url: Option<String>,
        source_lang: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TranslateError::Config(format!("HTTP client: {e}")))?;
        let base_url = base_url
            .unwrap_or_else(|| kind.default_base_url().to_string())
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            kind,
            model: model.into(),
            api_key: api_key.into(),
            base_url,
            source_lang: source_lang.into(),
            client,
        })
    }

    /// Build the client for the configured provider.
    ///
    /// A missing API key is an [`TranslateError::Auth`] error.
    pub fn from_config(config: &Config) -> Result<Self> {
        let kind = ProviderKind::from_str(&config.provider)?;
        let api_key = config.api_key().ok_or_else(|| {
            TranslateError::Auth(format!(
                "no API key for {}: set {}_api_key in config or {}",
                kind.as_str(),
                kind.as_str(),
                kind.api_key_env()
            ))
        })?;
        Self::new(
            kind,
            config.model_name(),
            api_key,
            config.api_base_url.clone(),
            config.source_lang.clone(),
            config.timeout(),
        )
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn endpoint(&self) -> String {
        match self.kind {
            ProviderKind::Gemini => {
                format!("{}/models/{}:generateContent", self.base_url, self.model)
            }
            _ => format!("{}/chat/completions", self.base_url),
        }
    }

    fn request_body(&self, system: &str, user: &str) -> serde_json::Value {
        match self.kind {
            ProviderKind::Gemini => gemini_body(system, user),
            _ => chat_body(&self.model, system, user),
        }
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let mut request = self
            .client
            .post(self.endpoint())
            .header("Content-Type", "application/json")
            .json(&self.request_body(system, user));

        request = match self.kind {
            ProviderKind::Gemini => request.header("x-goog-api-key", &self.api_key),
            ProviderKind::OpenRouter => request
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("X-Title", "TranslateX"),
            _ => request.header("Authorization", format!("Bearer {}", self.api_key)),
        };

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TranslateError::Api(format!("{} request timed out", self.kind.as_str()))
            } else {
                TranslateError::Api(format!("{} request failed: {e}", self.kind.as_str()))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let body_text = response.text().await.unwrap_or_default();
            return Err(classify_status(
                self.kind,
                status.as_u16(),
                &body_text,
                retry_after,
            ));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TranslateError::Api(format!("invalid response body: {e}")))?;
        match self.kind {
            ProviderKind::Gemini => parse_gemini_response(&json),
            _ => parse_chat_response(&json),
        }
    }
}

#[async_trait]
impl Translator for ProviderClient {
    fn name(&self) -> String {
        format!("{}:{}", self.kind.as_str(), self.model)
    }

    async fn translate(
        &self,
        texts: &[String],
        context: &str,
        target_lang: &str,
        glossary: &Glossary,
    ) -> Result<Vec<String>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let system = prompt::system_prompt(&self.source_lang, target_lang, glossary);
        let user = prompt::user_prompt(texts, context);
        debug!(provider = self.kind.as_str(), segments = texts.len(), "sending batch");

        let reply = self.complete(&system, &user).await?;
        prompt::parse_marked(&reply, texts.len())
    }
}

/// OpenAI-compatible chat completion request.
fn chat_body(model: &str, system: &str, user: &str) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "temperature": TEMPERATURE,
        "messages": [
            { "role": "system", "content": system },
            { "role": "user", "content": user },
        ],
    })
}

/// Gemini `generateContent` request.
fn gemini_body(system: &str, user: &str) -> serde_json::Value {
    serde_json::json!({
        "systemInstruction": { "parts": [ { "text": system } ] },
        "contents": [ { "role": "user", "parts": [ { "text": user } ] } ],
        "generationConfig": { "temperature": TEMPERATURE },
    })
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| TranslateError::Api("invalid response: missing choices[0].message.content".into()))
}

fn parse_gemini_response(json: &serde_json::Value) -> Result<String> {
    let parts = json
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .ok_or_else(|| TranslateError::Api("invalid response: missing candidates[0].content.parts".into()))?;

    Ok(parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join(""))
}

fn classify_status(
    kind: ProviderKind,
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
) -> TranslateError {
    let message = format!("{} API error {}: {}", kind.as_str(), status, body.trim());
    match status {
        401 | 403 => TranslateError::Auth(message),
        429 => TranslateError::rate_limited(message, retry_after),
        _ => TranslateError::Api(message),
    }
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s >= 0.0 && *s < 1e9)
        .map(Duration::from_secs_f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(kind: ProviderKind) -> ProviderClient {
        ProviderClient::new(kind, "m-1", "key", None, "English", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("gemini".parse::<ProviderKind>().unwrap(), ProviderKind::Gemini);
        assert!(matches!(
            "palm".parse::<ProviderKind>(),
            Err(TranslateError::Config(_))
        ));
    }

    #[test]
    fn test_endpoints() {
        assert_eq!(
            client(ProviderKind::OpenAi).endpoint(),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            client(ProviderKind::Groq).endpoint(),
            "https://api.groq.com/openai/v1/chat/completions"
        );
        assert_eq!(
            client(ProviderKind::Gemini).endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/m-1:generateContent"
        );
        let custom = ProviderClient::new(
            ProviderKind::OpenRouter,
            "m",
            "k",
            Some("http://localhost:8080/v1/".to_string()),
            "English",
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(custom.endpoint(), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn test_request_shapes() {
        let chat = client(ProviderKind::OpenAi).request_body("sys", "usr");
        assert_eq!(chat["model"], "m-1");
        assert_eq!(chat["messages"][0]["role"], "system");
        assert_eq!(chat["messages"][1]["content"], "usr");

        let gemini = client(ProviderKind::Gemini).request_body("sys", "usr");
        assert_eq!(gemini["systemInstruction"]["parts"][0]["text"], "sys");
        assert_eq!(gemini["contents"][0]["parts"][0]["text"], "usr");
    }

    #[test]
    fn test_parse_chat_response() {
        let json = serde_json::json!({
            "choices": [ { "message": { "role": "assistant", "content": "<R0>Xin chào</R0>" } } ]
        });
        assert_eq!(parse_chat_response(&json).unwrap(), "<R0>Xin chào</R0>");
        assert!(parse_chat_response(&serde_json::json!({})).is_err());
    }

    #[test]
    fn test_parse_gemini_response_joins_parts() {
        let json = serde_json::json!({
            "candidates": [ { "content": { "parts": [ { "text": "<R0>a" }, { "text": "</R0>" } ] } } ]
        });
        assert_eq!(parse_gemini_response(&json).unwrap(), "<R0>a</R0>");
    }

    #[test]
    fn test_status_classification() {
        let auth = classify_status(ProviderKind::OpenAi, 401, "bad key", None);
        assert!(matches!(auth, TranslateError::Auth(_)));
        assert!(matches!(
            classify_status(ProviderKind::Gemini, 403, "", None),
            TranslateError::Auth(_)
        ));

        let limited = classify_status(ProviderKind::Groq, 429, "", Some(Duration::from_secs(3)));
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(3)));

        let server = classify_status(ProviderKind::OpenRouter, 503, "overloaded", None);
        assert!(matches!(server, TranslateError::Api(_)));
        assert!(server.is_retryable());
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("7"), Some(Duration::from_secs(7)));
        assert_eq!(parse_retry_after(" 1.5 "), Some(Duration::from_millis(1500)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
        assert_eq!(parse_retry_after("-1"), None);
    }

    #[test]
    fn test_missing_api_key_is_auth_error() {
        let config = Config {
            provider: "openrouter".to_string(),
            openrouter_api_key: Some("   ".to_string()),
            ..Config::default()
        };
        // Only meaningful when the env var is absent in the test environment.
        if std::env::var("OPENROUTER_API_KEY").is_err() {
            assert!(matches!(
                ProviderClient::from_config(&config),
                Err(TranslateError::Auth(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_request() {
        let c = client(ProviderKind::OpenAi);
        let out = c
            .translate(&[], "", "Vietnamese", &Glossary::default())
            .await
            .unwrap();
        assert!(out.is_empty());
    }
}
