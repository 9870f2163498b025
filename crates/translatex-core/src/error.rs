//! Error taxonomy for the translation pipeline.
//!
//! Variants fall into three groups:
//!
//! | Group | Variants | Handling |
//! |-------|----------|----------|
//! | Fatal | `Extraction`, `Auth`, `GlossaryLoad`, `Config` | job aborts, no output |
//! | Retryable | `RateLimited`, `Api` | retried per chunk up to `max_retries` |
//! | Degrading | `CacheIo`, `Checkpoint` | logged, job continues |

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("document extraction failed: {0}")]
    Extraction(String),

    #[error("provider rejected credentials: {0}")]
    Auth(String),

    #[error("rate limited by provider: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("provider API error: {0}")]
    Api(String),

    #[error("cache I/O error: {0}")]
    CacheIo(String),

    #[error("glossary load error: {0}")]
    GlossaryLoad(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("translation job cancelled")]
    Cancelled,
}

impl TranslateError {
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        TranslateError::RateLimited {
            message: message.into(),
            retry_after,
        }
    }

    /// Transient provider failures that the scheduler backs off and retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TranslateError::RateLimited { .. } | TranslateError::Api(_)
        )
    }

    /// Failures that abort the whole job.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TranslateError::Extraction(_)
                | TranslateError::Auth(_)
                | TranslateError::GlossaryLoad(_)
                | TranslateError::Config(_)
        )
    }

    /// Server-suggested delay, if the provider sent one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TranslateError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TranslateError>;
