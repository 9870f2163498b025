//! The translation capability.
//!
//! The scheduler only ever talks to a [`Translator`]. Concrete provider
//! adapters (OpenAI, Gemini, Groq, OpenRouter) live in the `translatex`
//! crate; tests plug in stubs.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::glossary::Glossary;

/// Translate an ordered batch of texts.
///
/// Implementations must return exactly one output per input, in input
/// order. Errors:
///
/// - [`TranslateError::RateLimited`](crate::error::TranslateError::RateLimited): back off and retry.
/// - [`TranslateError::Api`](crate::error::TranslateError::Api): transient, retryable.
/// - [`TranslateError::Auth`](crate::error::TranslateError::Auth): fatal for the job.
///
/// The glossary is passed for prompt construction only. Term substitution
/// itself happens in the scheduler, around the call.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Short label used in logs, e.g. `openai:gpt-4o-mini`.
    fn name(&self) -> String;

    async fn translate(
        &self,
        texts: &[String],
        context: &str,
        target_lang: &str,
        glossary: &Glossary,
    ) -> Result<Vec<String>>;
}

#[async_trait]
impl<T: Translator + ?Sized> Translator for Arc<T> {
    fn name(&self) -> String {
        (**self).name()
    }

    async fn translate(
        &self,
        texts: &[String],
        context: &str,
        target_lang: &str,
        glossary: &Glossary,
    ) -> Result<Vec<String>> {
        (**self).translate(texts, context, target_lang, glossary).await
    }
}
