//! LLM abstraction and Gemini client.
//!
//! The router only needs "give me a reply for this text"; [`CompletionBackend`] is that seam,
//! and [`Completion`] makes the no-reply case an explicit variant instead of an empty string.

mod gemini;

pub use gemini::{GeminiClient, GeminiError};

use async_trait::async_trait;

/// Outcome of one completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Non-empty generated text.
    Produced(String),
    /// No usable reply (credential missing, upstream error, or empty candidate). Cause is logged.
    Unavailable,
}

impl Completion {
    /// Build from optional text: empty or whitespace-only text is `Unavailable`.
    pub fn from_text(text: Option<String>) -> Self {
        match text {
            Some(t) if !t.trim().is_empty() => Completion::Produced(t),
            _ => Completion::Unavailable,
        }
    }
}

/// Something that can turn user text into a reply.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Request a reply for `user_text`. Never fails: every error path maps to `Unavailable`.
    async fn complete(&self, user_text: &str) -> Completion;
}
