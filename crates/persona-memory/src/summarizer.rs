//! Conversation summarizer.
//!
//! Compacts a stretch of conversation into a short summary.  The actual
//! summarization is delegated to a [`SummaryBackend`] (in practice the
//! text-generation model); this module owns the policy around it:
//!
//! * input shorter than `min_length` words is returned unchanged;
//! * a backend failure is logged and the original text is returned.

use std::sync::Arc;

use async_trait::async_trait;
use persona_types::{PersonaError, Turn};
use tracing::{debug, error};

/// Default upper bound on summary length, in tokens.
pub const DEFAULT_MAX_LENGTH: usize = 150;
/// Default minimum input length, in words, worth summarizing.
pub const DEFAULT_MIN_LENGTH: usize = 40;

/// Model capable of producing a summary of free text.
#[async_trait]
pub trait SummaryBackend: Send + Sync {
    async fn summarize(&self, text: &str, max_length: usize, min_length: usize) -> Result<String, PersonaError>;
}

/// Summarization policy wrapper around a [`SummaryBackend`].
pub struct ConversationSummarizer {
    backend: Arc<dyn SummaryBackend>,
}

impl ConversationSummarizer {
    pub fn new(backend: Arc<dyn SummaryBackend>) -> Self {
        Self { backend }
    }

    /// Summarize `text`.  Never fails: short input and backend errors both
    /// yield the (trimmed) input.
    pub async fn summarize(&self, text: &str, max_length: usize, min_length: usize) -> String {
        let text = text.trim();
        if text.split_whitespace().count() < min_length {
            debug!("text too short to summarize, returning as-is");
            return text.to_string();
        }

        match self.backend.summarize(text, max_length, min_length).await {
            Ok(summary) => {
                let summary = summary.trim().to_string();
                debug!(input_chars = text.len(), output_chars = summary.len(), "text summarized");
                summary
            }
            Err(e) => {
                error!(error = %e, "failed to summarize text");
                text.to_string()
            }
        }
    }

    /// Render `turns` as `"author: content"` lines and summarize them.
    pub async fn summarize_conversation(&self, turns: &[Turn], max_length: usize) -> String {
        let text = turns.iter().map(Turn::render).collect::<Vec<_>>().join("\n");
        self.summarize(&text, max_length, DEFAULT_MIN_LENGTH).await
    }
}
