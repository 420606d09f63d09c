//! Multi-provider LLM runtime (§4.4 embeddings, §4.5 chat). `LlmProvider` is
//! the seam the rate limiter and the reconciler/answer composer code against;
//! `openai`/`google`/`mistral`/`anthropic` are the concrete HTTP clients.

pub mod anthropic;
pub mod chat;
pub mod embedding;
pub mod google;
pub mod mistral;
pub mod openai;
mod sse;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;

/// One chat turn. `role` is `"system"` | `"user"` | `"assistant"`.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_output_tokens: usize,
}

/// A single streamed delta of a chat completion.
#[derive(Debug, Clone)]
pub struct CompletionDelta {
    pub content: String,
    pub done: bool,
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embeds a batch of texts, preserving input order in the output.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Single-shot completion, returning the full response text.
    async fn complete(&self, messages: &[ChatMessage], options: &CompletionOptions) -> Result<String>;

    /// Streaming completion, yielding cumulative-safe deltas as they arrive.
    async fn stream(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<BoxStream<'static, Result<CompletionDelta>>>;
}
