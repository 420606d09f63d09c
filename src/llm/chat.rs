//! Chat orchestration (§4.5): single-shot and streaming answer generation,
//! plus the two batched context-generation jobs the reconciler uses to
//! enrich a chunk's `contextual_text` before embedding.

use std::sync::Arc;

use futures::stream::BoxStream;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use super::{ChatMessage, ChatProvider, CompletionDelta, CompletionOptions};
use crate::config::ProviderLimits;
use crate::error::Result;
use crate::rate_limiter::RateLimiter;
use crate::tokenizer::count_tokens;

/// How many entities/chunks are bundled into a single context-generation
/// call, trading prompt overhead against per-item provider round trips.
const CONTEXT_BATCH_SIZE: usize = 5;

pub struct ChatClient {
    provider: Arc<dyn ChatProvider>,
    limiter: RateLimiter,
    options: CompletionOptions,
}

impl ChatClient {
    pub fn new(provider: Arc<dyn ChatProvider>, limits: &ProviderLimits, options: CompletionOptions) -> Self {
        Self { provider, limiter: RateLimiter::new(limits), options }
    }

    /// Single-shot completion.
    pub async fn generate_answer(&self, messages: &[ChatMessage], cancel: &CancellationToken) -> Result<String> {
        let estimated_tokens: u32 = messages.iter().map(|m| count_tokens(&m.content) as u32).sum();
        let provider = Arc::clone(&self.provider);
        let messages = messages.to_vec();
        let options = self.options.clone();
        self.limiter
            .run(estimated_tokens, cancel, || {
                let provider = Arc::clone(&provider);
                let messages = messages.clone();
                let options = options.clone();
                async move { provider.complete(&messages, &options).await }
            })
            .await
    }

    /// Streaming completion. Concurrency/rate budget is reserved up front;
    /// the stream itself is not retried mid-flight (a dropped connection
    /// surfaces as an error item the caller propagates to its SSE client).
    pub async fn stream_answer(
        &self,
        messages: &[ChatMessage],
        cancel: &CancellationToken,
    ) -> Result<BoxStream<'static, Result<CompletionDelta>>> {
        let _ = cancel;
        self.provider.stream(messages, &self.options).await
    }

    /// Generates one short context sentence per entity, batched
    /// `CONTEXT_BATCH_SIZE` at a time in a single numbered-list prompt.
    pub async fn generate_entity_contexts(
        &self,
        document_content: &str,
        entity_descriptions: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        self.generate_batched_contexts(document_content, entity_descriptions, cancel).await
    }

    /// Generates one short context sentence per file chunk, same batching
    /// and parsing strategy as entity contexts.
    pub async fn generate_file_chunk_contexts(
        &self,
        document_content: &str,
        chunk_excerpts: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        self.generate_batched_contexts(document_content, chunk_excerpts, cancel).await
    }

    async fn generate_batched_contexts(
        &self,
        document_content: &str,
        items: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let mut out = Vec::with_capacity(items.len());
        for batch in items.chunks(CONTEXT_BATCH_SIZE) {
            let prompt = build_context_prompt(document_content, batch);
            let messages = vec![ChatMessage { role: "user".to_string(), content: prompt }];
            let response = self.generate_answer(&messages, cancel).await?;
            let mut parsed = parse_numbered_list(&response, batch.len());
            out.append(&mut parsed);
        }
        Ok(out)
    }
}

fn build_context_prompt(document_content: &str, items: &[String]) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "Given the document below, write one short sentence of situating context for each \
         numbered item, so it can be understood on its own when retrieved out of context. \
         Reply with a numbered list matching the input numbering, nothing else.\n\n",
    );
    prompt.push_str("<document>\n");
    prompt.push_str(document_content);
    prompt.push_str("\n</document>\n\n");
    for (i, item) in items.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, item));
    }
    prompt
}

/// Parses a numbered-list response tolerant of `1.`, `1:` and `1)` markers.
/// Falls back to splitting on blank lines if no numbering is detected. If
/// neither strategy yields exactly `expected_count` entries and the response
/// is non-empty, the same trimmed response text is used for every slot
/// rather than padding with empty strings, so a batch never loses its
/// context sentence outright just because the model didn't number its reply.
fn parse_numbered_list(response: &str, expected_count: usize) -> Vec<String> {
    let marker = Regex::new(r"^\s*\d+[\.\):]\s*").expect("static regex");
    let mut items: Vec<String> = response
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                return None;
            }
            Some(marker.replace(trimmed, "").trim().to_string())
        })
        .filter(|s| !s.is_empty())
        .collect();

    if items.len() != expected_count {
        items = response
            .split("\n\n")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    if items.len() != expected_count {
        let trimmed = response.trim();
        items = if trimmed.is_empty() {
            vec![String::new(); expected_count]
        } else {
            vec![trimmed.to_string(); expected_count]
        };
    }

    items
}
