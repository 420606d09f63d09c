//! OpenAI-compatible provider client (also used for OpenAI-API-compatible
//! gateways via `base_url`, e.g. Azure-style proxies or local inference
//! servers). Implements both embeddings and chat completions.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::sse::sse_lines;
use super::{ChatMessage, ChatProvider as ChatProviderTrait, CompletionDelta, CompletionOptions, EmbeddingProvider};
use crate::error::{MimirError, Result};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(api_key: String, model: String, base_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            model,
        }
    }

    fn auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.bearer_auth(&self.api_key)
    }
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    index: usize,
}

#[async_trait]
impl EmbeddingProvider for OpenAiClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let resp = self
            .auth(self.http.post(format!("{}/embeddings", self.base_url)))
            .json(&EmbeddingsRequest { model: &self.model, input: texts })
            .send()
            .await
            .map_err(|e| MimirError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(MimirError::Provider { status, message });
        }

        let parsed: EmbeddingsResponse = resp.json().await.map_err(|e| MimirError::Transport(e.to_string()))?;
        let mut ordered = vec![Vec::new(); texts.len()];
        for datum in parsed.data {
            if let Some(slot) = ordered.get_mut(datum.index) {
                *slot = datum.embedding;
            }
        }
        Ok(ordered)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatRequestMessage<'a>>,
    temperature: f32,
    max_tokens: usize,
    stream: bool,
}

#[derive(Serialize)]
struct ChatRequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatStreamChunk {
    choices: Vec<ChatStreamChoice>,
}

#[derive(Deserialize)]
struct ChatStreamChoice {
    delta: ChatStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChatStreamDelta {
    content: Option<String>,
}

fn to_request_messages<'a>(messages: &'a [ChatMessage]) -> Vec<ChatRequestMessage<'a>> {
    messages
        .iter()
        .map(|m| ChatRequestMessage { role: &m.role, content: &m.content })
        .collect()
}

#[async_trait]
impl ChatProviderTrait for OpenAiClient {
    async fn complete(&self, messages: &[ChatMessage], options: &CompletionOptions) -> Result<String> {
        let resp = self
            .auth(self.http.post(format!("{}/chat/completions", self.base_url)))
            .json(&ChatRequest {
                model: &self.model,
                messages: to_request_messages(messages),
                temperature: options.temperature,
                max_tokens: options.max_output_tokens,
                stream: false,
            })
            .send()
            .await
            .map_err(|e| MimirError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(MimirError::Provider { status, message });
        }

        let parsed: ChatResponse = resp.json().await.map_err(|e| MimirError::Transport(e.to_string()))?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default())
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<BoxStream<'static, Result<CompletionDelta>>> {
        let resp = self
            .auth(self.http.post(format!("{}/chat/completions", self.base_url)))
            .json(&ChatRequest {
                model: &self.model,
                messages: to_request_messages(messages),
                temperature: options.temperature,
                max_tokens: options.max_output_tokens,
                stream: true,
            })
            .send()
            .await
            .map_err(|e| MimirError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(MimirError::Provider { status, message });
        }

        let byte_stream = resp.bytes_stream();
        let event_stream = sse_lines(byte_stream).filter_map(|line| async move {
            let line = line.ok()?;
            let payload = line.strip_prefix("data: ")?;
            if payload == "[DONE]" {
                return Some(Ok(CompletionDelta { content: String::new(), done: true }));
            }
            let chunk: ChatStreamChunk = serde_json::from_str(payload).ok()?;
            let choice = chunk.choices.into_iter().next()?;
            Some(Ok(CompletionDelta {
                content: choice.delta.content.unwrap_or_default(),
                done: choice.finish_reason.is_some(),
            }))
        });

        Ok(Box::pin(event_stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_messages_preserve_order_and_content() {
        let messages = vec![
            ChatMessage { role: "system".into(), content: "be terse".into() },
            ChatMessage { role: "user".into(), content: "hello".into() },
        ];
        let converted = to_request_messages(&messages);
        assert_eq!(converted.len(), 2);
        assert_eq!(converted[0].role, "system");
        assert_eq!(converted[1].content, "hello");
    }
}
