//! Google Generative Language API client (Gemini). Embeddings via
//! `embedContent`/`batchEmbedContents`, chat via `generateContent` /
//! `streamGenerateContent`.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use super::sse::sse_lines;
use super::{ChatMessage, ChatProvider as ChatProviderTrait, CompletionDelta, CompletionOptions, EmbeddingProvider};
use crate::error::{MimirError, Result};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GoogleClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GoogleClient {
    pub fn new(api_key: String, model: String, base_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            model,
        }
    }
}

#[derive(Serialize)]
struct BatchEmbedRequest {
    requests: Vec<EmbedContentRequest>,
}

#[derive(Serialize)]
struct EmbedContentRequest {
    model: String,
    content: GeminiContent,
}

#[derive(Serialize, Deserialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize)]
struct BatchEmbedResponse {
    embeddings: Vec<GeminiEmbedding>,
}

#[derive(Deserialize)]
struct GeminiEmbedding {
    values: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for GoogleClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let url = format!(
            "{}/models/{}:batchEmbedContents?key={}",
            self.base_url, self.model, self.api_key
        );
        let requests = texts
            .iter()
            .map(|t| EmbedContentRequest {
                model: format!("models/{}", self.model),
                content: GeminiContent { parts: vec![GeminiPart { text: t.clone() }], role: None },
            })
            .collect();

        let resp = self
            .http
            .post(&url)
            .json(&BatchEmbedRequest { requests })
            .send()
            .await
            .map_err(|e| MimirError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(MimirError::Provider { status, message });
        }

        let parsed: BatchEmbedResponse = resp.json().await.map_err(|e| MimirError::Transport(e.to_string()))?;
        Ok(parsed.embeddings.into_iter().map(|e| e.values).collect())
    }
}

fn to_contents(messages: &[ChatMessage]) -> Vec<GeminiContent> {
    messages
        .iter()
        .map(|m| GeminiContent {
            parts: vec![GeminiPart { text: m.content.clone() }],
            role: Some(if m.role == "assistant" { "model".to_string() } else { "user".to_string() }),
        })
        .collect()
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[async_trait]
impl ChatProviderTrait for GoogleClient {
    async fn complete(&self, messages: &[ChatMessage], options: &CompletionOptions) -> Result<String> {
        let url = format!("{}/models/{}:generateContent?key={}", self.base_url, self.model, self.api_key);
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "contents": to_contents(messages),
                "generationConfig": {
                    "temperature": options.temperature,
                    "maxOutputTokens": options.max_output_tokens,
                }
            }))
            .send()
            .await
            .map_err(|e| MimirError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(MimirError::Provider { status, message });
        }

        let parsed: GenerateContentResponse = resp.json().await.map_err(|e| MimirError::Transport(e.to_string()))?;
        Ok(parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .unwrap_or_default())
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<BoxStream<'static, Result<CompletionDelta>>> {
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url, self.model, self.api_key
        );
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "contents": to_contents(messages),
                "generationConfig": {
                    "temperature": options.temperature,
                    "maxOutputTokens": options.max_output_tokens,
                }
            }))
            .send()
            .await
            .map_err(|e| MimirError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(MimirError::Provider { status, message });
        }

        let event_stream = sse_lines(resp.bytes_stream()).filter_map(|line| async move {
            let line = line.ok()?;
            let payload = line.strip_prefix("data: ")?;
            let chunk: GenerateContentResponse = serde_json::from_str(payload).ok()?;
            let candidate = chunk.candidates.into_iter().next()?;
            let text = candidate.content.parts.into_iter().next().map(|p| p.text).unwrap_or_default();
            Some(Ok(CompletionDelta { content: text, done: candidate.finish_reason.is_some() }))
        });

        Ok(Box::pin(event_stream))
    }
}
