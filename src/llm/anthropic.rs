//! Anthropic Messages API client. Chat-only — Anthropic has no embeddings
//! endpoint, so `EmbeddingConfig` never names this provider (§6).

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use super::sse::sse_lines;
use super::{ChatMessage, ChatProvider as ChatProviderTrait, CompletionDelta, CompletionOptions};
use crate::error::{MimirError, Result};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl AnthropicClient {
    pub fn new(api_key: String, model: String, base_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            model,
        }
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}{}", self.base_url, path))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
    }
}

/// Anthropic's Messages API keeps `system` out of the `messages` array.
fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<AnthropicMessage>) {
    let mut system = None;
    let mut turns = Vec::new();
    for m in messages {
        if m.role == "system" {
            system = Some(m.content.clone());
        } else {
            turns.push(AnthropicMessage { role: m.role.clone(), content: m.content.clone() });
        }
    }
    (system, turns)
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: usize,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: String,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum StreamEvent {
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: DeltaText },
    #[serde(rename = "message_stop")]
    MessageStop,
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct DeltaText {
    text: String,
}

#[async_trait]
impl ChatProviderTrait for AnthropicClient {
    async fn complete(&self, messages: &[ChatMessage], options: &CompletionOptions) -> Result<String> {
        let (system, turns) = split_system(messages);
        let resp = self
            .request("/messages")
            .json(&MessagesRequest {
                model: self.model.clone(),
                messages: turns,
                system,
                max_tokens: options.max_output_tokens,
                temperature: options.temperature,
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

        let parsed: MessagesResponse = resp.json().await.map_err(|e| MimirError::Transport(e.to_string()))?;
        Ok(parsed.content.into_iter().map(|b| b.text).collect::<Vec<_>>().join(""))
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<BoxStream<'static, Result<CompletionDelta>>> {
        let (system, turns) = split_system(messages);
        let resp = self
            .request("/messages")
            .json(&MessagesRequest {
                model: self.model.clone(),
                messages: turns,
                system,
                max_tokens: options.max_output_tokens,
                temperature: options.temperature,
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

        let event_stream = sse_lines(resp.bytes_stream()).filter_map(|line| async move {
            let line = line.ok()?;
            let payload = line.strip_prefix("data: ")?;
            match serde_json::from_str::<StreamEvent>(payload).ok()? {
                StreamEvent::ContentBlockDelta { delta } => {
                    Some(Ok(CompletionDelta { content: delta.text, done: false }))
                }
                StreamEvent::MessageStop => Some(Ok(CompletionDelta { content: String::new(), done: true })),
                StreamEvent::Other => None,
            }
        });

        Ok(Box::pin(event_stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_message_is_split_out() {
        let messages = vec![
            ChatMessage { role: "system".into(), content: "be terse".into() },
            ChatMessage { role: "user".into(), content: "hi".into() },
        ];
        let (system, turns) = split_system(&messages);
        assert_eq!(system.as_deref(), Some("be terse"));
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, "user");
    }
}
