//! `POST /v1/chat/completions`, OpenAI-compatible request/response shapes so
//! existing chat clients (the VS Code / Cursor / `openai` SDK family) can
//! point straight at this server. The last `user` message is the query; a
//! `system` message, if present, is accepted but the retrieval prompt always
//! wins since answers are grounded in retrieved context, not free chat.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::{self, StreamExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::answer::DeltaTracker;
use crate::error::MimirError;

use super::AppState;

#[derive(Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<IncomingMessage>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Deserialize)]
pub struct IncomingMessage {
    pub role: String,
    pub content: String,
}

#[derive(Serialize)]
struct OutgoingMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ChatCompletionChoice {
    index: u32,
    message: OutgoingMessage,
    finish_reason: &'static str,
}

#[derive(Serialize)]
struct ChatCompletionResponse {
    id: String,
    object: &'static str,
    created: u64,
    model: String,
    choices: Vec<ChatCompletionChoice>,
    sources: Vec<SourceView>,
}

#[derive(Serialize)]
struct SourceView {
    filepath: String,
    #[serde(rename = "chunkTitle")]
    chunk_title: String,
    #[serde(rename = "finalUrl")]
    final_url: Option<String>,
}

fn completion_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..24).map(|_| rng.sample(rand::distributions::Alphanumeric) as char).collect();
    format!("chatcmpl-{suffix}")
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn last_user_message(messages: &[IncomingMessage]) -> String {
    messages.iter().rev().find(|m| m.role == "user").map(|m| m.content.clone()).unwrap_or_default()
}

pub async fn chat_completions(State(state): State<Arc<AppState>>, Json(req): Json<ChatCompletionRequest>) -> Response {
    let question = last_user_message(&req.messages);
    if question.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "status": "error", "message": "no user message found" })),
        )
            .into_response();
    }

    let cancel = CancellationToken::new();
    let model = req.model.clone().unwrap_or_else(|| state.config.chat.model.clone());

    let chunks = match state.retriever.retrieve(&question, &state.config.supabase, &cancel).await {
        Ok(c) => c,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "status": "error", "message": e.to_string() }))).into_response(),
    };

    if req.stream {
        stream_response(state, question, chunks, model, cancel).await
    } else {
        single_response(state, question, chunks, model, cancel).await
    }
}

async fn single_response(
    state: Arc<AppState>,
    question: String,
    chunks: Vec<crate::retriever::RetrievedChunk>,
    model: String,
    cancel: CancellationToken,
) -> Response {
    match state.answer_composer.compose(&question, &chunks, &[], &cancel).await {
        Ok(answer) => {
            let response = ChatCompletionResponse {
                id: completion_id(),
                object: "chat.completion",
                created: unix_now(),
                model,
                choices: vec![ChatCompletionChoice {
                    index: 0,
                    message: OutgoingMessage { role: "assistant", content: answer.answer },
                    finish_reason: "stop",
                }],
                sources: answer
                    .sources
                    .into_iter()
                    .map(|s| SourceView { filepath: s.filepath, chunk_title: s.chunk_title, final_url: s.final_url })
                    .collect(),
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "status": "error", "message": e.to_string() }))).into_response(),
    }
}

async fn stream_response(
    state: Arc<AppState>,
    question: String,
    chunks: Vec<crate::retriever::RetrievedChunk>,
    model: String,
    cancel: CancellationToken,
) -> Response {
    let delta_stream = match state.answer_composer.compose_stream(&question, &chunks, &cancel).await {
        Ok(s) => s,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "status": "error", "message": e.to_string() }))).into_response(),
    };

    let id = completion_id();
    let created = unix_now();

    let chunk_events = delta_stream.scan(DeltaTracker::new(), move |tracker, item| {
        let id = id.clone();
        let model = model.clone();
        let event = item.map(|delta| {
            let incremental = tracker.delta(&delta.content);
            let finish_reason = if delta.done { Some("stop") } else { None };
            let payload = json!({
                "id": id,
                "object": "chat.completion.chunk",
                "created": created,
                "model": model,
                "choices": [{
                    "index": 0,
                    "delta": { "content": incremental },
                    "finish_reason": finish_reason,
                }],
            });
            Event::default().data(payload.to_string())
        });
        futures::future::ready(Some(event))
    });

    let done_event = stream::once(futures::future::ready(Ok::<Event, MimirError>(Event::default().data("[DONE]"))));
    let full_stream = chunk_events.chain(done_event);

    Sse::new(full_stream).into_response()
}
