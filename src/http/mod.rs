//! HTTP surface (§6): axum router + middleware, the same shape as
//! other_examples/ffd27f92_scbrown-bobbin__src-http-handlers.rs's
//! `router(state)` + `AppState` + `ErrorBody` pattern, generalized to the
//! five routes this crate exposes and to a shared API-key gate.

mod chat_completions;
mod health;
mod ingest;
mod mcp;
mod webhook;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::answer::AnswerComposer;
use crate::config::Config;
use crate::pipeline::Pipeline;
use crate::retriever::Retriever;
use crate::vector_store::VectorStore;

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn VectorStore>,
    pub retriever: Retriever,
    pub answer_composer: AnswerComposer,
    pub pipeline: Pipeline,
    pub ingestion_busy: Arc<AtomicBool>,
}

/// Routes left unauthenticated per §6: the health check and the public MCP
/// retrieval endpoint.
fn is_public_route(path: &str) -> bool {
    path == "/health" || path.starts_with("/mcp/")
}

async fn require_api_key(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    if is_public_route(req.uri().path()) {
        return next.run(req).await;
    }

    let provided = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| {
            req.headers()
                .get(axum::http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::to_string)
        });

    match provided {
        Some(key) if key == state.config.server.api_key => next.run(req).await,
        _ => (StatusCode::UNAUTHORIZED, Json(json!({ "status": "error", "message": "unauthorized" }))).into_response(),
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/ingest", post(ingest::ingest))
        .route("/webhook/github", post(webhook::webhook))
        .route("/v1/chat/completions", post(chat_completions::chat_completions))
        .route("/mcp/ask", post(mcp::ask))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
