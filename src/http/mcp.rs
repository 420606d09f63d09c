//! `POST /mcp/ask`: pure retrieval, no answer generation, no auth (§6 lists
//! this as the public MCP route alongside `/health`). Lets MCP-speaking
//! clients pull raw context chunks themselves instead of consuming a
//! generated answer.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::AppState;

#[derive(Deserialize)]
pub struct AskRequest {
    pub query: String,
}

#[derive(Serialize)]
struct MatchView {
    #[serde(rename = "chunkTitle")]
    chunk_title: String,
    #[serde(rename = "chunkContent")]
    chunk_content: String,
    similarity: Option<f32>,
    #[serde(rename = "githubUrl")]
    github_url: Option<String>,
    #[serde(rename = "docsUrl")]
    docs_url: Option<String>,
}

pub async fn ask(State(state): State<Arc<AppState>>, Json(req): Json<AskRequest>) -> axum::response::Response {
    use axum::response::IntoResponse;

    if req.query.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, Json(json!({ "status": "error", "message": "query must not be empty" }))).into_response();
    }

    let cancel = CancellationToken::new();
    match state.retriever.retrieve(&req.query, &state.config.supabase, &cancel).await {
        Ok(chunks) => {
            let matches: Vec<MatchView> = chunks
                .iter()
                .map(|c| MatchView {
                    chunk_title: c.chunk_title.clone(),
                    chunk_content: c.content.clone(),
                    similarity: c.similarity,
                    github_url: c.github_url.clone(),
                    docs_url: c.docs_url.clone(),
                })
                .collect();
            (StatusCode::OK, Json(json!({ "status": "ok", "count": matches.len(), "matches": matches }))).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "status": "error", "message": e.to_string() }))).into_response(),
    }
}
