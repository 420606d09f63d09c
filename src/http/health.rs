use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use super::AppState;

/// `GET /health`, unauthenticated. Reports whether an ingestion run is
/// currently in flight so operators can tell a 409 from `/ingest` apart
/// from an actual failure.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "ingestionBusy": state.ingestion_busy.load(Ordering::SeqCst),
    }))
}
