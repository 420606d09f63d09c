use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::AppState;

/// `POST /ingest`. Runs synchronously; a concurrent call gets `409` rather
/// than queueing, since a second full reconciliation pass against the same
/// desired state would just redo the first one's work (§5 concurrency model).
pub async fn ingest(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    if state.ingestion_busy.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "status": "error", "message": "ingestion already in progress" })),
        );
    }

    let cancel = CancellationToken::new();
    let result = state.pipeline.run(&state.config, &cancel).await;
    state.ingestion_busy.store(false, Ordering::SeqCst);

    match result {
        Ok(outcome) => {
            info!(duration_ms = outcome.duration_ms, files = outcome.files_fetched, "manual ingestion complete");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "trigger": "manual",
                    "durationMs": outcome.duration_ms,
                    "filesFetched": outcome.files_fetched,
                    "stats": {
                        "unchanged": outcome.stats.unchanged_chunks,
                        "moved": outcome.stats.moved_chunks,
                        "new": outcome.stats.new_chunks,
                        "upserted": outcome.stats.upserted_chunks,
                        "deleted": outcome.stats.deleted_chunks,
                    },
                })),
            )
        }
        Err(e) => {
            error!(error = %e, "manual ingestion failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "status": "error", "message": e.to_string() })))
        }
    }
}
