//! Error taxonomy matching the propagation policy described for the pipeline:
//! configuration errors are fatal at startup, transport errors are retried by
//! the scheduler, non-retryable provider errors abort the current stage, and
//! so on. `retryable()` is the single predicate the rate-limited runtime
//! consults before deciding whether to back off and try again.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum MimirError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider error ({status}): {message}")]
    Provider { status: u16, message: String },

    #[error("failed to parse/chunk {path}: {reason}")]
    Chunk { path: String, reason: String },

    #[error("store error: {0}")]
    Store(String),

    #[error("cancelled")]
    Cancelled,

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MimirError {
    /// Whether the scheduler should retry a call that failed with this error.
    /// Transport errors (network blips, 5xx, 429) are retryable; everything
    /// that indicates the request itself was wrong, or that the run was
    /// cancelled, is not.
    pub fn retryable(&self) -> bool {
        match self {
            MimirError::Transport(_) => true,
            MimirError::Provider { status, .. } => {
                *status == 429 || (*status >= 500 && *status < 600)
            }
            MimirError::Cancelled
            | MimirError::Config(_)
            | MimirError::BadRequest(_)
            | MimirError::Unauthorized
            | MimirError::NotFound(_)
            | MimirError::Invariant(_)
            | MimirError::Chunk { .. }
            | MimirError::Store(_) => false,
            MimirError::Other(_) => false,
        }
    }
}

impl IntoResponse for MimirError {
    fn into_response(self) -> Response {
        let status = match &self {
            MimirError::BadRequest(_) => StatusCode::BAD_REQUEST,
            MimirError::Unauthorized => StatusCode::UNAUTHORIZED,
            MimirError::NotFound(_) => StatusCode::NOT_FOUND,
            MimirError::Provider { status, .. } if (400..500).contains(status) => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST)
            }
            MimirError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({ "status": "error", "message": self.to_string() }));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, MimirError>;
