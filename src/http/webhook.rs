use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Verifies `x-hub-signature-256: sha256=<hex>` over the raw request body.
/// Compares the computed MAC in constant time to avoid a timing oracle.
fn verify_signature(secret: &str, body: &[u8], header_value: &str) -> bool {
    let Some(hex_sig) = header_value.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let expected = mac.finalize().into_bytes();
    expected.as_slice().ct_eq(&sig_bytes).into()
}

/// `POST /webhook/github`. `ping` events are acknowledged inline; anything
/// else triggers ingestion on a detached task and returns `202` immediately
/// so GitHub's webhook delivery doesn't time out waiting on a full run.
pub async fn webhook(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> (StatusCode, Json<Value>) {
    let Some(secret) = state.config.server.github_webhook_secret.clone() else {
        return (
            StatusCode::NOT_IMPLEMENTED,
            Json(json!({ "status": "error", "message": "github webhook secret not configured" })),
        );
    };

    let Some(signature) = headers.get("x-hub-signature-256").and_then(|v| v.to_str().ok()) else {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "status": "error", "message": "missing x-hub-signature-256" })));
    };

    if !verify_signature(&secret, &body, signature) {
        warn!("github webhook signature verification failed");
        return (StatusCode::UNAUTHORIZED, Json(json!({ "status": "error", "message": "invalid signature" })));
    }

    let event = headers.get("x-github-event").and_then(|v| v.to_str().ok()).unwrap_or("").to_string();
    if event == "ping" {
        return (StatusCode::OK, Json(json!({ "status": "ok", "message": "pong" })));
    }

    if state.ingestion_busy.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
        return (StatusCode::ACCEPTED, Json(json!({ "status": "pending", "message": "ingestion already running" })));
    }

    let spawned_state = Arc::clone(&state);
    tokio::spawn(async move {
        let cancel = CancellationToken::new();
        let result = spawned_state.pipeline.run(&spawned_state.config, &cancel).await;
        spawned_state.ingestion_busy.store(false, Ordering::SeqCst);
        match result {
            Ok(outcome) => info!(duration_ms = outcome.duration_ms, "webhook-triggered ingestion complete"),
            Err(e) => error!(error = %e, "webhook-triggered ingestion failed"),
        }
    });

    (StatusCode::ACCEPTED, Json(json!({ "status": "accepted", "event": event })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifies_a_correctly_signed_body() {
        let secret = "topsecret";
        let body = b"hello world";
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let sig = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));
        assert!(verify_signature(secret, body, &sig));
    }

    #[test]
    fn rejects_a_tampered_body() {
        let secret = "topsecret";
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(b"hello world");
        let sig = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));
        assert!(!verify_signature(secret, b"hello world!", &sig));
    }

    #[test]
    fn rejects_malformed_header() {
        assert!(!verify_signature("secret", b"body", "not-a-signature"));
    }
}
