//! WhatsApp webhook endpoints: subscription handshake and event delivery

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{info, warn};

use super::{error_response, AppState};
use crate::services::webhook::parse_envelope;
use crate::types::ErrorResponse;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// HMAC-SHA256 of the raw body, hex encoded with an optional `sha256=` prefix.
///
/// Always checks the signature. Whether an unset secret skips verification is
/// decided by `receive`, which only calls this when `WHATSAPP_APP_SECRET` is set.
pub fn verify_signature(app_secret: &str, signature_header: Option<&str>, body: &[u8]) -> bool {
    let signature = signature_header.unwrap_or("").trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature).trim();
    if signature.is_empty() {
        return false;
    }
    let Ok(signature_bytes) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature_bytes).is_ok()
}

/// Handshake outcome: the challenge to echo, or a reason code
pub fn verify_subscription(
    mode: Option<&str>,
    token: Option<&str>,
    challenge: Option<&str>,
    expected_token: Option<&str>,
) -> Result<String, &'static str> {
    let mode = mode.filter(|m| !m.is_empty()).ok_or("missing_mode")?;
    if mode != "subscribe" {
        return Err("invalid_mode");
    }
    let token = token.filter(|t| !t.is_empty()).ok_or("missing_verify_token_query")?;
    let expected = expected_token.ok_or("missing_verify_token_env")?;
    if token != expected {
        return Err("verify_token_mismatch");
    }
    Ok(challenge.unwrap_or_default().to_string())
}

/// GET /webhook
pub async fn verify(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    match verify_subscription(
        params.get("hub.mode").map(String::as_str),
        params.get("hub.verify_token").map(String::as_str),
        params.get("hub.challenge").map(String::as_str),
        state.webhook_verify_token.as_deref(),
    ) {
        Ok(challenge) => {
            info!("Webhook subscription verified");
            (StatusCode::OK, challenge).into_response()
        }
        Err(reason) => {
            warn!(reason = reason, "Webhook verification failed");
            error_response(
                StatusCode::FORBIDDEN,
                ErrorResponse::with_reason("Webhook verification failed", reason),
            )
        }
    }
}

/// POST /webhook
pub async fn receive(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match state.app_secret.as_deref() {
        Some(secret) => {
            let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
            if !verify_signature(secret, signature, &body) {
                warn!("Webhook rejected: invalid signature");
                return error_response(StatusCode::UNAUTHORIZED, ErrorResponse::new("Invalid signature"));
            }
        }
        None => warn!("Accepting unsigned webhook delivery (WHATSAPP_APP_SECRET not set)"),
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!("Webhook rejected: invalid JSON: {}", e);
            return error_response(StatusCode::BAD_REQUEST, ErrorResponse::new("Invalid JSON payload"));
        }
    };

    let received_at = Utc::now();
    let envelope = parse_envelope(payload, received_at);
    info!(
        provider = %envelope.provider,
        object = %envelope.object,
        entries = envelope.entry_count,
        "Webhook received"
    );

    let summary = state.webhook.process(&envelope.payload, received_at).await;
    (StatusCode::OK, Json(json!({ "received": true, "summary": summary }))).into_response()
}
