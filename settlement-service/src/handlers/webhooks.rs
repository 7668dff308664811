//! Gateway webhook receiver.
//!
//! Always answers with a short text body. The provider retries on anything
//! but 2xx, so failures here must never leak as a panic or JSON error.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};

use crate::{
    services::gateway::{verify_webhook_signature, SIGNATURE_HEADER},
    AppState,
};

pub async fn gateway_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    if let Some(secret) = &state.webhook_secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());
        if !verify_webhook_signature(secret, &body, signature) {
            tracing::warn!(has_signature = signature.is_some(), "Invalid webhook signature");
            return (StatusCode::UNAUTHORIZED, "Invalid signature");
        }
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "Unparseable webhook payload");
            return (StatusCode::BAD_REQUEST, "Invalid payload");
        }
    };

    match state.reconciler.handle(&payload).await {
        Ok(outcome) => (StatusCode::OK, outcome.acknowledgement()),
        Err(e) => (e.status_code(), e.message()),
    }
}
