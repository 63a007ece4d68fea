//! Stripe webhook intake

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};

use crate::state::AppState;

/// Verified event intake. Bad signatures get 400; processing failures get
/// 500 so the processor redelivers; duplicates are acknowledged with 200.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>, StatusCode> {
    let signature = headers
        .get("Stripe-Signature")
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::BAD_REQUEST)?;

    let event = state
        .commerce
        .webhooks
        .verify_event(&body, signature)
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    state
        .commerce
        .webhooks
        .handle_event(event)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Webhook processing failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(json!({ "received": true })))
}
