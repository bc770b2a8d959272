//! Stripe webhook handler.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was accepted.
    pub received: bool,
    /// Provider event id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// Classified event category.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<&'static str>,
    /// What the ledger did with it.
    pub action: &'static str,
}

/// Handle Stripe webhooks.
///
/// The raw body is verified against the `Stripe-Signature` header before
/// anything is parsed. Redeliveries, unknown event types, and events for
/// unknown accounts all return `200` so the provider stops retrying.
pub async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok());

    let outcome = state.processor.process(&body, signature)?;

    Ok(Json(WebhookResponse {
        received: true,
        event_id: outcome.event_id,
        event_type: outcome.event_type,
        action: outcome.action.name(),
    }))
}
