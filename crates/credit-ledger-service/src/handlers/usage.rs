//! Per-turn usage charging handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use credit_ledger_core::{AccountId, ChargeKey, ChargeKind, ChargeStatus, TurnId};

use crate::auth::ServiceAuth;
use crate::billing::usage;
use crate::error::ApiError;
use crate::state::AppState;

/// Charge request from the chat-turn flow.
#[derive(Debug, Deserialize)]
pub struct ChargeRequest {
    /// Account being charged (`user_<uuid>` or `anon_<uuid>`).
    pub account_id: String,
    /// Turn being billed.
    pub turn_id: String,
    /// Checkpoint within the turn.
    pub kind: ChargeKind,
    /// Credits to deduct; defaults to the configured cost of `kind`.
    #[serde(default)]
    pub amount: Option<u64>,
}

/// Charge response.
#[derive(Debug, Serialize)]
pub struct ChargeResponse {
    /// Whether credits were deducted by this call.
    pub charged: bool,
    /// Outcome detail.
    pub status: ChargeStatus,
    /// Balance after the call.
    pub balance_after: u64,
    /// Credits the checkpoint costs.
    pub amount: u64,
    /// Suggested next step for the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<&'static str>,
}

/// Charge one checkpoint of a turn.
///
/// Retries of the same checkpoint are reported as duplicates and never
/// charge twice. An insufficient balance is a `200` with
/// `status = insufficient_credits`.
pub async fn charge(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<ChargeRequest>,
) -> Result<Json<ChargeResponse>, ApiError> {
    let account_id = parse_account_id(&body.account_id)?;
    let turn_id = TurnId::new(body.turn_id)
        .map_err(|_| ApiError::BadRequest("Invalid turn ID".into()))?;
    let amount = body
        .amount
        .unwrap_or_else(|| state.config.usage_pricing.cost(body.kind));

    tracing::debug!(
        service = %auth.service_name,
        account_id = %account_id,
        turn_id = %turn_id,
        kind = body.kind.as_str(),
        amount,
        "Processing usage charge"
    );

    let key = ChargeKey::new(account_id, turn_id, body.kind);
    let outcome = usage::charge(state.store.as_ref(), &key, amount)?;

    let action = (outcome.status == ChargeStatus::InsufficientCredits).then_some("purchase_credits");

    Ok(Json(ChargeResponse {
        charged: outcome.charged,
        status: outcome.status,
        balance_after: outcome.balance_after,
        amount,
        action,
    }))
}

/// Affordability check request.
#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    /// Account to check.
    pub account_id: String,
    /// Credits required.
    #[serde(default)]
    pub amount: Option<u64>,
    /// Checkpoint whose configured cost is required, when `amount` is absent.
    #[serde(default)]
    pub kind: Option<ChargeKind>,
}

/// Affordability check response.
#[derive(Debug, Serialize)]
pub struct CheckResponse {
    /// Whether the balance covers the requirement.
    pub allowed: bool,
    /// Credits required.
    pub required: u64,
}

/// Check whether an account can afford a charge, without changing it.
pub async fn check(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Json(body): Json<CheckRequest>,
) -> Result<Json<CheckResponse>, ApiError> {
    let account_id = parse_account_id(&body.account_id)?;

    let required = match (body.amount, body.kind) {
        (Some(amount), _) => amount,
        (None, Some(kind)) => state.config.usage_pricing.cost(kind),
        (None, None) => {
            return Err(ApiError::BadRequest("Either amount or kind is required".into()));
        }
    };

    let allowed = usage::can_afford(state.store.as_ref(), &account_id, required)?;

    Ok(Json(CheckResponse { allowed, required }))
}

fn parse_account_id(raw: &str) -> Result<AccountId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest("Invalid account ID".into()))
}
