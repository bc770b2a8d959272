//! Credit balance and ledger history handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use credit_ledger_core::{CreditGrant, Plan, UsageChargeEntry};

use super::accounts::load_account;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Maximum page size for history listings.
const MAX_PAGE_SIZE: usize = 100;

/// Balance response.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    /// Spendable credits.
    pub credit_balance: u64,
    /// Current plan.
    pub plan: Plan,
    /// Monthly allotment of the current plan.
    pub monthly_allotment: u64,
    /// Plan that applies at the next renewal.
    pub pending_downgrade_plan: Option<Plan>,
}

/// Get current credit balance.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<BalanceResponse>, ApiError> {
    let account = load_account(&state, &auth.account_id)?;

    Ok(Json(BalanceResponse {
        credit_balance: account.credit_balance,
        plan: account.plan,
        monthly_allotment: state.config.plans.monthly_allotment(account.plan),
        pending_downgrade_plan: account.pending_downgrade_plan,
    }))
}

/// History list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Maximum number of records to return (default: 50).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

/// Grant response.
#[derive(Debug, Serialize)]
pub struct GrantResponse {
    /// Record ID.
    pub id: String,
    /// Grant type.
    pub grant_type: String,
    /// Credits added.
    pub amount: u64,
    /// Balance after this grant.
    pub balance_after: u64,
    /// Plan the grant was for.
    pub plan: Option<Plan>,
    /// Billing period of a monthly grant.
    pub period_key: Option<String>,
    /// Timestamp.
    pub created_at: String,
}

impl From<&CreditGrant> for GrantResponse {
    fn from(grant: &CreditGrant) -> Self {
        Self {
            id: grant.id.to_string(),
            grant_type: grant.grant_type.as_str().to_string(),
            amount: grant.amount,
            balance_after: grant.balance_after,
            plan: grant.plan,
            period_key: grant.period_key.clone(),
            created_at: grant.created_at.to_rfc3339(),
        }
    }
}

/// List grants response.
#[derive(Debug, Serialize)]
pub struct ListGrantsResponse {
    /// Grants (newest first).
    pub grants: Vec<GrantResponse>,
    /// Whether there are more grants.
    pub has_more: bool,
}

/// List credit grants.
pub async fn list_grants(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListGrantsResponse>, ApiError> {
    load_account(&state, &auth.account_id)?;

    // Fetch one more than requested to determine has_more
    let limit = query.limit.min(MAX_PAGE_SIZE);
    let grants = state
        .store
        .list_grants(&auth.account_id, limit + 1, query.offset)?;

    let has_more = grants.len() > limit;
    Ok(Json(ListGrantsResponse {
        grants: grants.iter().take(limit).map(GrantResponse::from).collect(),
        has_more,
    }))
}

/// Usage charge response.
#[derive(Debug, Serialize)]
pub struct ChargeResponse {
    /// Record ID.
    pub id: String,
    /// Turn that was billed.
    pub turn_id: String,
    /// Checkpoint.
    pub charge_kind: String,
    /// Credits deducted.
    pub amount: u64,
    /// Balance after this charge.
    pub balance_after: u64,
    /// Timestamp.
    pub created_at: String,
}

impl From<&UsageChargeEntry> for ChargeResponse {
    fn from(entry: &UsageChargeEntry) -> Self {
        Self {
            id: entry.id.to_string(),
            turn_id: entry.turn_id.to_string(),
            charge_kind: entry.charge_kind.as_str().to_string(),
            amount: entry.amount,
            balance_after: entry.balance_after,
            created_at: entry.created_at.to_rfc3339(),
        }
    }
}

/// List charges response.
#[derive(Debug, Serialize)]
pub struct ListChargesResponse {
    /// Charges (newest first).
    pub charges: Vec<ChargeResponse>,
    /// Whether there are more charges.
    pub has_more: bool,
}

/// List usage charges.
pub async fn list_charges(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListChargesResponse>, ApiError> {
    load_account(&state, &auth.account_id)?;

    let limit = query.limit.min(MAX_PAGE_SIZE);
    let charges = state
        .store
        .list_usage_entries(&auth.account_id, limit + 1, query.offset)?;

    let has_more = charges.len() > limit;
    Ok(Json(ListChargesResponse {
        charges: charges.iter().take(limit).map(ChargeResponse::from).collect(),
        has_more,
    }))
}
