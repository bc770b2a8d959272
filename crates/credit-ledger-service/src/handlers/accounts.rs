//! Account management handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use credit_ledger_core::{Account, AccountId, GrantRequest, GrantType, Plan, SessionId};

use crate::auth::{AuthUser, ServiceAuth};
use crate::billing::grants::apply_grant;
use crate::error::ApiError;
use crate::state::AppState;

/// Account response.
#[derive(Debug, Serialize)]
pub struct AccountResponse {
    /// Account ID (`user_<uuid>` or `anon_<uuid>`).
    pub account_id: String,
    /// Current plan.
    pub plan: Plan,
    /// Spendable credits.
    pub credit_balance: u64,
    /// Plan that applies at the next renewal.
    pub pending_downgrade_plan: Option<Plan>,
    /// Provider subscription status.
    pub subscription_status: Option<String>,
    /// End of the current billing period.
    pub current_period_end: Option<String>,
    /// Lifetime credits granted.
    pub lifetime_granted: u64,
    /// Lifetime credits used.
    pub lifetime_used: u64,
    /// Created timestamp.
    pub created_at: String,
}

impl From<&Account> for AccountResponse {
    fn from(account: &Account) -> Self {
        Self {
            account_id: account.id.to_string(),
            plan: account.plan,
            credit_balance: account.credit_balance,
            pending_downgrade_plan: account.pending_downgrade_plan,
            subscription_status: account
                .subscription_status
                .map(|s| s.as_str().to_string()),
            current_period_end: account.current_period_end.map(|t| t.to_rfc3339()),
            lifetime_granted: account.lifetime_granted,
            lifetime_used: account.lifetime_used,
            created_at: account.created_at.to_rfc3339(),
        }
    }
}

/// Create or register the caller's account.
///
/// Returns `201` when the account was created and `200` when it already
/// existed.
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<(StatusCode, Json<AccountResponse>), ApiError> {
    let created = state.store.insert_account(&Account::new(auth.account_id))?;
    let account = load_account(&state, &auth.account_id)?;

    let status = if created {
        tracing::info!(account_id = %auth.account_id, "Account created");
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((status, Json(AccountResponse::from(&account))))
}

/// Get the current user's account.
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = load_account(&state, &auth.account_id)?;
    Ok(Json(AccountResponse::from(&account)))
}

/// Anonymous session account request.
#[derive(Debug, Default, Deserialize)]
pub struct CreateAnonymousRequest {
    /// Existing session id; a new one is generated when absent.
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Create an account for an anonymous chat session, seeded with trial
/// credits. Repeating the call for the same session seeds it once.
pub async fn create_anonymous_account(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<CreateAnonymousRequest>,
) -> Result<(StatusCode, Json<AccountResponse>), ApiError> {
    let session_id = match body.session_id.as_deref() {
        Some(raw) => raw
            .parse::<SessionId>()
            .map_err(|_| ApiError::BadRequest("Invalid session ID".into()))?,
        None => SessionId::generate(),
    };
    let account_id = AccountId::Anonymous(session_id);

    let created = state.store.insert_account(&Account::new(account_id))?;

    let trial = state.config.anonymous_trial_credits;
    if trial > 0 {
        apply_grant(
            state.store.as_ref(),
            &GrantRequest::new(
                account_id,
                GrantType::Topup,
                format!("trial:{session_id}"),
                trial,
            ),
        )?;
    }

    let account = load_account(&state, &account_id)?;
    let status = if created {
        tracing::info!(
            service = %auth.service_name,
            account_id = %account_id,
            trial_credits = trial,
            "Anonymous account created"
        );
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((status, Json(AccountResponse::from(&account))))
}

/// Fetch an account or return 404.
pub(crate) fn load_account(state: &AppState, account_id: &AccountId) -> Result<Account, ApiError> {
    state
        .store
        .get_account(account_id)?
        .ok_or_else(|| ApiError::NotFound("Account not found".into()))
}
