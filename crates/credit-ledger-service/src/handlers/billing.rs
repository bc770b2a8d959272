//! Checkout and billing portal handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use credit_ledger_core::{Account, Plan};

use super::accounts::load_account;
use crate::auth::AuthUser;
use crate::billing::atomically;
use crate::billing::processor::link_customer;
use crate::error::ApiError;
use crate::state::AppState;
use crate::stripe::{CheckoutItem, StripeClient};

/// Upper bound on top-up units in a single checkout.
const MAX_TOPUP_QUANTITY: u64 = 100;

/// Checkout request. Name a `plan` to subscribe, or omit it to buy
/// `quantity` units of credits.
#[derive(Debug, Default, Deserialize)]
pub struct CheckoutRequest {
    /// Plan to subscribe to.
    #[serde(default)]
    pub plan: Option<Plan>,
    /// Top-up units (default: 1).
    #[serde(default)]
    pub quantity: Option<u64>,
}

/// Checkout response.
#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    /// Session ID for tracking.
    pub session_id: String,
    /// Stripe checkout session URL.
    pub checkout_url: String,
}

/// Start a Stripe Checkout session for a plan or a credit top-up.
///
/// Credits are not granted here; they arrive with the provider webhook.
pub async fn create_checkout(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let stripe = state.stripe()?;
    let account = load_account(&state, &auth.account_id)?;
    let catalog = &state.config.plans;

    let item = match body.plan {
        Some(Plan::None) => {
            return Err(ApiError::BadRequest("Cannot check out the free plan".into()));
        }
        Some(plan) => {
            if account.plan.is_paid() {
                return Err(ApiError::Conflict(
                    "Account already has a subscription, use the billing portal to change plans"
                        .into(),
                ));
            }
            let price_id = catalog.price_for_plan(plan).ok_or_else(|| {
                ApiError::ServiceUnavailable(format!("No price configured for plan {plan}"))
            })?;
            CheckoutItem::Subscription {
                price_id,
                plan: plan.as_str(),
            }
        }
        None => {
            let quantity = body.quantity.unwrap_or(1);
            if quantity == 0 || quantity > MAX_TOPUP_QUANTITY {
                return Err(ApiError::BadRequest(format!(
                    "Quantity must be between 1 and {MAX_TOPUP_QUANTITY}"
                )));
            }
            let price_id = catalog.topup_price_id().ok_or_else(|| {
                ApiError::ServiceUnavailable("No top-up price configured".into())
            })?;
            CheckoutItem::Topup {
                price_id,
                quantity,
                credits: catalog.topup_credits(quantity),
            }
        }
    };

    let customer_id = ensure_customer(&state, stripe, &account, auth.email.as_deref()).await?;

    let success_url = format!(
        "{}/billing/success?session_id={{CHECKOUT_SESSION_ID}}",
        state.config.frontend_url
    );
    let cancel_url = format!("{}/billing/cancel", state.config.frontend_url);

    let session = stripe
        .create_checkout_session(
            &auth.account_id,
            Some(&customer_id),
            &item,
            &success_url,
            &cancel_url,
        )
        .await?;

    let checkout_url = session
        .url
        .ok_or_else(|| ApiError::ExternalService("Stripe returned no checkout URL".into()))?;

    tracing::info!(
        account_id = %auth.account_id,
        session_id = %session.id,
        item = ?item,
        "Stripe checkout session created"
    );

    Ok(Json(CheckoutResponse {
        session_id: session.id,
        checkout_url,
    }))
}

/// Portal response.
#[derive(Debug, Serialize)]
pub struct PortalResponse {
    /// Billing portal URL.
    pub portal_url: String,
}

/// Open the Stripe billing portal for plan changes and cancellation.
pub async fn create_portal(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<PortalResponse>, ApiError> {
    let stripe = state.stripe()?;
    let account = load_account(&state, &auth.account_id)?;

    let customer_id = account
        .stripe_customer_id
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("Account has no billing history".into()))?;

    let return_url = format!("{}/billing", state.config.frontend_url);
    let session = stripe.create_portal_session(customer_id, &return_url).await?;

    Ok(Json(PortalResponse {
        portal_url: session.url,
    }))
}

/// Return the account's Stripe customer, creating and linking one on first
/// checkout.
async fn ensure_customer(
    state: &AppState,
    stripe: &StripeClient,
    account: &Account,
    email: Option<&str>,
) -> Result<String, ApiError> {
    if let Some(existing) = &account.stripe_customer_id {
        return Ok(existing.clone());
    }

    let customer = stripe.create_customer(&account.id, email).await?;
    tracing::info!(
        account_id = %account.id,
        customer_id = %customer.id,
        "Stripe customer created"
    );

    // A concurrent checkout may have linked a customer first; keep theirs.
    let linked = atomically(state.store.as_ref(), &account.id, |txn| {
        link_customer(txn, Some(&customer.id));
        Ok(txn.account().stripe_customer_id.clone())
    })?;

    Ok(linked.unwrap_or(customer.id))
}
