//! Webhook event processor.
//!
//! Entry point for provider notifications: verifies the signature over the
//! raw body, classifies the payload, resolves the target account, and
//! routes the event to the grant ledger or the plan state machine inside one
//! account transaction.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use credit_ledger_core::{
    AccountId, BillingError, BillingEvent, CheckoutCompleted, CheckoutMode, EventEnvelope,
    GrantOutcome, GrantRequest, GrantType, InvoiceBillingReason, InvoiceSnapshot, PlanCatalog,
    SubscriptionSnapshot, SubscriptionStatus,
};
use credit_ledger_store::{AccountTxn, Store};

use super::atomically;
use super::grants::apply_grant_in;
use super::plans::{PlanStart, PlanStateMachine, TransitionOutcome};
use crate::crypto::{verify_stripe_signature, SignatureError};
use crate::stripe::parse_event;

/// Why a webhook delivery was rejected.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// Signature missing, malformed, stale, or wrong. Nothing was applied.
    #[error("invalid signature: {0}")]
    SignatureInvalid(#[from] SignatureError),

    /// No webhook secret configured, so nothing can be verified.
    #[error("webhook secret not configured")]
    NotConfigured,

    /// Verified payload that could not be parsed.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Applying the event failed and was rolled back.
    #[error(transparent)]
    Billing(#[from] BillingError),
}

/// What processing an event did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum WebhookAction {
    /// Event type or shape the ledger does not act on.
    Ignored,
    /// No account matches the event; dropped without retry.
    AccountUnresolved,
    /// Checkout finished but payment has not been collected yet.
    AwaitingPayment,
    /// One-time credit purchase.
    Topup {
        /// Grant result.
        grant: GrantOutcome,
    },
    /// Plan state machine transition.
    Plan {
        /// Transition result.
        transition: TransitionOutcome,
    },
}

impl WebhookAction {
    /// Short name for logs and responses.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Ignored => "ignored",
            Self::AccountUnresolved => "account_unresolved",
            Self::AwaitingPayment => "awaiting_payment",
            Self::Topup { grant } if grant.granted => "topup_granted",
            Self::Topup { .. } => "topup_duplicate",
            Self::Plan { transition } => transition.name(),
        }
    }
}

/// Result of one webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookOutcome {
    /// Provider event id, when the payload parsed.
    pub event_id: Option<String>,
    /// Classified event category.
    pub event_type: Option<&'static str>,
    /// Resolved account.
    pub account_id: Option<AccountId>,
    /// What was done.
    pub action: WebhookAction,
}

/// Verifies, classifies, and applies provider webhook deliveries.
pub struct WebhookProcessor {
    store: Arc<dyn Store>,
    plans: PlanCatalog,
    webhook_secret: Option<String>,
    tolerance_seconds: u64,
}

impl WebhookProcessor {
    /// Create a processor.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        plans: PlanCatalog,
        webhook_secret: Option<String>,
        tolerance_seconds: u64,
    ) -> Self {
        Self {
            store,
            plans,
            webhook_secret,
            tolerance_seconds,
        }
    }

    /// Whether a webhook secret is configured.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.webhook_secret.is_some()
    }

    /// Verify and apply one delivery.
    ///
    /// # Errors
    ///
    /// See [`ProcessError`]. Duplicates, unknown event types, and events
    /// for unknown accounts are successes.
    pub fn process(
        &self,
        payload: &str,
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, ProcessError> {
        self.process_at(payload, signature, Utc::now().timestamp())
    }

    /// [`process`](Self::process) with an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`ProcessError`].
    pub fn process_at(
        &self,
        payload: &str,
        signature: Option<&str>,
        now: i64,
    ) -> Result<WebhookOutcome, ProcessError> {
        let secret = self.webhook_secret.as_deref().ok_or(ProcessError::NotConfigured)?;
        if let Err(e) =
            verify_stripe_signature(secret, payload, signature, self.tolerance_seconds, now)
        {
            tracing::warn!(error = %e, "Rejected Stripe webhook");
            return Err(e.into());
        }

        let Some(envelope) =
            parse_event(payload).map_err(|e| ProcessError::MalformedPayload(e.to_string()))?
        else {
            return Ok(WebhookOutcome {
                event_id: None,
                event_type: None,
                account_id: None,
                action: WebhookAction::Ignored,
            });
        };

        match self.apply(&envelope) {
            Ok(outcome) => {
                tracing::info!(
                    event_id = %envelope.id,
                    event_type = envelope.event.kind(),
                    action = outcome.action.name(),
                    "Stripe webhook processed"
                );
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(
                    event_id = %envelope.id,
                    event_type = envelope.event.kind(),
                    error = %e,
                    "Stripe webhook processing failed"
                );
                Err(e.into())
            }
        }
    }

    /// Apply an already verified event.
    ///
    /// # Errors
    ///
    /// Returns a ledger or store error; the account is left unchanged.
    pub fn apply(&self, envelope: &EventEnvelope) -> Result<WebhookOutcome, BillingError> {
        let event_type = Some(envelope.event.kind());
        let Some(account_id) = self.resolve_account(envelope)? else {
            tracing::warn!(
                event_id = %envelope.id,
                event_type = envelope.event.kind(),
                customer_id = ?envelope.customer_id,
                "No account for Stripe event, dropping"
            );
            return Ok(WebhookOutcome {
                event_id: Some(envelope.id.clone()),
                event_type,
                account_id: None,
                action: WebhookAction::AccountUnresolved,
            });
        };

        let action = atomically(self.store.as_ref(), &account_id, |txn| {
            self.route(txn, envelope)
        })?;

        Ok(WebhookOutcome {
            event_id: Some(envelope.id.clone()),
            event_type,
            account_id: Some(account_id),
            action,
        })
    }

    /// Metadata account id first, then the customer reverse lookup.
    fn resolve_account(&self, envelope: &EventEnvelope) -> Result<Option<AccountId>, BillingError> {
        if let Some(hint) = envelope.account_hint {
            if self.store.get_account(&hint)?.is_some() {
                return Ok(Some(hint));
            }
        }
        if let Some(customer) = &envelope.customer_id {
            if let Some(account) = self.store.find_account_by_customer(customer)? {
                return Ok(Some(account.id));
            }
        }
        Ok(None)
    }

    fn route(
        &self,
        txn: &mut dyn AccountTxn,
        envelope: &EventEnvelope,
    ) -> Result<WebhookAction, BillingError> {
        let machine = PlanStateMachine::new(&self.plans);
        let event_id = envelope.id.as_str();
        let event_at = envelope.created;

        link_customer(txn, envelope.customer_id.as_deref());

        let transition = match &envelope.event {
            BillingEvent::CheckoutCompleted(checkout) => {
                return self.checkout(txn, &machine, envelope, checkout);
            }
            BillingEvent::SubscriptionCreated(snapshot) => {
                if matches!(
                    snapshot.status,
                    Some(SubscriptionStatus::Incomplete | SubscriptionStatus::IncompleteExpired)
                ) {
                    machine.update_status(
                        txn,
                        Some(&snapshot.subscription_id),
                        snapshot.status.unwrap_or(SubscriptionStatus::Incomplete),
                    )
                } else {
                    machine.start(txn, &self.subscription_start(snapshot, envelope))?
                }
            }
            BillingEvent::SubscriptionUpdated(snapshot) => {
                machine.change(txn, snapshot, event_id, event_at)?
            }
            BillingEvent::SubscriptionDeleted(snapshot) => machine.cancel(txn, snapshot, event_at),
            BillingEvent::InvoicePaid(invoice) => {
                if invoice.subscription_id.is_none() {
                    return Ok(WebhookAction::Ignored);
                }
                match invoice.billing_reason {
                    InvoiceBillingReason::SubscriptionCreate => {
                        machine.start(txn, &self.invoice_start(invoice, envelope))?
                    }
                    InvoiceBillingReason::SubscriptionUpdate => machine.update_status(
                        txn,
                        invoice.subscription_id.as_deref(),
                        SubscriptionStatus::Active,
                    ),
                    InvoiceBillingReason::SubscriptionCycle | InvoiceBillingReason::Other => {
                        machine.renew(txn, invoice, event_id, event_at)?
                    }
                }
            }
            BillingEvent::InvoicePaymentFailed(invoice) => machine.update_status(
                txn,
                invoice.subscription_id.as_deref(),
                SubscriptionStatus::PastDue,
            ),
        };

        Ok(WebhookAction::Plan { transition })
    }

    fn checkout(
        &self,
        txn: &mut dyn AccountTxn,
        machine: &PlanStateMachine<'_>,
        envelope: &EventEnvelope,
        checkout: &CheckoutCompleted,
    ) -> Result<WebhookAction, BillingError> {
        match &checkout.mode {
            CheckoutMode::Payment { credits, quantity } => {
                if !checkout.paid {
                    tracing::info!(
                        session_id = %checkout.session_id,
                        "Checkout completed without payment, waiting for async payment"
                    );
                    return Ok(WebhookAction::AwaitingPayment);
                }
                let amount = credits
                    .or_else(|| quantity.map(|q| self.plans.topup_credits(q)))
                    .unwrap_or(0);
                if amount == 0 {
                    tracing::warn!(
                        session_id = %checkout.session_id,
                        "Top-up checkout carries no credit amount, ignoring"
                    );
                    return Ok(WebhookAction::Ignored);
                }
                let request = GrantRequest::new(
                    txn.account().id,
                    GrantType::Topup,
                    format!("topup:{}", checkout.session_id),
                    amount,
                )
                .with_source_event(envelope.id.as_str());
                let grant = apply_grant_in(txn, &request)?;
                Ok(WebhookAction::Topup { grant })
            }
            CheckoutMode::Subscription {
                subscription_id,
                plan,
                price_id,
            } => {
                let plan = plan.or_else(|| {
                    price_id
                        .as_deref()
                        .and_then(|price| self.plans.plan_for_price(price))
                });
                let transition = machine.start(
                    txn,
                    &PlanStart {
                        subscription_id: subscription_id.clone(),
                        plan,
                        price_id: price_id.clone(),
                        status: None,
                        period: None,
                        event_id: envelope.id.clone(),
                        event_at: envelope.created,
                    },
                )?;
                Ok(WebhookAction::Plan { transition })
            }
        }
    }

    fn subscription_start(&self, snapshot: &SubscriptionSnapshot, envelope: &EventEnvelope) -> PlanStart {
        PlanStart {
            subscription_id: Some(snapshot.subscription_id.clone()),
            plan: snapshot
                .price_id
                .as_deref()
                .and_then(|price| self.plans.plan_for_price(price)),
            price_id: snapshot.price_id.clone(),
            status: snapshot.status,
            period: snapshot.period,
            event_id: envelope.id.clone(),
            event_at: envelope.created,
        }
    }

    fn invoice_start(&self, invoice: &InvoiceSnapshot, envelope: &EventEnvelope) -> PlanStart {
        PlanStart {
            subscription_id: invoice.subscription_id.clone(),
            plan: invoice
                .price_id
                .as_deref()
                .and_then(|price| self.plans.plan_for_price(price)),
            price_id: invoice.price_id.clone(),
            status: Some(SubscriptionStatus::Active),
            period: invoice.period,
            event_id: envelope.id.clone(),
            event_at: envelope.created,
        }
    }
}

/// Remember the customer reference for later reverse lookups.
pub(crate) fn link_customer(txn: &mut dyn AccountTxn, customer_id: Option<&str>) {
    if let Some(customer) = customer_id {
        let account = txn.account_mut();
        if account.stripe_customer_id.is_none() {
            account.stripe_customer_id = Some(customer.to_string());
            account.touch();
        }
    }
}
