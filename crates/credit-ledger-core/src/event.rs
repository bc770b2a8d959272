//! Provider billing events, reduced to what the ledger acts on.
//!
//! Provider payloads are parsed into this closed set of variants at the edge;
//! each carries only the fields its handler needs, so an unrecognized event
//! shape can never reach a ledger by accident.

use chrono::{DateTime, Utc};

use crate::{AccountId, BillingPeriod, Plan, SubscriptionStatus};

/// A verified provider notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Provider event id.
    pub id: String,
    /// When the provider created the event.
    pub created: Option<DateTime<Utc>>,
    /// Account id embedded in metadata (or the checkout reference).
    pub account_hint: Option<AccountId>,
    /// Provider customer reference, for reverse lookup.
    pub customer_id: Option<String>,
    /// Classified payload.
    pub event: BillingEvent,
}

/// The event categories the ledger routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingEvent {
    /// A checkout session finished.
    CheckoutCompleted(CheckoutCompleted),
    /// A subscription was created.
    SubscriptionCreated(SubscriptionSnapshot),
    /// A subscription changed (price, status, period).
    SubscriptionUpdated(SubscriptionSnapshot),
    /// A subscription ended.
    SubscriptionDeleted(SubscriptionSnapshot),
    /// An invoice was paid.
    InvoicePaid(InvoiceSnapshot),
    /// An invoice payment attempt failed.
    InvoicePaymentFailed(InvoiceSnapshot),
}

impl BillingEvent {
    /// Short category name for logs and responses.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CheckoutCompleted(_) => "checkout_completed",
            Self::SubscriptionCreated(_) => "subscription_created",
            Self::SubscriptionUpdated(_) => "subscription_updated",
            Self::SubscriptionDeleted(_) => "subscription_deleted",
            Self::InvoicePaid(_) => "invoice_paid",
            Self::InvoicePaymentFailed(_) => "invoice_payment_failed",
        }
    }
}

/// A completed checkout session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutCompleted {
    /// Checkout session id.
    pub session_id: String,
    /// Whether payment has been collected.
    pub paid: bool,
    /// One-time purchase or subscription signup.
    pub mode: CheckoutMode,
}

/// What a checkout session bought.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutMode {
    /// One-time credit purchase.
    Payment {
        /// Credits named explicitly in metadata.
        credits: Option<u64>,
        /// Purchased top-up units.
        quantity: Option<u64>,
    },
    /// Subscription signup.
    Subscription {
        /// Created subscription.
        subscription_id: Option<String>,
        /// Plan named in metadata.
        plan: Option<Plan>,
        /// Price named in metadata.
        price_id: Option<String>,
    },
}

/// The subscription fields the plan state machine needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSnapshot {
    /// Subscription id.
    pub subscription_id: String,
    /// Provider status.
    pub status: Option<SubscriptionStatus>,
    /// Price of the first subscription item.
    pub price_id: Option<String>,
    /// Current billing period.
    pub period: Option<BillingPeriod>,
}

/// Why an invoice was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceBillingReason {
    /// First invoice of a new subscription.
    SubscriptionCreate,
    /// Invoice raised by a mid-period subscription change.
    SubscriptionUpdate,
    /// Regular periodic renewal.
    SubscriptionCycle,
    /// Anything else (manual, threshold, ...).
    Other,
}

impl InvoiceBillingReason {
    /// Parse the provider's `billing_reason`.
    #[must_use]
    pub fn from_provider(value: Option<&str>) -> Self {
        match value {
            Some("subscription_create") => Self::SubscriptionCreate,
            Some("subscription_update") => Self::SubscriptionUpdate,
            Some("subscription_cycle") => Self::SubscriptionCycle,
            _ => Self::Other,
        }
    }
}

/// The invoice fields the ledger needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceSnapshot {
    /// Invoice id.
    pub invoice_id: String,
    /// Subscription the invoice bills, if any.
    pub subscription_id: Option<String>,
    /// Why it was issued.
    pub billing_reason: InvoiceBillingReason,
    /// Price of the subscription line.
    pub price_id: Option<String>,
    /// Service period of the subscription line.
    pub period: Option<BillingPeriod>,
}

impl InvoiceSnapshot {
    /// Identifies the billed period: `<subscription>:<period start>`.
    ///
    /// Falls back to the invoice id when the period is unknown, which still
    /// dedups redeliveries of the same invoice.
    #[must_use]
    pub fn period_key(&self) -> String {
        match (&self.subscription_id, &self.period) {
            (Some(sub), Some(period)) => format!("{sub}:{}", period.start.timestamp()),
            _ => format!("invoice:{}", self.invoice_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_key_uses_subscription_and_start() {
        let invoice = InvoiceSnapshot {
            invoice_id: "in_1".into(),
            subscription_id: Some("sub_1".into()),
            billing_reason: InvoiceBillingReason::SubscriptionCycle,
            price_id: None,
            period: BillingPeriod::from_unix(1_700_000_000, 1_702_592_000),
        };
        assert_eq!(invoice.period_key(), "sub_1:1700000000");
    }

    #[test]
    fn period_key_falls_back_to_invoice() {
        let invoice = InvoiceSnapshot {
            invoice_id: "in_2".into(),
            subscription_id: Some("sub_1".into()),
            billing_reason: InvoiceBillingReason::Other,
            price_id: None,
            period: None,
        };
        assert_eq!(invoice.period_key(), "invoice:in_2");
    }

    #[test]
    fn billing_reason_parsing() {
        assert_eq!(
            InvoiceBillingReason::from_provider(Some("subscription_cycle")),
            InvoiceBillingReason::SubscriptionCycle
        );
        assert_eq!(
            InvoiceBillingReason::from_provider(None),
            InvoiceBillingReason::Other
        );
    }
}
