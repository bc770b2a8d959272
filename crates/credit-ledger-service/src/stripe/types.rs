//! Stripe API types.
//!
//! Only the fields the ledger reads are modelled; everything else in the
//! provider's objects is ignored on deserialization.

use std::collections::HashMap;

use serde::Deserialize;

/// Stripe customer object.
#[derive(Debug, Clone, Deserialize)]
pub struct Customer {
    /// Stripe customer ID.
    pub id: String,
    /// Customer email.
    #[serde(default)]
    pub email: Option<String>,
    /// Metadata attached to the customer.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Stripe Checkout session object.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    /// Session ID.
    pub id: String,
    /// Checkout URL to redirect the user to.
    #[serde(default)]
    pub url: Option<String>,
    /// `payment` or `subscription`.
    #[serde(default)]
    pub mode: Option<String>,
    /// `paid`, `unpaid`, or `no_payment_required`.
    #[serde(default)]
    pub payment_status: Option<String>,
    /// Customer ID.
    #[serde(default)]
    pub customer: Option<String>,
    /// Subscription created by the session.
    #[serde(default)]
    pub subscription: Option<String>,
    /// Client reference ID (our account id).
    #[serde(default)]
    pub client_reference_id: Option<String>,
    /// Metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Stripe billing portal session object.
#[derive(Debug, Clone, Deserialize)]
pub struct PortalSession {
    /// Session ID.
    pub id: String,
    /// Portal URL to redirect the user to.
    pub url: String,
}

/// Stripe price reference.
#[derive(Debug, Clone, Deserialize)]
pub struct Price {
    /// Price ID.
    pub id: String,
}

/// Stripe subscription object.
#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    /// Subscription ID.
    pub id: String,
    /// Customer ID.
    #[serde(default)]
    pub customer: Option<String>,
    /// Status (`active`, `past_due`, `canceled`, ...).
    #[serde(default)]
    pub status: Option<String>,
    /// Period start (Unix). Newer API versions carry it on the item.
    #[serde(default)]
    pub current_period_start: Option<i64>,
    /// Period end (Unix).
    #[serde(default)]
    pub current_period_end: Option<i64>,
    /// Subscription items.
    #[serde(default)]
    pub items: Option<StripeList<SubscriptionItem>>,
    /// Metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Stripe subscription item.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItem {
    /// Item price.
    #[serde(default)]
    pub price: Option<Price>,
    /// Period start (Unix).
    #[serde(default)]
    pub current_period_start: Option<i64>,
    /// Period end (Unix).
    #[serde(default)]
    pub current_period_end: Option<i64>,
}

/// Stripe invoice object.
#[derive(Debug, Clone, Deserialize)]
pub struct Invoice {
    /// Invoice ID.
    pub id: String,
    /// Customer ID.
    #[serde(default)]
    pub customer: Option<String>,
    /// Subscription ID (older API versions).
    #[serde(default)]
    pub subscription: Option<String>,
    /// `subscription_create`, `subscription_cycle`, `subscription_update`, ...
    #[serde(default)]
    pub billing_reason: Option<String>,
    /// Subscription metadata snapshot (older API versions).
    #[serde(default)]
    pub subscription_details: Option<SubscriptionDetails>,
    /// Parent object (newer API versions).
    #[serde(default)]
    pub parent: Option<InvoiceParent>,
    /// Invoice lines.
    #[serde(default)]
    pub lines: Option<StripeList<InvoiceLine>>,
    /// Metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Subscription snapshot embedded in an invoice.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionDetails {
    /// Subscription ID (only on `parent.subscription_details`).
    #[serde(default)]
    pub subscription: Option<String>,
    /// Subscription metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Invoice parent.
#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceParent {
    /// Present when the invoice bills a subscription.
    #[serde(default)]
    pub subscription_details: Option<SubscriptionDetails>,
}

/// Invoice line.
#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceLine {
    /// Line price (older API versions).
    #[serde(default)]
    pub price: Option<Price>,
    /// Line pricing (newer API versions).
    #[serde(default)]
    pub pricing: Option<LinePricing>,
    /// Service period.
    #[serde(default)]
    pub period: Option<LinePeriod>,
    /// Whether the line prorates a mid-period plan change.
    #[serde(default)]
    pub proration: bool,
}

impl InvoiceLine {
    /// The line's price id, whichever API shape carried it.
    #[must_use]
    pub fn price_id(&self) -> Option<&str> {
        self.price.as_ref().map(|p| p.id.as_str()).or_else(|| {
            self.pricing
                .as_ref()
                .and_then(|p| p.price_details.as_ref())
                .map(|d| d.price.as_str())
        })
    }
}

/// Invoice line pricing.
#[derive(Debug, Clone, Deserialize)]
pub struct LinePricing {
    /// Price reference.
    #[serde(default)]
    pub price_details: Option<PriceDetails>,
}

/// Price reference on a line.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceDetails {
    /// Price ID.
    pub price: String,
}

/// Service period of an invoice line.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LinePeriod {
    /// Start (Unix).
    pub start: i64,
    /// End (Unix).
    pub end: i64,
}

/// Stripe list response wrapper.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeList<T> {
    /// Data items.
    pub data: Vec<T>,
    /// Whether there are more items.
    #[serde(default)]
    pub has_more: bool,
}

/// Stripe webhook event.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    /// Event ID.
    pub id: String,
    /// Event type (e.g., "checkout.session.completed").
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event data.
    pub data: WebhookEventData,
    /// Created timestamp (Unix).
    #[serde(default)]
    pub created: Option<i64>,
}

/// Webhook event data container.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    /// The event object.
    pub object: serde_json::Value,
}

/// Stripe API error response.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorResponse {
    /// Error details.
    pub error: StripeErrorDetail,
}

/// Stripe error detail.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorDetail {
    /// Error type.
    #[serde(rename = "type")]
    pub error_type: String,
    /// Error message.
    #[serde(default)]
    pub message: String,
    /// Error code.
    #[serde(default)]
    pub code: Option<String>,
}
