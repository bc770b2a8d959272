//! Classification of Stripe webhook payloads into ledger events.

use std::collections::HashMap;

use chrono::DateTime;

use credit_ledger_core::{
    AccountId, BillingEvent, BillingPeriod, CheckoutCompleted, CheckoutMode, EventEnvelope,
    InvoiceBillingReason, InvoiceSnapshot, Plan, SubscriptionSnapshot, SubscriptionStatus,
};

use super::types::{CheckoutSession, Invoice, InvoiceLine, Subscription, WebhookEvent};

/// Metadata key carrying our account id on provider objects.
pub const ACCOUNT_ID_METADATA_KEY: &str = "account_id";

/// Parse a verified webhook body.
///
/// Returns `Ok(None)` for event types the ledger does not act on.
///
/// # Errors
///
/// Returns the deserialization error if the envelope or the object of a
/// handled event type is malformed.
pub fn parse_event(payload: &str) -> Result<Option<EventEnvelope>, serde_json::Error> {
    let raw: WebhookEvent = serde_json::from_str(payload)?;
    let object = raw.data.object;

    let (event, account_hint, customer_id) = match raw.event_type.as_str() {
        "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
            let session: CheckoutSession = serde_json::from_value(object)?;
            let hint = account_hint(&session.metadata)
                .or_else(|| parse_account(session.client_reference_id.as_deref()));
            let customer = session.customer.clone();
            (BillingEvent::CheckoutCompleted(checkout(session)), hint, customer)
        }
        "customer.subscription.created"
        | "customer.subscription.updated"
        | "customer.subscription.deleted" => {
            let subscription: Subscription = serde_json::from_value(object)?;
            let hint = account_hint(&subscription.metadata);
            let customer = subscription.customer.clone();
            let snapshot = subscription_snapshot(subscription);
            let event = match raw.event_type.as_str() {
                "customer.subscription.created" => BillingEvent::SubscriptionCreated(snapshot),
                "customer.subscription.updated" => BillingEvent::SubscriptionUpdated(snapshot),
                _ => BillingEvent::SubscriptionDeleted(snapshot),
            };
            (event, hint, customer)
        }
        "invoice.paid" | "invoice.payment_succeeded" | "invoice.payment_failed" => {
            let invoice: Invoice = serde_json::from_value(object)?;
            let hint = invoice_account_hint(&invoice);
            let customer = invoice.customer.clone();
            let snapshot = invoice_snapshot(invoice);
            let event = if raw.event_type == "invoice.payment_failed" {
                BillingEvent::InvoicePaymentFailed(snapshot)
            } else {
                BillingEvent::InvoicePaid(snapshot)
            };
            (event, hint, customer)
        }
        other => {
            tracing::debug!(event_id = %raw.id, event_type = %other, "Unhandled Stripe event type");
            return Ok(None);
        }
    };

    Ok(Some(EventEnvelope {
        id: raw.id,
        created: raw.created.and_then(|ts| DateTime::from_timestamp(ts, 0)),
        account_hint,
        customer_id,
        event,
    }))
}

fn checkout(session: CheckoutSession) -> CheckoutCompleted {
    let mode = if session.mode.as_deref() == Some("subscription") {
        CheckoutMode::Subscription {
            subscription_id: session.subscription,
            plan: session.metadata.get("plan").and_then(|p| p.parse::<Plan>().ok()),
            price_id: session.metadata.get("price_id").cloned(),
        }
    } else {
        CheckoutMode::Payment {
            credits: parse_u64(session.metadata.get("credits")),
            quantity: parse_u64(session.metadata.get("quantity")),
        }
    };

    CheckoutCompleted {
        session_id: session.id,
        paid: session.payment_status.as_deref() == Some("paid"),
        mode,
    }
}

fn subscription_snapshot(subscription: Subscription) -> SubscriptionSnapshot {
    let item = subscription.items.and_then(|items| items.data.into_iter().next());
    let start = subscription
        .current_period_start
        .or_else(|| item.as_ref().and_then(|i| i.current_period_start));
    let end = subscription
        .current_period_end
        .or_else(|| item.as_ref().and_then(|i| i.current_period_end));

    SubscriptionSnapshot {
        subscription_id: subscription.id,
        status: subscription
            .status
            .as_deref()
            .and_then(|s| s.parse::<SubscriptionStatus>().ok()),
        price_id: item.and_then(|i| i.price).map(|p| p.id),
        period: start.zip(end).and_then(|(s, e)| BillingPeriod::from_unix(s, e)),
    }
}

fn invoice_snapshot(invoice: Invoice) -> InvoiceSnapshot {
    let parent_subscription = invoice
        .parent
        .as_ref()
        .and_then(|p| p.subscription_details.as_ref())
        .and_then(|d| d.subscription.clone());
    let line = invoice.lines.and_then(|lines| billed_period_line(lines.data));

    InvoiceSnapshot {
        billing_reason: InvoiceBillingReason::from_provider(invoice.billing_reason.as_deref()),
        subscription_id: invoice.subscription.or(parent_subscription),
        price_id: line.as_ref().and_then(|l| l.price_id()).map(str::to_string),
        period: line
            .and_then(|l| l.period)
            .and_then(|p| BillingPeriod::from_unix(p.start, p.end)),
        invoice_id: invoice.id,
    }
}

/// The line billing the period the invoice pays for.
///
/// Proration lines credit or charge for time already past and never name
/// the plan going forward. Among the rest the latest period wins, keeping
/// the first on ties.
fn billed_period_line(lines: Vec<InvoiceLine>) -> Option<InvoiceLine> {
    let start = |line: &InvoiceLine| line.period.as_ref().map(|p| p.start);
    lines
        .into_iter()
        .filter(|line| !line.proration)
        .reduce(|best, line| if start(&line) > start(&best) { line } else { best })
}

fn invoice_account_hint(invoice: &Invoice) -> Option<AccountId> {
    account_hint(&invoice.metadata)
        .or_else(|| {
            invoice
                .subscription_details
                .as_ref()
                .and_then(|d| account_hint(&d.metadata))
        })
        .or_else(|| {
            invoice
                .parent
                .as_ref()
                .and_then(|p| p.subscription_details.as_ref())
                .and_then(|d| account_hint(&d.metadata))
        })
}

fn account_hint(metadata: &HashMap<String, String>) -> Option<AccountId> {
    parse_account(metadata.get(ACCOUNT_ID_METADATA_KEY).map(String::as_str))
}

fn parse_account(value: Option<&str>) -> Option<AccountId> {
    let value = value?;
    match value.parse() {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::warn!(value = %value, error = %e, "Ignoring unparseable account id in Stripe object");
            None
        }
    }
}

fn parse_u64(value: Option<&String>) -> Option<u64> {
    value.and_then(|v| v.parse().ok())
}
