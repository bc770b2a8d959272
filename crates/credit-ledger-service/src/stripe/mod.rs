//! Stripe integration for subscriptions and credit purchases.
//!
//! Stripe handles:
//! - Customer registration
//! - Plan subscriptions and credit top-ups via Checkout
//! - Self-service subscription changes via the billing portal
//! - Webhook events that drive the ledgers

pub mod client;
pub mod events;
pub mod types;

pub use client::{CheckoutItem, StripeClient, StripeError};
pub use events::parse_event;
