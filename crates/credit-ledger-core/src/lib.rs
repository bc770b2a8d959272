//! Core types and utilities for the credit ledger.
//!
//! This crate provides the foundational types shared by the store and the service:
//!
//! - **Identifiers**: `AccountId`, `UserId`, `SessionId`, `RecordId`, `TurnId`
//! - **Accounts**: `Account`, `SubscriptionStatus`
//! - **Plans**: `Plan`, `PlanCatalog`, `UpgradeGrantPolicy`
//! - **Grants**: `CreditGrant`, `GrantType`, `GrantRequest`, `GrantOutcome`
//! - **Usage**: `UsageChargeEntry`, `ChargeKind`, `ChargeKey`, `ChargeOutcome`
//! - **Events**: `BillingEvent`, `EventEnvelope`
//!
//! # Credit Unit
//!
//! Credits are whole, non-negative integers. A conversational turn costs a
//! small fixed number of credits; plans grant a monthly allotment.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod error;
pub mod event;
pub mod grant;
pub mod ids;
pub mod plan;
pub mod usage;

pub use account::{Account, BillingPeriod, SubscriptionStatus};
pub use error::{BillingError, Result};
pub use event::{
    BillingEvent, CheckoutCompleted, CheckoutMode, EventEnvelope, InvoiceBillingReason,
    InvoiceSnapshot, SubscriptionSnapshot,
};
pub use grant::{CreditGrant, GrantOutcome, GrantRequest, GrantSkip, GrantType};
pub use ids::{AccountId, IdError, RecordId, SessionId, TurnId, UserId};
pub use plan::{Plan, PlanCatalog, UpgradeGrantPolicy};
pub use usage::{
    ChargeKey, ChargeKind, ChargeOutcome, ChargeStatus, UsageChargeEntry, UsagePricing,
};
