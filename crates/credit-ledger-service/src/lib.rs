//! Credit Ledger HTTP API Service.
//!
//! This crate provides the HTTP API and the ledgers behind it:
//!
//! - Account management, including anonymous trial sessions
//! - The credit grant ledger (monthly allotments, upgrades, top-ups)
//! - The usage charge ledger (per-turn, per-checkpoint charges)
//! - The plan state machine driven by subscription lifecycle events
//! - Stripe checkout, portal, and signed webhook processing
//!
//! # Authentication
//!
//! The service supports two authentication methods:
//!
//! 1. **HS256 JWTs** - For end-user requests (dashboard, checkout, history)
//! 2. **Service API keys** - For service-to-service requests (the chat-turn flow)
//!
//! Webhooks are authenticated by their `Stripe-Signature` header.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers call the synchronous store

pub mod auth;
pub mod billing;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod stripe;

pub use billing::plans::{PlanStateMachine, TransitionOutcome};
pub use billing::processor::{ProcessError, WebhookAction, WebhookOutcome, WebhookProcessor};
pub use config::ServiceConfig;
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
pub use stripe::{StripeClient, StripeError};
