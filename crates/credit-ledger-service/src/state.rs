//! Application state.

use std::sync::Arc;

use credit_ledger_store::Store;

use crate::billing::processor::WebhookProcessor;
use crate::config::ServiceConfig;
use crate::stripe::StripeClient;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Stripe client for checkout and portal sessions (optional).
    pub stripe: Option<Arc<StripeClient>>,

    /// Webhook verifier and router.
    pub processor: Arc<WebhookProcessor>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        // Create Stripe client if configured
        let stripe = config.stripe_api_key.as_ref().and_then(|key| {
            match StripeClient::new(key, config.stripe_api_base.clone()) {
                Ok(client) => {
                    tracing::info!("Stripe integration enabled");
                    Some(Arc::new(client))
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create Stripe client");
                    None
                }
            }
        });

        if stripe.is_none() {
            tracing::warn!("Stripe not configured - checkout and portal will not be available");
        }
        if config.stripe_webhook_secret.is_none() {
            tracing::warn!("Stripe webhook secret not configured - webhooks will be rejected");
        }

        let processor = Arc::new(WebhookProcessor::new(
            Arc::clone(&store),
            config.plans.clone(),
            config.stripe_webhook_secret.clone(),
            config.webhook_tolerance_seconds,
        ));

        Self {
            store,
            config,
            stripe,
            processor,
        }
    }

    /// Check if Stripe is configured.
    #[must_use]
    pub fn has_stripe(&self) -> bool {
        self.stripe.is_some()
    }

    /// The Stripe client, or a 503 if it is not configured.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::ServiceUnavailable` when no API key is configured.
    pub fn stripe(&self) -> Result<&StripeClient, crate::error::ApiError> {
        self.stripe.as_deref().ok_or_else(|| {
            crate::error::ApiError::ServiceUnavailable("Stripe is not configured".into())
        })
    }
}
