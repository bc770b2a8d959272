//! Stripe API client implementation.

use reqwest::Client;
use std::time::Duration;

use credit_ledger_core::AccountId;

use super::events::ACCOUNT_ID_METADATA_KEY;
use super::types::{CheckoutSession, Customer, PortalSession, StripeErrorResponse};

/// Error type for Stripe operations.
#[derive(Debug, thiserror::Error)]
pub enum StripeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Stripe API returned an error.
    #[error("Stripe API error: {error_type} - {message}")]
    Api {
        /// Error type.
        error_type: String,
        /// Error message.
        message: String,
        /// Error code.
        code: Option<String>,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// What a checkout session sells.
#[derive(Debug, Clone)]
pub enum CheckoutItem<'a> {
    /// A recurring subscription to a plan price.
    Subscription {
        /// Plan price id.
        price_id: &'a str,
        /// Plan name, echoed back in session metadata.
        plan: &'a str,
    },
    /// A one-time credit purchase.
    Topup {
        /// Top-up price id.
        price_id: &'a str,
        /// Units purchased.
        quantity: u64,
        /// Credits the purchase grants.
        credits: u64,
    },
}

/// Stripe API client.
#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl StripeClient {
    /// Create a new Stripe client.
    ///
    /// # Arguments
    ///
    /// * `api_key` - Stripe secret API key (`sk_test_...` or `sk_live_...`)
    /// * `base_url` - API base, e.g. `https://api.stripe.com/v1`
    ///
    /// # Errors
    ///
    /// Returns `StripeError::Http` if the HTTP client cannot be built.
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self, StripeError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Create a new Stripe customer tagged with our account id.
    ///
    /// # Errors
    ///
    /// Returns a `StripeError` if the request fails or Stripe rejects it.
    pub async fn create_customer(
        &self,
        account_id: &AccountId,
        email: Option<&str>,
    ) -> Result<Customer, StripeError> {
        let mut params = vec![(
            format!("metadata[{ACCOUNT_ID_METADATA_KEY}]"),
            account_id.to_string(),
        )];
        if let Some(email) = email {
            params.push(("email".to_string(), email.to_string()));
        }

        let response = self
            .client
            .post(format!("{}/customers", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .form(&params)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Create a Checkout session for a plan subscription or a credit top-up.
    ///
    /// The account id is written to `client_reference_id` and to the
    /// metadata of the session (and of the subscription, in subscription
    /// mode) so webhooks can resolve the account without a customer lookup.
    ///
    /// # Errors
    ///
    /// Returns a `StripeError` if the request fails or Stripe rejects it.
    pub async fn create_checkout_session(
        &self,
        account_id: &AccountId,
        customer_id: Option<&str>,
        item: &CheckoutItem<'_>,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutSession, StripeError> {
        let account = account_id.to_string();
        let mut params = vec![
            ("success_url".to_string(), success_url.to_string()),
            ("cancel_url".to_string(), cancel_url.to_string()),
            ("client_reference_id".to_string(), account.clone()),
            (format!("metadata[{ACCOUNT_ID_METADATA_KEY}]"), account.clone()),
        ];

        match item {
            CheckoutItem::Subscription { price_id, plan } => {
                params.extend([
                    ("mode".to_string(), "subscription".to_string()),
                    ("line_items[0][price]".to_string(), (*price_id).to_string()),
                    ("line_items[0][quantity]".to_string(), "1".to_string()),
                    ("metadata[plan]".to_string(), (*plan).to_string()),
                    ("metadata[price_id]".to_string(), (*price_id).to_string()),
                    (
                        format!("subscription_data[metadata][{ACCOUNT_ID_METADATA_KEY}]"),
                        account,
                    ),
                ]);
            }
            CheckoutItem::Topup {
                price_id,
                quantity,
                credits,
            } => {
                params.extend([
                    ("mode".to_string(), "payment".to_string()),
                    ("line_items[0][price]".to_string(), (*price_id).to_string()),
                    ("line_items[0][quantity]".to_string(), quantity.to_string()),
                    ("metadata[quantity]".to_string(), quantity.to_string()),
                    ("metadata[credits]".to_string(), credits.to_string()),
                ]);
            }
        }

        if let Some(cid) = customer_id {
            params.push(("customer".to_string(), cid.to_string()));
        }

        tracing::debug!(account_id = %account_id, item = ?item, "Creating Stripe checkout session");

        let response = self
            .client
            .post(format!("{}/checkout/sessions", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .form(&params)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Create a billing portal session for a customer.
    ///
    /// # Errors
    ///
    /// Returns a `StripeError` if the request fails or Stripe rejects it.
    pub async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<PortalSession, StripeError> {
        let params = [("customer", customer_id), ("return_url", return_url)];

        let response = self
            .client
            .post(format!("{}/billing_portal/sessions", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .form(&params)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, StripeError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        // Try to parse error response
        let error_body: Result<StripeErrorResponse, _> = response.json().await;

        match error_body {
            Ok(stripe_error) => Err(StripeError::Api {
                error_type: stripe_error.error.error_type,
                message: stripe_error.error.message,
                code: stripe_error.error.code,
            }),
            Err(_) => Err(StripeError::Api {
                error_type: "unknown".to_string(),
                message: format!("HTTP {status}"),
                code: None,
            }),
        }
    }
}
