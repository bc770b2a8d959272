//! Common test utilities for credit-ledger integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::{TestRequest, TestResponse, TestServer};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;

use credit_ledger_core::{AccountId, GrantRequest, GrantType, Plan, PlanCatalog, RecordId, UserId};
use credit_ledger_service::auth::JwtClaims;
use credit_ledger_service::billing::grants::apply_grant;
use credit_ledger_service::crypto::sign_stripe_payload;
use credit_ledger_service::{create_router, AppState, ServiceConfig};
use credit_ledger_store::{MemoryStore, Store};

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const SERVICE_API_KEY: &str = "test-service-key";
pub const WEBHOOK_SECRET: &str = "whsec_test";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The store behind the server, for direct assertions.
    pub store: Arc<MemoryStore>,
    /// The configuration the server was built with.
    pub config: ServiceConfig,
    /// A test user ID for authenticated requests.
    pub test_user_id: UserId,
    /// The service API key for service-to-service requests.
    pub service_api_key: String,
}

impl TestHarness {
    /// Create a new test harness with a fresh store.
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// Harness whose Stripe client talks to `base_url` (a mock server).
    pub fn with_stripe(base_url: &str) -> Self {
        let mut config = test_config();
        config.stripe_api_key = Some("sk_test_123".into());
        config.stripe_api_base = base_url.to_string();
        Self::with_config(config)
    }

    pub fn with_config(config: ServiceConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let state = AppState::new(Arc::clone(&store) as Arc<dyn Store>, config.clone());
        let server = TestServer::new(create_router(state)).expect("Failed to create test server");

        Self {
            server,
            store,
            config,
            test_user_id: UserId::generate(),
            service_api_key: SERVICE_API_KEY.to_string(),
        }
    }

    pub fn account_id(&self) -> AccountId {
        AccountId::User(self.test_user_id)
    }

    /// Bearer header for the harness user.
    pub fn user_auth_header(&self) -> String {
        auth_header_for(&self.test_user_id, &self.config)
    }

    /// Register the harness user's account.
    pub async fn create_account(&self) {
        self.user_post("/v1/accounts")
            .await
            .assert_status(StatusCode::CREATED);
    }

    /// POST as the chat-turn service.
    pub fn service_post(&self, path: &str) -> TestRequest {
        self.server
            .post(path)
            .add_header(header("x-api-key"), value(&self.service_api_key))
            .add_header(header("x-service-name"), value("chat-flow"))
    }

    /// GET as the harness user.
    pub fn user_get(&self, path: &str) -> TestRequest {
        self.server
            .get(path)
            .add_header(header("authorization"), value(&self.user_auth_header()))
    }

    /// POST as the harness user.
    pub fn user_post(&self, path: &str) -> TestRequest {
        self.server
            .post(path)
            .add_header(header("authorization"), value(&self.user_auth_header()))
    }

    /// Seed credits directly through the grant ledger.
    pub fn fund(&self, account_id: &AccountId, amount: u64) {
        let request = GrantRequest::new(
            *account_id,
            GrantType::Topup,
            format!("fund:{}", RecordId::generate()),
            amount,
        );
        apply_grant(self.store.as_ref(), &request).unwrap();
    }

    /// Current balance straight from the store.
    pub fn balance(&self, account_id: &AccountId) -> u64 {
        self.store
            .get_account(account_id)
            .unwrap()
            .map_or(0, |a| a.credit_balance)
    }

    /// Sign and post a Stripe event.
    pub async fn deliver(
        &self,
        event_id: &str,
        event_type: &str,
        object: serde_json::Value,
    ) -> TestResponse {
        let now = chrono::Utc::now().timestamp();
        let payload = json!({
            "id": event_id,
            "type": event_type,
            "created": now,
            "data": { "object": object }
        })
        .to_string();
        let signature = sign_stripe_payload(WEBHOOK_SECRET, &payload, now).unwrap();

        self.server
            .post("/webhooks/stripe")
            .add_header(header("stripe-signature"), value(&signature))
            .text(payload)
            .await
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration with auth, webhook secret, and a full price table.
pub fn test_config() -> ServiceConfig {
    let plans = PlanCatalog::default()
        .with_price(Plan::Starter, "price_starter")
        .unwrap()
        .with_price(Plan::Plus, "price_plus")
        .unwrap()
        .with_price(Plan::Pro, "price_pro")
        .unwrap()
        .with_topup(Some("price_topup".into()), 100)
        .unwrap();

    ServiceConfig {
        listen_addr: "127.0.0.1:0".into(),
        auth_jwt_secret: Some(JWT_SECRET.into()),
        service_api_key: Some(SERVICE_API_KEY.into()),
        stripe_webhook_secret: Some(WEBHOOK_SECRET.into()),
        plans,
        ..ServiceConfig::default()
    }
}

/// Mint a token the service accepts for `user_id`.
pub fn auth_header_for(user_id: &UserId, config: &ServiceConfig) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = JwtClaims {
        sub: user_id.to_string(),
        aud: Some(json!(config.auth_audience)),
        iss: config.auth_issuer.clone(),
        exp: now + 3600,
        iat: now,
        email: Some("user@example.com".into()),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap();
    format!("Bearer {token}")
}

pub fn header(name: &'static str) -> HeaderName {
    HeaderName::from_static(name)
}

pub fn value(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap()
}
