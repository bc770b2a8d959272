//! Checkout and portal integration tests against a mocked Stripe API.

mod common;

use axum::http::StatusCode;
use common::TestHarness;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use credit_ledger_store::Store;

async fn mock_stripe() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/customers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cus_mock",
            "email": "user@example.com",
            "metadata": {}
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/checkout/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_mock",
            "url": "https://checkout.stripe.test/cs_mock"
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/billing_portal/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "bps_mock",
            "url": "https://billing.stripe.test/bps_mock"
        })))
        .mount(&server)
        .await;

    server
}

#[tokio::test]
async fn checkout_without_stripe_is_unavailable() {
    let harness = TestHarness::new();
    harness.create_account().await;

    harness
        .user_post("/v1/billing/checkout")
        .json(&json!({ "plan": "starter" }))
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn plan_checkout_creates_and_links_customer() {
    let stripe = mock_stripe().await;
    let harness = TestHarness::with_stripe(&stripe.uri());
    harness.create_account().await;

    let response = harness
        .user_post("/v1/billing/checkout")
        .json(&json!({ "plan": "plus" }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["session_id"], "cs_mock");
    assert_eq!(body["checkout_url"], "https://checkout.stripe.test/cs_mock");

    let account = harness
        .store
        .get_account(&harness.account_id())
        .unwrap()
        .unwrap();
    assert_eq!(account.stripe_customer_id.as_deref(), Some("cus_mock"));
}

#[tokio::test]
async fn checkout_sends_account_reference_and_price() {
    let stripe = MockServer::start().await;
    let harness = TestHarness::with_stripe(&stripe.uri());
    harness.create_account().await;

    Mock::given(method("POST"))
        .and(path("/customers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "cus_1" })))
        .mount(&stripe)
        .await;
    Mock::given(method("POST"))
        .and(path("/checkout/sessions"))
        .and(body_string_contains("client_reference_id="))
        .and(body_string_contains("price_topup"))
        .and(body_string_contains("mode=payment"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_topup",
            "url": "https://checkout.stripe.test/cs_topup"
        })))
        .expect(1)
        .mount(&stripe)
        .await;

    harness
        .user_post("/v1/billing/checkout")
        .json(&json!({ "quantity": 3 }))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn plan_checkout_with_active_plan_is_conflict() {
    let stripe = mock_stripe().await;
    let harness = TestHarness::with_stripe(&stripe.uri());
    harness.create_account().await;

    harness
        .deliver(
            "evt_created",
            "customer.subscription.created",
            json!({
                "id": "sub_1", "customer": "cus_1", "status": "active",
                "metadata": { "account_id": harness.account_id().to_string() },
                "items": { "data": [{ "price": { "id": "price_starter" } }] }
            }),
        )
        .await
        .assert_status_ok();

    harness
        .user_post("/v1/billing/checkout")
        .json(&json!({ "plan": "pro" }))
        .await
        .assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn checkout_rejects_bad_quantity() {
    let stripe = mock_stripe().await;
    let harness = TestHarness::with_stripe(&stripe.uri());
    harness.create_account().await;

    harness
        .user_post("/v1/billing/checkout")
        .json(&json!({ "quantity": 0 }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stripe_errors_surface_as_bad_gateway() {
    let stripe = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/customers"))
        .respond_with(ResponseTemplate::new(402).set_body_json(json!({
            "error": { "type": "card_error", "message": "Your card was declined." }
        })))
        .mount(&stripe)
        .await;

    let harness = TestHarness::with_stripe(&stripe.uri());
    harness.create_account().await;

    harness
        .user_post("/v1/billing/checkout")
        .json(&json!({ "plan": "starter" }))
        .await
        .assert_status(StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn portal_requires_billing_history() {
    let stripe = mock_stripe().await;
    let harness = TestHarness::with_stripe(&stripe.uri());
    harness.create_account().await;

    harness
        .user_post("/v1/billing/portal")
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    harness
        .user_post("/v1/billing/checkout")
        .json(&json!({ "plan": "starter" }))
        .await
        .assert_status_ok();

    let response = harness.user_post("/v1/billing/portal").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["portal_url"], "https://billing.stripe.test/bps_mock");
}
