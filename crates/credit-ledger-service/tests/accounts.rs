//! Account, balance, and history integration tests.

mod common;

use axum::http::StatusCode;
use common::{header, value, TestHarness};
use serde_json::json;

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn health_is_public() {
    let harness = TestHarness::new();

    let response = harness.server.get("/health").await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "credit-ledger");
}

// ============================================================================
// User Accounts
// ============================================================================

#[tokio::test]
async fn create_account_is_idempotent() {
    let harness = TestHarness::new();

    let first = harness.user_post("/v1/accounts").await;
    first.assert_status(StatusCode::CREATED);
    let body: serde_json::Value = first.json();
    assert_eq!(body["account_id"], harness.account_id().to_string());
    assert_eq!(body["plan"], "none");
    assert_eq!(body["credit_balance"], 0);

    let second = harness.user_post("/v1/accounts").await;
    second.assert_status_ok();
}

#[tokio::test]
async fn get_account_before_create_is_not_found() {
    let harness = TestHarness::new();

    harness
        .user_get("/v1/accounts/me")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let harness = TestHarness::new();

    harness
        .server
        .get("/v1/accounts/me")
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn forged_token_is_unauthorized() {
    let harness = TestHarness::new();
    let mut config = harness.config.clone();
    config.auth_issuer = "someone-else".into();
    let forged = common::auth_header_for(&harness.test_user_id, &config);

    harness
        .server
        .get("/v1/accounts/me")
        .add_header(header("authorization"), value(&forged))
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn service_key_does_not_authorize_user_routes() {
    let harness = TestHarness::new();

    harness
        .server
        .get("/v1/credits/balance")
        .add_header(header("x-api-key"), value(&harness.service_api_key))
        .await
        .assert_status_unauthorized();
}

// ============================================================================
// Anonymous Sessions
// ============================================================================

#[tokio::test]
async fn anonymous_session_is_seeded_once() {
    let harness = TestHarness::new();
    let session_id = uuid::Uuid::new_v4().to_string();

    let first = harness
        .service_post("/v1/accounts/anonymous")
        .json(&json!({ "session_id": session_id }))
        .await;
    first.assert_status(StatusCode::CREATED);
    let body: serde_json::Value = first.json();
    assert_eq!(body["account_id"], format!("anon_{session_id}"));
    assert_eq!(body["credit_balance"], harness.config.anonymous_trial_credits);

    let again = harness
        .service_post("/v1/accounts/anonymous")
        .json(&json!({ "session_id": session_id }))
        .await;
    again.assert_status_ok();
    let body: serde_json::Value = again.json();
    assert_eq!(body["credit_balance"], harness.config.anonymous_trial_credits);
}

#[tokio::test]
async fn anonymous_session_requires_service_key() {
    let harness = TestHarness::new();

    harness
        .server
        .post("/v1/accounts/anonymous")
        .json(&json!({}))
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn anonymous_session_rejects_bad_id() {
    let harness = TestHarness::new();

    harness
        .service_post("/v1/accounts/anonymous")
        .json(&json!({ "session_id": "not-a-uuid" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

// ============================================================================
// Balance and History
// ============================================================================

#[tokio::test]
async fn balance_reports_plan_and_allotment() {
    let harness = TestHarness::new();
    harness.create_account().await;
    harness.fund(&harness.account_id(), 42);

    let response = harness.user_get("/v1/credits/balance").await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["credit_balance"], 42);
    assert_eq!(body["plan"], "none");
    assert_eq!(body["monthly_allotment"], 0);
}

#[tokio::test]
async fn grant_history_paginates() {
    let harness = TestHarness::new();
    harness.create_account().await;
    for _ in 0..3 {
        harness.fund(&harness.account_id(), 10);
    }

    let page = harness.user_get("/v1/credits/grants?limit=2").await;
    page.assert_status_ok();
    let body: serde_json::Value = page.json();
    assert_eq!(body["grants"].as_array().unwrap().len(), 2);
    assert_eq!(body["has_more"], true);
    // Newest first
    assert_eq!(body["grants"][0]["balance_after"], 30);

    let rest = harness.user_get("/v1/credits/grants?limit=2&offset=2").await;
    let body: serde_json::Value = rest.json();
    assert_eq!(body["grants"].as_array().unwrap().len(), 1);
    assert_eq!(body["has_more"], false);
}

#[tokio::test]
async fn charge_history_lists_turn_charges() {
    let harness = TestHarness::new();
    harness.create_account().await;
    harness.fund(&harness.account_id(), 10);

    harness
        .service_post("/v1/usage/charge")
        .json(&json!({
            "account_id": harness.account_id().to_string(),
            "turn_id": "turn-1",
            "kind": "user_send",
            "amount": 3
        }))
        .await
        .assert_status_ok();

    let response = harness.user_get("/v1/credits/charges").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let charges = body["charges"].as_array().unwrap();
    assert_eq!(charges.len(), 1);
    assert_eq!(charges[0]["turn_id"], "turn-1");
    assert_eq!(charges[0]["charge_kind"], "user_send");
    assert_eq!(charges[0]["balance_after"], 7);
}
