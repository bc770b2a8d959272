//! Usage charging integration tests.

mod common;

use std::future::IntoFuture;

use axum::http::StatusCode;
use common::TestHarness;
use serde_json::json;

async fn funded(balance: u64) -> TestHarness {
    let harness = TestHarness::new();
    harness.create_account().await;
    if balance > 0 {
        harness.fund(&harness.account_id(), balance);
    }
    harness
}

// ============================================================================
// Charge
// ============================================================================

#[tokio::test]
async fn charge_uses_configured_cost() {
    let harness = funded(10).await;

    let response = harness
        .service_post("/v1/usage/charge")
        .json(&json!({
            "account_id": harness.account_id().to_string(),
            "turn_id": "turn-1",
            "kind": "image_surcharge"
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let cost = harness.config.usage_pricing.image_surcharge;
    assert_eq!(body["charged"], true);
    assert_eq!(body["status"], "charged");
    assert_eq!(body["amount"], cost);
    assert_eq!(body["balance_after"], 10 - cost);
}

#[tokio::test]
async fn retried_checkpoint_is_charged_once() {
    let harness = funded(10).await;
    let request = json!({
        "account_id": harness.account_id().to_string(),
        "turn_id": "turn-1",
        "kind": "user_send",
        "amount": 2
    });

    let first = harness.service_post("/v1/usage/charge").json(&request).await;
    let body: serde_json::Value = first.json();
    assert_eq!(body["status"], "charged");

    let retry = harness.service_post("/v1/usage/charge").json(&request).await;
    retry.assert_status_ok();
    let body: serde_json::Value = retry.json();
    assert_eq!(body["charged"], false);
    assert_eq!(body["status"], "duplicate_turn_charge");
    assert_eq!(body["balance_after"], 8);

    assert_eq!(harness.balance(&harness.account_id()), 8);
}

#[tokio::test]
async fn reply_checkpoint_is_separate_from_send() {
    let harness = funded(10).await;

    for kind in ["user_send", "assistant_reply"] {
        harness
            .service_post("/v1/usage/charge")
            .json(&json!({
                "account_id": harness.account_id().to_string(),
                "turn_id": "turn-1",
                "kind": kind,
                "amount": 1
            }))
            .await
            .assert_status_ok();
    }

    assert_eq!(harness.balance(&harness.account_id()), 8);
}

#[tokio::test]
async fn insufficient_balance_suggests_purchase() {
    let harness = funded(1).await;

    let response = harness
        .service_post("/v1/usage/charge")
        .json(&json!({
            "account_id": harness.account_id().to_string(),
            "turn_id": "turn-1",
            "kind": "user_send",
            "amount": 2
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["charged"], false);
    assert_eq!(body["status"], "insufficient_credits");
    assert_eq!(body["balance_after"], 1);
    assert_eq!(body["action"], "purchase_credits");
}

#[tokio::test]
async fn charge_rejects_bad_input() {
    let harness = funded(10).await;

    harness
        .service_post("/v1/usage/charge")
        .json(&json!({
            "account_id": "acct_123",
            "turn_id": "turn-1",
            "kind": "user_send"
        }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    harness
        .service_post("/v1/usage/charge")
        .json(&json!({
            "account_id": harness.account_id().to_string(),
            "turn_id": " ",
            "kind": "user_send"
        }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    harness
        .service_post("/v1/usage/charge")
        .json(&json!({
            "account_id": harness.account_id().to_string(),
            "turn_id": "turn-1",
            "kind": "user_send",
            "amount": 0
        }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn charge_unknown_account_is_not_found() {
    let harness = TestHarness::new();

    harness
        .service_post("/v1/usage/charge")
        .json(&json!({
            "account_id": harness.account_id().to_string(),
            "turn_id": "turn-1",
            "kind": "user_send"
        }))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn charge_without_api_key_fails() {
    let harness = funded(10).await;

    harness
        .server
        .post("/v1/usage/charge")
        .json(&json!({
            "account_id": harness.account_id().to_string(),
            "turn_id": "turn-1",
            "kind": "user_send"
        }))
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn concurrent_retries_charge_once() {
    let harness = funded(10).await;
    let request = json!({
        "account_id": harness.account_id().to_string(),
        "turn_id": "turn-race",
        "kind": "user_send",
        "amount": 3
    });

    let responses = futures::future::join_all(
        (0..8).map(|_| {
            harness
                .service_post("/v1/usage/charge")
                .json(&request)
                .into_future()
        }),
    )
    .await;

    let charged = responses
        .iter()
        .filter(|r| r.json::<serde_json::Value>()["charged"] == true)
        .count();
    assert_eq!(charged, 1);
    assert_eq!(harness.balance(&harness.account_id()), 7);
}

// ============================================================================
// Check
// ============================================================================

#[tokio::test]
async fn check_reports_affordability_without_charging() {
    let harness = funded(3).await;

    let response = harness
        .service_post("/v1/usage/check")
        .json(&json!({
            "account_id": harness.account_id().to_string(),
            "amount": 3
        }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["allowed"], true);

    let response = harness
        .service_post("/v1/usage/check")
        .json(&json!({
            "account_id": harness.account_id().to_string(),
            "kind": "image_surcharge"
        }))
        .await;
    let body: serde_json::Value = response.json();
    assert_eq!(body["allowed"], false);
    assert_eq!(body["required"], harness.config.usage_pricing.image_surcharge);

    assert_eq!(harness.balance(&harness.account_id()), 3);
}

#[tokio::test]
async fn check_requires_amount_or_kind() {
    let harness = funded(3).await;

    harness
        .service_post("/v1/usage/check")
        .json(&json!({ "account_id": harness.account_id().to_string() }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}
