//! Payment provider callback tests.

mod common;

use axum::body::Bytes;
use axum::http::StatusCode;
use common::{header, test_config, value, TestHarness};
use hmac::{Hmac, Mac};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use sha2::Sha256;

use wallet_core::TransactionStatus;
use wallet_service::ServiceConfig;
use wallet_store::Store;

const SECRET: &str = "callback-secret";

fn signed_config() -> ServiceConfig {
    ServiceConfig {
        payment_callback_secret: Some(SECRET.into()),
        ..test_config()
    }
}

fn sign(body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// A harness with a funded account and a Pending payment `PAY-1` of 300.
async fn pending_payment(config: ServiceConfig) -> (TestHarness, String) {
    let harness = TestHarness::with_config(config);
    let account_id = harness.create_account("merchant-cb").await;
    harness.fund(&account_id, "1000", "FUND-1").await;
    harness
        .post("/v1/payments")
        .json(&json!({ "account_id": account_id, "amount": "300", "reference": "PAY-1" }))
        .await
        .assert_status(StatusCode::CREATED);
    (harness, account_id)
}

async fn post_callback(harness: &TestHarness, payload: &Value) -> axum_test::TestResponse {
    let body = serde_json::to_vec(payload).unwrap();
    harness
        .server
        .post("/v1/callbacks/payments")
        .add_header(header("x-callback-signature"), value(&sign(&body)))
        .content_type("application/json")
        .bytes(Bytes::from(body))
        .await
}

fn status_of(harness: &TestHarness, reference: &str) -> TransactionStatus {
    harness
        .store
        .get_transaction_by_reference(reference)
        .unwrap()
        .unwrap()
        .status
}

#[tokio::test]
async fn confirmed_transfer_approves_the_payment() {
    let (harness, account_id) = pending_payment(signed_config()).await;

    let response = post_callback(
        &harness,
        &json!({
            "ResultCode": 0,
            "ResultDesc": "The service request is processed successfully.",
            "OriginatorReference": "PAY-1",
            "TransactionID": "QK81ABC",
        }),
    )
    .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["message"], "Callback processed");
    assert_eq!(body["data"]["status"], "Completed");
    assert_eq!(body["data"]["receipt_id"], "QK81ABC");

    let balances = harness.balances(&account_id).await;
    assert_eq!(balances, (dec!(700), dec!(700), dec!(0), dec!(0)));
}

#[tokio::test]
async fn failed_transfer_rejects_the_payment() {
    let (harness, account_id) = pending_payment(signed_config()).await;

    let response = post_callback(
        &harness,
        &json!({
            "ResultCode": "2001",
            "ResultDesc": "The initiator information is invalid.",
            "OriginatorReference": "PAY-1",
        }),
    )
    .await;

    response.assert_status_ok();
    assert_eq!(status_of(&harness, "PAY-1"), TransactionStatus::Failed);
    let balances = harness.balances(&account_id).await;
    assert_eq!(balances, (dec!(1000), dec!(1000), dec!(0), dec!(0)));
}

#[tokio::test]
async fn accepted_but_unfinished_transfer_is_acknowledged() {
    let (harness, _) = pending_payment(signed_config()).await;

    let response = post_callback(
        &harness,
        &json!({
            "ResultCode": 0,
            "ResultDesc": "Accept the service request.",
            "OriginatorReference": "PAY-1",
        }),
    )
    .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["message"], "Callback acknowledged");
    assert_eq!(status_of(&harness, "PAY-1"), TransactionStatus::Pending);
}

#[tokio::test]
async fn confirmed_transfer_needs_a_receipt() {
    let (harness, _) = pending_payment(signed_config()).await;

    let response = post_callback(
        &harness,
        &json!({
            "ResultCode": 0,
            "ResultDesc": "Processed successfully",
            "OriginatorReference": "PAY-1",
        }),
    )
    .await;

    response.assert_status_bad_request();
    assert_eq!(status_of(&harness, "PAY-1"), TransactionStatus::Pending);
}

#[tokio::test]
async fn repeated_callbacks_settle_once() {
    let (harness, account_id) = pending_payment(signed_config()).await;
    let payload = json!({
        "ResultCode": 0,
        "ResultDesc": "Processed successfully",
        "OriginatorReference": "PAY-1",
        "TransactionID": "QK81DEF",
    });

    post_callback(&harness, &payload).await.assert_status_ok();
    let response = post_callback(&harness, &payload).await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["message"], "Transaction already settled");
    let balances = harness.balances(&account_id).await;
    assert_eq!(balances, (dec!(700), dec!(700), dec!(0), dec!(0)));
}

#[tokio::test]
async fn unsigned_or_forged_callbacks_are_refused() {
    let (harness, _) = pending_payment(signed_config()).await;
    let payload = json!({
        "ResultCode": 0,
        "ResultDesc": "Processed successfully",
        "OriginatorReference": "PAY-1",
        "TransactionID": "QK81GHI",
    });

    harness
        .server
        .post("/v1/callbacks/payments")
        .json(&payload)
        .await
        .assert_status_unauthorized();

    harness
        .server
        .post("/v1/callbacks/payments")
        .add_header(header("x-callback-signature"), value(&"0".repeat(64)))
        .json(&payload)
        .await
        .assert_status_unauthorized();

    assert_eq!(status_of(&harness, "PAY-1"), TransactionStatus::Pending);
}

#[tokio::test]
async fn unsigned_callbacks_are_accepted_without_a_secret() {
    let (harness, _) = pending_payment(test_config()).await;

    harness
        .server
        .post("/v1/callbacks/payments")
        .json(&json!({
            "ResultCode": 0,
            "ResultDesc": "Processed successfully",
            "OriginatorReference": "PAY-1",
            "TransactionID": "QK81JKL",
        }))
        .await
        .assert_status_ok();

    assert_eq!(status_of(&harness, "PAY-1"), TransactionStatus::Completed);
}

#[tokio::test]
async fn callbacks_for_unknown_references_are_not_found() {
    let (harness, _) = pending_payment(signed_config()).await;

    let response = post_callback(
        &harness,
        &json!({ "ResultCode": 1, "OriginatorReference": "NOPE" }),
    )
    .await;
    response.assert_status_not_found();

    post_callback(&harness, &json!({ "ResultCode": 1 }))
        .await
        .assert_status_bad_request();
}
