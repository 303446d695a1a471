//! Rate limiting integration tests.

mod common;

use axum::http::StatusCode;
use common::{header, value, TestHarness};
use serde_json::{json, Value};

async fn install_rule(harness: &TestHarness, rule: Value) {
    harness
        .admin(harness.server.post("/v1/admin/rate-limit-rules"))
        .json(&rule)
        .await
        .assert_status(StatusCode::CREATED);
}

fn from_ip(harness: &TestHarness, path: &str, ip: &str) -> axum_test::TestRequest {
    harness
        .server
        .get(path)
        .add_header(header("x-api-key"), value(&harness.client.api_key))
        .add_header(header("x-forwarded-for"), value(ip))
}

#[tokio::test]
async fn requests_over_the_limit_are_refused() {
    let harness = TestHarness::new();
    install_rule(
        &harness,
        json!({
            "name": "transactions per ip",
            "scope": "ip",
            "limit": 3,
            "period": "day",
            "endpoint_pattern": "/v1/transactions",
            "http_methods": "GET",
            "block_duration_minutes": 5,
        }),
    )
    .await;

    for remaining in ["2", "1", "0"] {
        let response = from_ip(&harness, "/v1/transactions/ANY", "10.0.0.7").await;
        response.assert_status_not_found();
        assert_eq!(response.header("x-ratelimit-limit"), "3");
        assert_eq!(response.header("x-ratelimit-remaining"), remaining);
    }

    let response = from_ip(&harness, "/v1/transactions/ANY", "10.0.0.7").await;
    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.header("x-ratelimit-remaining"), "0");
    let retry_after: i64 = response
        .header("retry-after")
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after >= 5 * 60);
    let body: Value = response.json();
    assert_eq!(body["code"], "429.000");
    assert_eq!(body["message"], "Rate limit exceeded. Try again later.");

    // Blocked until the ban ends
    from_ip(&harness, "/v1/transactions/ANY", "10.0.0.7")
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);

    // Other addresses have their own counter
    from_ip(&harness, "/v1/transactions/ANY", "10.0.0.8")
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn rules_only_apply_to_matching_requests() {
    let harness = TestHarness::new();
    install_rule(
        &harness,
        json!({
            "name": "one payment",
            "scope": "api_client",
            "limit": 1,
            "period": "day",
            "endpoint_pattern": "/v1/payments",
            "http_methods": "POST",
        }),
    )
    .await;

    // Different path: no headers, no counting
    for _ in 0..3 {
        let response = harness.get("/v1/transactions/ANY").await;
        response.assert_status_not_found();
        assert!(response.headers().get("x-ratelimit-limit").is_none());
    }

    let payment = json!({ "account_id": "bogus", "amount": "10" });
    let response = harness.post("/v1/payments").json(&payment).await;
    assert_ne!(response.status_code(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.header("x-ratelimit-remaining"), "0");

    harness
        .post("/v1/payments")
        .json(&payment)
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn inactive_rules_are_ignored() {
    let harness = TestHarness::new();
    install_rule(
        &harness,
        json!({
            "name": "off",
            "scope": "global",
            "limit": 1,
            "period": "day",
            "active": false,
        }),
    )
    .await;

    for _ in 0..3 {
        harness
            .get("/v1/transactions/ANY")
            .await
            .assert_status_not_found();
    }
}

#[tokio::test]
async fn invalid_rules_are_rejected() {
    let harness = TestHarness::new();

    harness
        .admin(harness.server.post("/v1/admin/rate-limit-rules"))
        .json(&json!({ "name": "zero", "scope": "ip", "limit": 0, "period": "minute" }))
        .await
        .assert_status_bad_request();

    harness
        .admin(harness.server.post("/v1/admin/rate-limit-rules"))
        .json(&json!({
            "name": "bad pattern",
            "scope": "ip",
            "limit": 5,
            "period": "minute",
            "endpoint_pattern": "(",
        }))
        .await
        .assert_status_bad_request();
}
