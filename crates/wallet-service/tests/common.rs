//! Common test utilities for wallet integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;

use axum::extract::connect_info::MockConnectInfo;
use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use axum_test::{TestRequest, TestServer};
use rust_decimal::Decimal;
use serde_json::{json, Value};

use wallet_core::ApiClient;
use wallet_service::{create_router, AppState, PaymentGateway, ServiceConfig};
use wallet_store::{MemoryStore, Store};

/// Admin key configured on every harness.
pub const ADMIN_KEY: &str = "test-admin-key";

/// IP every harness request claims through `X-Forwarded-For`.
pub const CLIENT_IP: &str = "10.0.0.1";

/// Socket address every harness request arrives from. Trusted as a proxy by
/// [`test_config`].
pub const PROXY_ADDR: ([u8; 4], u16) = ([127, 0, 0, 1], 4000);

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The state behind the server.
    pub state: AppState,
    /// The in-memory store behind the state.
    pub store: Arc<MemoryStore>,
    /// An active API client with no IP or signature restrictions.
    pub client: ApiClient,
}

impl TestHarness {
    /// Create a new test harness with a fresh store.
    pub fn new() -> Self {
        Self::build(test_config(), None)
    }

    /// Create a harness with a custom configuration.
    pub fn with_config(config: ServiceConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a harness whose payouts go to `gateway`.
    pub fn with_gateway(gateway: Arc<dyn PaymentGateway>) -> Self {
        Self::build(test_config(), Some(gateway))
    }

    fn build(config: ServiceConfig, gateway: Option<Arc<dyn PaymentGateway>>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let mut state = AppState::new(Arc::clone(&store) as Arc<dyn Store>, config);
        if let Some(gateway) = gateway {
            state = state.with_payment_gateway(gateway);
        }
        state
            .seed_rule_profiles()
            .expect("Failed to seed rule profiles");

        let client = ApiClient::new("test-client");
        store
            .put_api_client(&client)
            .expect("Failed to store API client");

        let router: Router =
            create_router(state.clone()).layer(MockConnectInfo(SocketAddr::from(PROXY_ADDR)));
        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            state,
            store,
            client,
        }
    }

    /// Attach the client's API key and IP.
    pub fn authed(&self, request: TestRequest) -> TestRequest {
        request
            .add_header(header("x-api-key"), value(&self.client.api_key))
            .add_header(header("x-forwarded-for"), value(CLIENT_IP))
    }

    /// Attach the admin key.
    pub fn admin(&self, request: TestRequest) -> TestRequest {
        request
            .add_header(header("x-admin-key"), value(ADMIN_KEY))
            .add_header(header("x-forwarded-for"), value(CLIENT_IP))
    }

    /// Authenticated GET.
    pub fn get(&self, path: &str) -> TestRequest {
        self.authed(self.server.get(path))
    }

    /// Authenticated POST.
    pub fn post(&self, path: &str) -> TestRequest {
        self.authed(self.server.post(path))
    }

    /// Create an account and return its id.
    pub async fn create_account(&self, funding_target: &str) -> String {
        let response = self
            .post("/v1/accounts")
            .json(&json!({ "funding_target": funding_target }))
            .await;
        response.assert_status(axum::http::StatusCode::CREATED);
        let body: Value = response.json();
        body["data"]["id"].as_str().unwrap().to_string()
    }

    /// Initiate and approve a topup.
    pub async fn fund(&self, account_id: &str, amount: &str, reference: &str) {
        self.post("/v1/topups")
            .json(&json!({
                "account_id": account_id,
                "amount": amount,
                "reference": reference,
            }))
            .await
            .assert_status(axum::http::StatusCode::CREATED);
        self.post(&format!("/v1/topups/{reference}/approve"))
            .json(&json!({ "receipt": format!("RCPT-{reference}") }))
            .await
            .assert_status_ok();
    }

    /// The account's balances as `(current, available, reserved, uncleared)`.
    pub async fn balances(&self, account_id: &str) -> (Decimal, Decimal, Decimal, Decimal) {
        let response = self.get(&format!("/v1/accounts/{account_id}")).await;
        response.assert_status_ok();
        let body: Value = response.json();
        let data = &body["data"];
        (
            decimal(&data["current"]),
            decimal(&data["available"]),
            decimal(&data["reserved"]),
            decimal(&data["uncleared"]),
        )
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration used by every harness.
pub fn test_config() -> ServiceConfig {
    ServiceConfig {
        listen_addr: "127.0.0.1:0".into(),
        data_dir: String::new(),
        admin_api_key: Some(ADMIN_KEY.into()),
        seed_rule_profiles: true,
        trusted_proxies: vec![IpAddr::from(PROXY_ADDR.0)],
        ..ServiceConfig::default()
    }
}

/// A static header name.
pub fn header(name: &'static str) -> HeaderName {
    HeaderName::from_static(name)
}

/// A header value.
pub fn value(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap()
}

/// Parse a decimal rendered as a JSON string or number.
pub fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).unwrap(),
        other => Decimal::from_str(&other.to_string()).unwrap(),
    }
}
