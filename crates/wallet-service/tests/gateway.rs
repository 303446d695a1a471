//! Request gateway integration tests.

mod common;

use axum::body::Bytes;
use axum::http::StatusCode;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{Duration, Utc};
use common::{header, test_config, value, TestHarness, ADMIN_KEY, CLIENT_IP};
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, Pss, RsaPrivateKey, RsaPublicKey};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use wallet_core::{ApiClient, Session, SystemKey};
use wallet_service::ServiceConfig;
use wallet_store::Store;

fn keypair() -> (RsaPrivateKey, RsaPublicKey) {
    let private = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
    let public = RsaPublicKey::from(&private);
    (private, public)
}

fn public_pem(key: &RsaPublicKey) -> String {
    key.to_public_key_pem(LineEnding::LF).unwrap()
}

fn sign(key: &RsaPrivateKey, body: &[u8]) -> String {
    let hashed = Sha256::digest(body);
    let signature = key
        .sign_with_rng(&mut rand::thread_rng(), Pss::new::<Sha256>(), &hashed)
        .unwrap();
    STANDARD.encode(signature)
}

fn encrypt(key: &RsaPublicKey, plaintext: &[u8]) -> String {
    let mut rng = rand::thread_rng();
    let block = key.size() - 2 * 32 - 2;
    let mut ciphertext = Vec::new();
    for chunk in plaintext.chunks(block) {
        ciphertext.extend(key.encrypt(&mut rng, Oaep::new::<Sha256>(), chunk).unwrap());
    }
    STANDARD.encode(ciphertext)
}

fn decrypt(key: &RsaPrivateKey, encoded: &str) -> Vec<u8> {
    let ciphertext = STANDARD.decode(encoded).unwrap();
    ciphertext
        .chunks(key.size())
        .flat_map(|block| key.decrypt(Oaep::new::<Sha256>(), block).unwrap())
        .collect()
}

// ============================================================================
// API Keys
// ============================================================================

#[tokio::test]
async fn missing_api_key_is_unauthorized() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get("/v1/transactions/ANY")
        .add_header(header("x-forwarded-for"), value(CLIENT_IP))
        .await;

    response.assert_status_unauthorized();
    let body: Value = response.json();
    assert_eq!(body["code"], "401.001");
    assert_eq!(body["message"], "Missing API key");
}

#[tokio::test]
async fn unknown_or_inactive_api_key_is_unauthorized() {
    let harness = TestHarness::new();
    let mut inactive = ApiClient::new("retired");
    inactive.active = false;
    harness.store.put_api_client(&inactive).unwrap();

    for key in ["not-a-key", inactive.api_key.as_str()] {
        let response = harness
            .server
            .get("/v1/transactions/ANY")
            .add_header(header("x-api-key"), value(key))
            .await;
        response.assert_status_unauthorized();
        let body: Value = response.json();
        assert_eq!(body["message"], "Invalid API key");
    }
}

#[tokio::test]
async fn ip_outside_the_allowlist_is_forbidden() {
    let harness = TestHarness::new();
    let mut client = ApiClient::new("locked");
    client.allowed_ips = ApiClient::parse_allowed_ips("192.168.0.1, 192.168.0.2");
    harness.store.put_api_client(&client).unwrap();

    let response = harness
        .server
        .get("/v1/transactions/ANY")
        .add_header(header("x-api-key"), value(&client.api_key))
        .add_header(header("x-forwarded-for"), value("10.9.9.9"))
        .await;
    response.assert_status_forbidden();
    let body: Value = response.json();
    assert_eq!(body["message"], "IP address not allowed");

    let response = harness
        .server
        .get("/v1/transactions/ANY")
        .add_header(header("x-api-key"), value(&client.api_key))
        .add_header(header("x-forwarded-for"), value("192.168.0.2, 10.0.0.1"))
        .await;
    response.assert_status_not_found();
}

#[tokio::test]
async fn forwarded_for_from_an_untrusted_peer_is_ignored() {
    let harness = TestHarness::with_config(ServiceConfig {
        trusted_proxies: Vec::new(),
        ..test_config()
    });
    let mut client = ApiClient::new("behind-proxy");
    client.allowed_ips = ApiClient::parse_allowed_ips(CLIENT_IP);
    harness.store.put_api_client(&client).unwrap();

    let spoofed = harness
        .server
        .get("/v1/transactions/ANY")
        .add_header(header("x-api-key"), value(&client.api_key))
        .add_header(header("x-forwarded-for"), value(CLIENT_IP))
        .await;
    spoofed.assert_status_forbidden();

    client.allowed_ips = ApiClient::parse_allowed_ips("127.0.0.1");
    harness.store.put_api_client(&client).unwrap();
    let direct = harness
        .server
        .get("/v1/transactions/ANY")
        .add_header(header("x-api-key"), value(&client.api_key))
        .add_header(header("x-forwarded-for"), value(CLIENT_IP))
        .await;
    direct.assert_status_not_found();
}

#[tokio::test]
async fn health_is_exempt() {
    let harness = TestHarness::new();

    let response = harness.server.get("/health").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn admin_routes_require_the_admin_key() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/admin/api-clients")
        .json(&json!({ "name": "partner" }))
        .await;
    response.assert_status_unauthorized();

    let response = harness
        .server
        .post("/v1/admin/api-clients")
        .add_header(header("x-admin-key"), value("wrong"))
        .json(&json!({ "name": "partner" }))
        .await;
    response.assert_status_unauthorized();

    let response = harness
        .server
        .post("/v1/admin/api-clients")
        .add_header(header("x-admin-key"), value(ADMIN_KEY))
        .json(&json!({ "name": "partner", "allowed_ips": "10.0.0.1" }))
        .await;
    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    let api_key = body["data"]["api_key"].as_str().unwrap().to_string();
    assert_eq!(api_key.len(), 64);
    assert_eq!(body["data"]["allowed_ips"], json!(["10.0.0.1"]));

    harness
        .server
        .get("/v1/transactions/ANY")
        .add_header(header("x-api-key"), value(&api_key))
        .add_header(header("x-forwarded-for"), value(CLIENT_IP))
        .await
        .assert_status_not_found();
}

// ============================================================================
// Signatures
// ============================================================================

fn signed_client(harness: &TestHarness, public: Option<&RsaPublicKey>) -> ApiClient {
    let mut client = ApiClient::new("signer");
    client.public_key_pem = public.map(public_pem);
    harness.store.put_api_client(&client).unwrap();
    client
}

#[tokio::test]
async fn valid_signature_is_accepted() {
    let harness = TestHarness::new();
    let (private, public) = keypair();
    let client = signed_client(&harness, Some(&public));
    let body = serde_json::to_vec(&json!({ "funding_target": "merchant-1" })).unwrap();

    let response = harness
        .server
        .post("/v1/accounts")
        .add_header(header("x-api-key"), value(&client.api_key))
        .add_header(header("x-signature"), value(&sign(&private, &body)))
        .content_type("application/json")
        .bytes(Bytes::from(body))
        .await;

    response.assert_status(StatusCode::CREATED);
}

#[tokio::test]
async fn tampered_body_fails_verification() {
    let harness = TestHarness::new();
    let (private, public) = keypair();
    let client = signed_client(&harness, Some(&public));
    let signature = sign(&private, br#"{"funding_target":"merchant-1"}"#);

    let response = harness
        .server
        .post("/v1/accounts")
        .add_header(header("x-api-key"), value(&client.api_key))
        .add_header(header("x-signature"), value(&signature))
        .json(&json!({ "funding_target": "merchant-2" }))
        .await;

    response.assert_status_unauthorized();
    let body: Value = response.json();
    assert_eq!(body["code"], "401.003");
    assert_eq!(body["message"], "Invalid signature");
}

#[tokio::test]
async fn signature_without_a_client_key_is_a_server_error() {
    let harness = TestHarness::new();
    let (private, _) = keypair();
    let client = signed_client(&harness, None);
    let body = serde_json::to_vec(&json!({ "funding_target": "merchant-1" })).unwrap();

    let response = harness
        .server
        .post("/v1/accounts")
        .add_header(header("x-api-key"), value(&client.api_key))
        .add_header(header("x-signature"), value(&sign(&private, &body)))
        .content_type("application/json")
        .bytes(Bytes::from(body))
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert_eq!(body["message"], "Client public key not configured");
}

#[tokio::test]
async fn signature_on_an_exempt_path_needs_a_client() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get("/health")
        .add_header(header("x-signature"), value("c2ln"))
        .await;

    response.assert_status_forbidden();
    let body: Value = response.json();
    assert_eq!(
        body["message"],
        "Client context missing for signature verification"
    );
}

// ============================================================================
// Payload Encryption
// ============================================================================

fn install_system_key(harness: &TestHarness) -> (RsaPrivateKey, RsaPublicKey) {
    let (private, public) = keypair();
    harness
        .store
        .put_system_key(&SystemKey {
            name: "primary".into(),
            private_key_pem: private.to_pkcs8_pem(LineEnding::LF).unwrap().to_string(),
            public_key_pem: public_pem(&public),
            active: true,
            created_at: Utc::now(),
        })
        .unwrap();
    (private, public)
}

#[tokio::test]
async fn encrypted_request_and_response() {
    let harness = TestHarness::new();
    let (private, public) = install_system_key(&harness);
    let plaintext = serde_json::to_vec(&json!({ "funding_target": "merchant-enc" })).unwrap();

    let response = harness
        .post("/v1/accounts")
        .add_header(header("x-encrypted"), value("1"))
        .content_type("application/json")
        .bytes(Bytes::from(encrypt(&public, &plaintext)))
        .await;

    response.assert_status(StatusCode::CREATED);
    let encoded: String = response.json();
    let body: Value = serde_json::from_slice(&decrypt(&private, &encoded)).unwrap();
    assert_eq!(body["data"]["funding_target"], "merchant-enc");
}

#[tokio::test]
async fn undecryptable_body_is_passed_through() {
    let harness = TestHarness::new();
    let (private, _) = install_system_key(&harness);

    let response = harness
        .post("/v1/accounts")
        .add_header(header("x-encrypted"), value("1"))
        .json(&json!({ "funding_target": "merchant-plain" }))
        .await;

    response.assert_status(StatusCode::CREATED);
    let encoded: String = response.json();
    let body: Value = serde_json::from_slice(&decrypt(&private, &encoded)).unwrap();
    assert_eq!(body["data"]["funding_target"], "merchant-plain");
}

#[tokio::test]
async fn without_a_system_key_responses_stay_plaintext() {
    let harness = TestHarness::new();

    let response = harness
        .post("/v1/accounts")
        .add_header(header("x-encrypted"), value("1"))
        .json(&json!({ "funding_target": "merchant-1" }))
        .await;

    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    assert_eq!(body["data"]["funding_target"], "merchant-1");
}

// ============================================================================
// Sessions and Request Logs
// ============================================================================

#[tokio::test]
async fn bearer_session_is_resolved_and_extended() {
    let harness = TestHarness::new();
    let expires_at = Utc::now() + Duration::minutes(1);
    harness
        .store
        .put_session(&Session {
            token: "tok-1".into(),
            user_id: "user-42".into(),
            expires_at,
            active: true,
        })
        .unwrap();

    harness
        .get("/v1/transactions/ANY")
        .add_header(header("authorization"), value("Bearer tok-1"))
        .await
        .assert_status_not_found();

    let session = harness.store.get_session("tok-1").unwrap().unwrap();
    assert!(session.expires_at > expires_at + Duration::minutes(20));

    let logs = harness.store.list_request_logs(1).unwrap();
    assert_eq!(logs[0].user.as_deref(), Some("user-42"));
    assert!(logs[0].is_authenticated);
}

#[tokio::test]
async fn expired_session_is_ignored() {
    let harness = TestHarness::new();
    harness
        .store
        .put_session(&Session {
            token: "old".into(),
            user_id: "user-1".into(),
            expires_at: Utc::now() - Duration::minutes(1),
            active: true,
        })
        .unwrap();

    harness
        .get("/v1/transactions/ANY")
        .add_header(header("authorization"), value("Bearer old"))
        .await
        .assert_status_not_found();

    let logs = harness.store.list_request_logs(1).unwrap();
    assert!(logs[0].user.is_none());
    assert!(!logs[0].is_authenticated);
}

#[tokio::test]
async fn every_request_is_logged() {
    let harness = TestHarness::new();
    let account_id = harness.create_account("merchant-1").await;
    harness
        .get(&format!("/v1/accounts/{account_id}"))
        .add_header(header("user-agent"), value("wallet-tests"))
        .await
        .assert_status_ok();

    let logs = harness.store.list_request_logs(1).unwrap();
    let log = &logs[0];
    assert_eq!(log.method, "GET");
    assert_eq!(log.path, format!("/v1/accounts/{account_id}"));
    assert_eq!(log.view_name.as_deref(), Some("/v1/accounts/:account_id"));
    assert_eq!(log.api_client.as_deref(), Some("test-client"));
    assert_eq!(log.ip_address, CLIENT_IP);
    assert_eq!(log.user_agent.as_deref(), Some("wallet-tests"));
    assert_eq!(log.response_status, 200);
    assert!(log.exception_type.is_none());
    assert!(log.time_taken_ms >= 0);

    harness
        .server
        .post("/v1/accounts")
        .json(&json!({ "funding_target": "merchant-2" }))
        .await
        .assert_status_unauthorized();

    let logs = harness.store.list_request_logs(1).unwrap();
    let log = &logs[0];
    assert_eq!(log.response_status, 401);
    assert_eq!(log.exception_type.as_deref(), Some("MissingApiKey"));
    assert_eq!(log.exception_message.as_deref(), Some("Missing API key"));
    assert_eq!(log.request_data["funding_target"], "merchant-2");
    assert!(log.api_client.is_none());
}

#[tokio::test]
async fn admins_can_read_request_logs() {
    let harness = TestHarness::new();
    harness.create_account("merchant-1").await;

    let response = harness
        .admin(harness.server.get("/v1/admin/request-logs?limit=5"))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    let logs = body["data"].as_array().unwrap();
    assert!(!logs.is_empty());
    assert_eq!(logs[0]["path"], "/v1/accounts");
}
