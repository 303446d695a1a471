//! Service configuration.

use serde::Deserialize;
use std::net::IpAddr;
use std::path::Path;
use wallet_core::DEFAULT_CURRENCY;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to `RocksDB` data directory (default: "/data/wallet").
    pub data_dir: String,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Currency of newly created accounts.
    pub default_currency: String,

    /// How far each authenticated call pushes a session's expiry.
    pub session_extension_minutes: i64,

    /// Seed the standard rule profiles when the store has none.
    pub seed_rule_profiles: bool,

    /// Seconds between reconciliation passes.
    pub reconcile_interval_seconds: u64,

    /// Only Pending transactions younger than this are polled.
    pub reconcile_ttl_minutes: i64,

    /// Payment gateway base URL (optional).
    pub payment_gateway_url: Option<String>,

    /// Payment gateway consumer key (optional).
    pub payment_gateway_client_id: Option<String>,

    /// Payment gateway consumer secret (optional).
    pub payment_gateway_client_secret: Option<String>,

    /// Shared secret for provider callback signatures (optional).
    pub payment_callback_secret: Option<String>,

    /// Public URL the provider posts payment results to (optional).
    pub payment_callback_url: Option<String>,

    /// Key required in `X-Admin-Key` for `/v1/admin` routes.
    pub admin_api_key: Option<String>,

    /// Peers whose `X-Forwarded-For` header is believed. Empty means the
    /// socket address is always the client IP.
    pub trusted_proxies: Vec<IpAddr>,
}

/// Payment gateway secrets file structure.
#[derive(Debug, Deserialize)]
struct PaymentGatewaySecrets {
    base_url: String,
    client_id: String,
    client_secret: String,
    #[serde(default)]
    callback_secret: Option<String>,
}

/// Payment gateway settings, whichever source they came from.
struct PaymentGatewaySettings {
    base_url: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    callback_secret: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        // Secrets file first, then env vars
        let gateway = load_payment_gateway_secrets();

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "/data/wallet".into()),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_parse("MAX_BODY_BYTES").unwrap_or(1024 * 1024), // 1MB
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS").unwrap_or(30),
            default_currency: std::env::var("DEFAULT_CURRENCY")
                .unwrap_or_else(|_| DEFAULT_CURRENCY.into()),
            session_extension_minutes: env_parse("SESSION_EXTENSION_MINUTES").unwrap_or(30),
            seed_rule_profiles: env_parse("SEED_RULE_PROFILES").unwrap_or(true),
            reconcile_interval_seconds: env_parse("RECONCILE_INTERVAL_SECONDS").unwrap_or(60),
            reconcile_ttl_minutes: env_parse("RECONCILE_TTL_MINUTES").unwrap_or(10),
            payment_gateway_url: gateway.base_url,
            payment_gateway_client_id: gateway.client_id,
            payment_gateway_client_secret: gateway.client_secret,
            payment_callback_secret: gateway.callback_secret,
            payment_callback_url: std::env::var("PAYMENT_CALLBACK_URL").ok(),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok(),
            trusted_proxies: std::env::var("TRUSTED_PROXIES")
                .map(|raw| parse_ip_list(&raw))
                .unwrap_or_default(),
        }
    }
}

/// Comma-separated IP addresses; unparseable entries are skipped.
fn parse_ip_list(raw: &str) -> Vec<IpAddr> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match entry.parse() {
            Ok(ip) => Some(ip),
            Err(_) => {
                tracing::warn!(entry, "Ignoring invalid TRUSTED_PROXIES entry");
                None
            }
        })
        .collect()
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

/// Load payment gateway secrets from file or environment.
fn load_payment_gateway_secrets() -> PaymentGatewaySettings {
    let secret_paths = [
        ".secrets/payment_gateway.json",
        "wallet/.secrets/payment_gateway.json",
        "wallet/service/.secrets/payment_gateway.json",
        "../.secrets/payment_gateway.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<PaymentGatewaySecrets>(path) {
            tracing::info!(path = %path, "Loaded payment gateway secrets from file");
            return PaymentGatewaySettings {
                base_url: Some(secrets.base_url),
                client_id: Some(secrets.client_id),
                client_secret: Some(secrets.client_secret),
                callback_secret: secrets.callback_secret,
            };
        }
    }

    tracing::debug!("Payment gateway secrets file not found, using environment variables");
    PaymentGatewaySettings {
        base_url: std::env::var("PAYMENT_GATEWAY_URL").ok(),
        client_id: std::env::var("PAYMENT_GATEWAY_CLIENT_ID").ok(),
        client_secret: std::env::var("PAYMENT_GATEWAY_CLIENT_SECRET").ok(),
        callback_secret: std::env::var("PAYMENT_CALLBACK_SECRET").ok(),
    }
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/wallet".into(),
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            default_currency: DEFAULT_CURRENCY.into(),
            session_extension_minutes: 30,
            seed_rule_profiles: true,
            reconcile_interval_seconds: 60,
            reconcile_ttl_minutes: 10,
            payment_gateway_url: None,
            payment_gateway_client_id: None,
            payment_gateway_client_secret: None,
            payment_callback_secret: None,
            payment_callback_url: None,
            admin_api_key: None,
            trusted_proxies: Vec::new(),
        }
    }
}
