//! API callers: registered clients, the server keypair and bearer sessions.

use std::fmt::Write as _;

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::ids::ApiClientId;

/// Number of random bytes in a generated API key.
const API_KEY_BYTES: usize = 32;

/// A registered API consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiClient {
    /// Client identifier.
    pub id: ApiClientId,
    /// Display name.
    pub name: String,
    /// Secret sent in the `X-Api-Key` header.
    pub api_key: String,
    /// IPs allowed to use the key; empty means any.
    pub allowed_ips: Vec<String>,
    /// PEM public key used to verify `X-Signature` headers.
    pub public_key_pem: Option<String>,
    /// Inactive clients are rejected.
    pub active: bool,
    /// Registration time.
    pub created_at: DateTime<Utc>,
}

impl ApiClient {
    /// Register a client with a freshly generated API key.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ApiClientId::generate(),
            name: name.into(),
            api_key: generate_api_key(),
            allowed_ips: Vec::new(),
            public_key_pem: None,
            active: true,
            created_at: Utc::now(),
        }
    }

    /// Parse a comma-separated allowlist (`"10.0.0.1, 10.0.0.2"`).
    #[must_use]
    pub fn parse_allowed_ips(list: &str) -> Vec<String> {
        list.split(',')
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Whether `ip` may use this client's key.
    #[must_use]
    pub fn allows_ip(&self, ip: &str) -> bool {
        self.allowed_ips.is_empty() || self.allowed_ips.iter().any(|allowed| allowed == ip)
    }
}

/// Generate a 64-character hex API key.
#[must_use]
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; API_KEY_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().fold(String::with_capacity(API_KEY_BYTES * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

/// The server-held keypair used for payload encryption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemKey {
    /// Key name.
    pub name: String,
    /// PEM private key (PKCS#8 or PKCS#1).
    pub private_key_pem: String,
    /// PEM public key handed to clients.
    pub public_key_pem: String,
    /// Only the active key is used.
    pub active: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A bearer-token session issued by the identity service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque bearer token.
    pub token: String,
    /// Identity the token belongs to.
    pub user_id: String,
    /// Expiry.
    pub expires_at: DateTime<Utc>,
    /// Revoked sessions are inactive.
    pub active: bool,
}

impl Session {
    /// Whether the session can authenticate a request at `now`.
    #[must_use]
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at > now
    }

    /// Push the expiry to `now + extension`, never shortening it.
    pub fn extend(&mut self, now: DateTime<Utc>, extension: Duration) {
        let candidate = now + extension;
        if candidate > self.expires_at {
            self.expires_at = candidate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_are_hex() {
        let key = generate_api_key();
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(key, generate_api_key());
    }

    #[test]
    fn ip_allowlist() {
        let mut client = ApiClient::new("partner");
        assert!(client.allows_ip("1.2.3.4"));
        client.allowed_ips = ApiClient::parse_allowed_ips("10.0.0.1, 10.0.0.2,");
        assert_eq!(client.allowed_ips.len(), 2);
        assert!(client.allows_ip("10.0.0.2"));
        assert!(!client.allows_ip("1.2.3.4"));
    }

    #[test]
    fn sessions_extend_forward_only() {
        let now = Utc::now();
        let mut session = Session {
            token: "t".into(),
            user_id: "u".into(),
            expires_at: now + Duration::minutes(60),
            active: true,
        };
        session.extend(now, Duration::minutes(30));
        assert_eq!(session.expires_at, now + Duration::minutes(60));
        session.extend(now, Duration::minutes(90));
        assert_eq!(session.expires_at, now + Duration::minutes(90));
        assert!(session.is_valid(now));
        assert!(!session.is_valid(now + Duration::minutes(91)));
    }
}
