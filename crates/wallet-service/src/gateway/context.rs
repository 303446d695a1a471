//! Per-request caller context.

use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;
use wallet_core::{ApiClient, RequestId};

/// Path prefixes that skip API-key validation.
///
/// Callbacks authenticate with their own signature; admin routes with the
/// admin key.
pub const EXEMPT_PREFIXES: &[&str] = &[
    "/console",
    "/health",
    "/static",
    "/media",
    "/__debug__",
    "/favicon.ico",
    "/v1/callbacks",
    "/v1/admin",
];

/// Who is calling, as established by the gateway.
///
/// Inserted as a request extension before the handler runs.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Request identifier, also stored on the request log.
    pub request_id: RequestId,
    /// The validated API client, unless the path is exempt.
    pub api_client: Option<ApiClient>,
    /// User resolved from a bearer session.
    pub user: Option<String>,
    /// Client IP.
    pub ip: String,
    /// Whether the payload travels encrypted.
    pub encrypted: bool,
}

impl RequestContext {
    /// Whether a bearer session was resolved.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

/// Whether `path` skips API-key validation.
#[must_use]
pub fn is_exempt(path: &str) -> bool {
    EXEMPT_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

/// The caller's IP.
///
/// The first `X-Forwarded-For` entry counts only when the peer is one of
/// `trusted_proxies`; otherwise the peer address is the client.
#[must_use]
pub fn client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted_proxies: &[IpAddr],
) -> String {
    let Some(peer) = peer.map(|addr| addr.ip()) else {
        return "unknown".to_string();
    };
    if !trusted_proxies.contains(&peer) {
        return peer.to_string();
    }

    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map_or_else(|| peer.to_string(), str::to_string)
}

/// Token of an `Authorization: Bearer` header.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
