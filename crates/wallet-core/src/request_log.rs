//! Per-request audit records written by the gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::RequestId;

/// Longest response body kept on a request log.
pub const MAX_LOGGED_RESPONSE_CHARS: usize = 2000;

/// What the gateway saw and answered for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestLog {
    /// Request identifier.
    pub request_id: RequestId,
    /// Authenticated API client name.
    pub api_client: Option<String>,
    /// Authenticated user.
    pub user: Option<String>,
    /// Whether a bearer session was resolved.
    pub is_authenticated: bool,
    /// Client IP.
    pub ip_address: String,
    /// `User-Agent` header.
    pub user_agent: Option<String>,
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Request body (JSON when parseable, otherwise a string).
    pub request_data: serde_json::Value,
    /// Matched route template.
    pub view_name: Option<String>,
    /// Error category when the request failed.
    pub exception_type: Option<String>,
    /// Error message when the request failed.
    pub exception_message: Option<String>,
    /// Arrival time.
    pub started_at: DateTime<Utc>,
    /// Completion time.
    pub ended_at: DateTime<Utc>,
    /// Duration in milliseconds.
    pub time_taken_ms: i64,
    /// Response status code.
    pub response_status: u16,
    /// Response body, truncated to [`MAX_LOGGED_RESPONSE_CHARS`].
    pub response_data: String,
}

/// Truncate a body to [`MAX_LOGGED_RESPONSE_CHARS`] characters.
#[must_use]
pub fn truncate_body(body: &str) -> String {
    body.chars().take(MAX_LOGGED_RESPONSE_CHARS).collect()
}
