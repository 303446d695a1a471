//! Rate-limit rules, window arithmetic and decisions.
//!
//! Counting and blocking state lives in the store; this module holds the
//! pure parts: which rules apply to a request, which key a rule counts under,
//! where a window starts, and how per-rule results fold into one decision.

use std::fmt;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::ids::RuleId;

/// What a rule counts requests by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitScope {
    /// One counter for everything.
    Global,
    /// Per API client.
    ApiClient,
    /// Per authenticated user.
    User,
    /// Per client IP address.
    Ip,
    /// Per endpoint path.
    Endpoint,
    /// Per user and endpoint.
    UserEndpoint,
    /// Per IP and endpoint.
    IpEndpoint,
    /// Per API client and endpoint.
    ApiClientEndpoint,
}

/// Window unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatePeriod {
    /// One second.
    Second,
    /// One minute.
    Minute,
    /// One hour.
    Hour,
    /// One day.
    Day,
    /// Seven days.
    Week,
    /// Thirty days.
    Month,
}

impl RatePeriod {
    /// Length of one unit in seconds.
    #[must_use]
    pub const fn seconds(self) -> i64 {
        match self {
            Self::Second => 1,
            Self::Minute => 60,
            Self::Hour => 3_600,
            Self::Day => 86_400,
            Self::Week => 604_800,
            Self::Month => 2_592_000,
        }
    }
}

/// Who is making a request, as seen by the rate limiter.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitSubject<'a> {
    /// Authenticated API client id.
    pub api_client: Option<&'a str>,
    /// Authenticated user id.
    pub user: Option<&'a str>,
    /// Client IP address.
    pub ip: &'a str,
    /// Request path.
    pub endpoint: &'a str,
    /// HTTP method.
    pub method: &'a str,
}

/// An admin-configured limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Rule identifier.
    pub id: RuleId,
    /// Display name.
    pub name: String,
    /// Counting scope.
    pub scope: RateLimitScope,
    /// Requests allowed per window.
    pub limit: u32,
    /// Window unit.
    pub period: RatePeriod,
    /// Number of units per window.
    pub period_count: u32,
    /// Regex matched against the start of the request path.
    pub endpoint_pattern: Option<String>,
    /// Upper-case methods the rule applies to; empty means all.
    pub http_methods: Vec<String>,
    /// Higher priorities are evaluated first.
    pub priority: i32,
    /// Minimum ban length once the limit is exceeded.
    pub block_duration_minutes: u32,
    /// Inactive rules are ignored.
    pub active: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl RateLimitRule {
    /// An active rule with no endpoint filter and no block duration.
    #[must_use]
    pub fn new(name: impl Into<String>, scope: RateLimitScope, limit: u32, period: RatePeriod) -> Self {
        Self {
            id: RuleId::generate(),
            name: name.into(),
            scope,
            limit,
            period,
            period_count: 1,
            endpoint_pattern: None,
            http_methods: Vec::new(),
            priority: 0,
            block_duration_minutes: 0,
            active: true,
            created_at: Utc::now(),
        }
    }

    /// Parse a comma-separated method list (`"GET, post"`).
    #[must_use]
    pub fn parse_methods(methods: &str) -> Vec<String> {
        methods
            .split(',')
            .map(|m| m.trim().to_ascii_uppercase())
            .filter(|m| !m.is_empty())
            .collect()
    }

    /// Window length in seconds.
    #[must_use]
    pub fn window_seconds(&self) -> i64 {
        self.period.seconds() * i64::from(self.period_count.max(1))
    }

    /// Start of the tumbling window containing `timestamp` (unix seconds).
    #[must_use]
    pub fn window_start(&self, timestamp: i64) -> i64 {
        let length = self.window_seconds();
        timestamp - timestamp.rem_euclid(length)
    }

    /// Compile the endpoint pattern, anchored at the start of the path.
    ///
    /// # Errors
    ///
    /// Returns the regex error for an invalid pattern.
    pub fn compile_pattern(&self) -> Result<Option<Regex>, regex::Error> {
        self.endpoint_pattern
            .as_deref()
            .map(|pattern| Regex::new(&format!("^(?:{pattern})")))
            .transpose()
    }

    /// Whether the rule's method filter admits `method`.
    #[must_use]
    pub fn applies_to_method(&self, method: &str) -> bool {
        self.http_methods.is_empty()
            || self
                .http_methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(method))
    }

    /// Key the rule counts `subject` under.
    ///
    /// Callers without an API client or user are keyed as `anon-<ip>`.
    #[must_use]
    pub fn scope_key(&self, subject: &RateLimitSubject<'_>) -> String {
        let anonymous = || format!("anon-{}", subject.ip);
        let client = subject.api_client.map_or_else(anonymous, str::to_string);
        let user = subject.user.map_or_else(anonymous, str::to_string);
        let ip = subject.ip;
        let endpoint = subject.endpoint;
        let narrowed = |base: String| {
            if self.endpoint_pattern.is_some() {
                format!("{base}:endpoint:{endpoint}")
            } else {
                base
            }
        };

        match self.scope {
            RateLimitScope::Global => "global".to_string(),
            RateLimitScope::ApiClient => narrowed(format!("api_client:{client}")),
            RateLimitScope::User => narrowed(format!("user:{user}")),
            RateLimitScope::Ip => narrowed(format!("ip:{ip}")),
            RateLimitScope::Endpoint => format!("endpoint:{endpoint}"),
            RateLimitScope::UserEndpoint => format!("user:{user}:endpoint:{endpoint}"),
            RateLimitScope::IpEndpoint => format!("ip:{ip}:endpoint:{endpoint}"),
            RateLimitScope::ApiClientEndpoint => format!("api_client:{client}:endpoint:{endpoint}"),
        }
    }
}

/// One counter row: requests for (rule, key, endpoint) in one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitAttempt {
    /// Rule being counted.
    pub rule_id: RuleId,
    /// Scope key.
    pub key: String,
    /// Request path.
    pub endpoint: String,
    /// Method of the latest request.
    pub method: String,
    /// Window start, unix seconds.
    pub window_start: i64,
    /// Requests counted in this row.
    pub count: u64,
    /// Time of the latest request.
    pub last_attempt_at: DateTime<Utc>,
}

/// A ban on (rule, key) until a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitBlock {
    /// Rule that was exceeded.
    pub rule_id: RuleId,
    /// Scope key that was exceeded.
    pub key: String,
    /// End of the ban.
    pub blocked_until: DateTime<Utc>,
    /// Why the ban was issued.
    pub reason: String,
    /// When the ban was last upserted.
    pub created_at: DateTime<Utc>,
}

impl RateLimitBlock {
    /// Whether the ban is still in force at `now`.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until > now
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    /// Whether the request must be refused.
    pub blocked: bool,
    /// Limit of the deciding rule; 0 when no rule applied.
    pub limit: u32,
    /// Requests left in the window; -1 when no rule applied.
    pub remaining: i64,
    /// When the deciding window resets, unix seconds.
    pub reset_at: i64,
    /// Seconds until the caller may retry, when blocked.
    pub retry_after: Option<i64>,
}

impl RateLimitDecision {
    /// No rule applied.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            blocked: false,
            limit: 0,
            remaining: -1,
            reset_at: 0,
            retry_after: None,
        }
    }

    /// Whether any rule contributed to the decision.
    #[must_use]
    pub const fn is_limited(&self) -> bool {
        self.blocked || self.remaining >= 0
    }

    /// A refusal.
    #[must_use]
    pub fn blocked(limit: u32, reset_at: i64, retry_after: i64) -> Self {
        Self {
            blocked: true,
            limit,
            remaining: 0,
            reset_at,
            retry_after: Some(retry_after.max(1)),
        }
    }

    /// Keep whichever of two admitting decisions leaves fewer requests.
    #[must_use]
    pub fn tighter(self, other: Self) -> Self {
        if !self.is_limited() {
            return other;
        }
        if other.is_limited() && other.remaining < self.remaining {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for RateLimitDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.blocked {
            write!(f, "blocked (retry after {:?}s)", self.retry_after)
        } else {
            write!(f, "allowed ({} of {} left)", self.remaining, self.limit)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject<'a>() -> RateLimitSubject<'a> {
        RateLimitSubject {
            api_client: Some("client-1"),
            user: None,
            ip: "10.0.0.1",
            endpoint: "/v1/payments",
            method: "POST",
        }
    }

    #[test]
    fn scope_keys() {
        let mut rule = RateLimitRule::new("r", RateLimitScope::Ip, 3, RatePeriod::Minute);
        assert_eq!(rule.scope_key(&subject()), "ip:10.0.0.1");

        rule.endpoint_pattern = Some("/v1/".into());
        assert_eq!(rule.scope_key(&subject()), "ip:10.0.0.1:endpoint:/v1/payments");

        rule.scope = RateLimitScope::User;
        assert_eq!(
            rule.scope_key(&subject()),
            "user:anon-10.0.0.1:endpoint:/v1/payments"
        );

        rule.scope = RateLimitScope::ApiClientEndpoint;
        assert_eq!(
            rule.scope_key(&subject()),
            "api_client:client-1:endpoint:/v1/payments"
        );

        rule.scope = RateLimitScope::Global;
        assert_eq!(rule.scope_key(&subject()), "global");
    }

    #[test]
    fn windows_are_tumbling() {
        let mut rule = RateLimitRule::new("r", RateLimitScope::Global, 5, RatePeriod::Minute);
        assert_eq!(rule.window_start(125), 120);
        assert_eq!(rule.window_start(120), 120);
        rule.period_count = 5;
        assert_eq!(rule.window_seconds(), 300);
        assert_eq!(rule.window_start(899), 600);
        rule.period = RatePeriod::Month;
        rule.period_count = 1;
        assert_eq!(rule.window_seconds(), 30 * 86_400);
    }

    #[test]
    fn patterns_match_from_the_start() {
        let mut rule = RateLimitRule::new("r", RateLimitScope::Endpoint, 1, RatePeriod::Second);
        rule.endpoint_pattern = Some("/v1/pay".into());
        let regex = rule.compile_pattern().unwrap().unwrap();
        assert!(regex.is_match("/v1/payments"));
        assert!(!regex.is_match("/api/v1/payments"));
    }

    #[test]
    fn method_filter() {
        let mut rule = RateLimitRule::new("r", RateLimitScope::Global, 1, RatePeriod::Second);
        assert!(rule.applies_to_method("DELETE"));
        rule.http_methods = RateLimitRule::parse_methods("get, Post ,");
        assert_eq!(rule.http_methods, vec!["GET", "POST"]);
        assert!(rule.applies_to_method("post"));
        assert!(!rule.applies_to_method("DELETE"));
    }

    #[test]
    fn tighter_keeps_lowest_remaining() {
        let loose = RateLimitDecision {
            blocked: false,
            limit: 100,
            remaining: 90,
            reset_at: 10,
            retry_after: None,
        };
        let tight = RateLimitDecision {
            remaining: 2,
            limit: 5,
            ..loose
        };
        assert_eq!(RateLimitDecision::unlimited().tighter(loose), loose);
        assert_eq!(loose.tighter(tight), tight);
        assert_eq!(tight.tighter(loose), tight);
        assert_eq!(tight.tighter(RateLimitDecision::unlimited()), tight);
    }
}
