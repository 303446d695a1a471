//! Rate limiting against stored rules, counters and blocks.
//!
//! Every active rule whose method filter and endpoint pattern match the
//! request is evaluated, highest priority first. Each one counts the request
//! in its tumbling window with an atomic increment; the first rule over its
//! limit (or already blocking the key) refuses the request, otherwise the
//! rule leaving the fewest requests decides the headers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::http::{HeaderName, HeaderValue};
use chrono::{DateTime, Duration, Utc};
use regex::Regex;

use wallet_core::{
    RateLimitAttempt, RateLimitBlock, RateLimitDecision, RateLimitRule, RateLimitSubject,
};
use wallet_store::{Store, StoreError};

/// Evaluates rate-limit rules for incoming requests.
pub struct RateLimiter {
    store: Arc<dyn Store>,
    patterns: Mutex<HashMap<String, Option<Regex>>>,
}

impl RateLimiter {
    /// Create a limiter over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            patterns: Mutex::new(HashMap::new()),
        }
    }

    /// Count the request and decide whether it may proceed.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if rules, counters or blocks can't be read or
    /// written.
    pub fn check(
        &self,
        subject: &RateLimitSubject<'_>,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision, StoreError> {
        let mut rules: Vec<RateLimitRule> = self
            .store
            .list_rate_limit_rules()?
            .into_iter()
            .filter(|rule| rule.active)
            .collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut decision = RateLimitDecision::unlimited();
        for rule in &rules {
            if !rule.applies_to_method(subject.method) || !self.matches(rule, subject.endpoint) {
                continue;
            }

            let outcome = self.evaluate(rule, subject, now)?;
            if outcome.blocked {
                tracing::warn!(
                    rule = %rule.name,
                    ip = %subject.ip,
                    endpoint = %subject.endpoint,
                    retry_after = ?outcome.retry_after,
                    "Rate limit exceeded"
                );
                return Ok(outcome);
            }
            decision = decision.tighter(outcome);
        }
        Ok(decision)
    }

    fn evaluate(
        &self,
        rule: &RateLimitRule,
        subject: &RateLimitSubject<'_>,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision, StoreError> {
        let key = rule.scope_key(subject);

        if let Some(block) = self.store.get_rate_limit_block(&rule.id, &key)? {
            if block.is_active(now) {
                let until = block.blocked_until.timestamp();
                return Ok(RateLimitDecision::blocked(
                    rule.limit,
                    until,
                    until - now.timestamp(),
                ));
            }
        }

        let window_start = rule.window_start(now.timestamp());
        let reset_at = window_start + rule.window_seconds();
        self.store.increment_attempt(&RateLimitAttempt {
            rule_id: rule.id,
            key: key.clone(),
            endpoint: subject.endpoint.to_string(),
            method: subject.method.to_string(),
            window_start,
            count: 1,
            last_attempt_at: now,
        })?;
        let total = self.store.window_attempts(&rule.id, &key, window_start)?;
        let limit = u64::from(rule.limit);

        if total > limit {
            let window_end = DateTime::from_timestamp(reset_at, 0).unwrap_or(now);
            let banned_until = now + Duration::minutes(i64::from(rule.block_duration_minutes));
            let blocked_until = window_end.max(banned_until);
            self.store.put_rate_limit_block(&RateLimitBlock {
                rule_id: rule.id,
                key,
                blocked_until,
                reason: format!("{} requests exceed limit {}", total, rule.limit),
                created_at: now,
            })?;
            let until = blocked_until.timestamp();
            return Ok(RateLimitDecision::blocked(rule.limit, until, until - now.timestamp()));
        }

        Ok(RateLimitDecision {
            blocked: false,
            limit: rule.limit,
            remaining: i64::try_from(limit - total).unwrap_or(i64::MAX),
            reset_at,
            retry_after: None,
        })
    }

    /// Whether the rule's endpoint pattern admits `endpoint`.
    ///
    /// Invalid patterns never match and are reported once.
    fn matches(&self, rule: &RateLimitRule, endpoint: &str) -> bool {
        let Some(pattern) = rule.endpoint_pattern.as_deref() else {
            return true;
        };

        let Ok(mut cache) = self.patterns.lock() else {
            return false;
        };
        let compiled = cache.entry(pattern.to_string()).or_insert_with(|| {
            rule.compile_pattern().unwrap_or_else(|e| {
                tracing::warn!(rule = %rule.name, error = %e, "Invalid rate-limit endpoint pattern");
                None
            })
        });
        compiled.as_ref().is_some_and(|regex| regex.is_match(endpoint))
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").finish_non_exhaustive()
    }
}

/// Response headers describing a decision.
///
/// Empty when no rule applied.
#[must_use]
pub fn rate_limit_headers(decision: &RateLimitDecision) -> Vec<(HeaderName, HeaderValue)> {
    if !decision.is_limited() {
        return Vec::new();
    }

    let mut headers = vec![
        (
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderValue::from(decision.limit),
        ),
        (
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderValue::from(decision.remaining.max(0)),
        ),
        (
            HeaderName::from_static("x-ratelimit-reset"),
            HeaderValue::from(decision.reset_at),
        ),
    ];
    if let Some(retry_after) = decision.retry_after {
        headers.push((axum::http::header::RETRY_AFTER, HeaderValue::from(retry_after)));
    }
    headers
}
