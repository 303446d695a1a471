//! API error types and responses.
//!
//! Every error renders the same envelope as a successful response:
//!
//! ```json
//! { "success": false, "code": "400.003", "message": "...", "data": {}, "error": "..." }
//! ```

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde::Serialize;

use wallet_core::{Bucket, RateLimitDecision, WalletError};
use wallet_store::StoreError;

use crate::engine::EngineError;
use crate::payments::GatewayClientError;
use crate::ratelimit::rate_limit_headers;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Bad request - malformed input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Amount is not a positive two-decimal value within the maximum.
    #[error("{0}")]
    InvalidAmount(String),

    /// The account is frozen.
    #[error("account {0} is frozen")]
    AccountFrozen(String),

    /// A bucket is short of funds.
    #[error("insufficient {bucket} balance: balance={balance}, required={required}")]
    InsufficientBalance {
        /// Bucket that is short.
        bucket: Bucket,
        /// Bucket balance.
        balance: Decimal,
        /// Amount required.
        required: Decimal,
    },

    /// A transaction already uses the reference.
    #[error("duplicate transaction reference: {0}")]
    DuplicateReference(String),

    /// Amount does not match the pending transaction.
    #[error("{0}")]
    AmountMismatch(String),

    /// A bearer token is required.
    #[error("unauthorized")]
    Unauthorized,

    /// No `X-Api-Key` header.
    #[error("Missing API key")]
    MissingApiKey,

    /// Unknown or inactive API key.
    #[error("Invalid API key")]
    InvalidApiKey,

    /// Request signature does not verify.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The client's IP allowlist excludes the caller.
    #[error("IP address not allowed")]
    IpNotAllowed,

    /// A signature was sent without an authenticated API client.
    #[error("Client context missing for signature verification")]
    ClientContextMissing,

    /// Account not found.
    #[error("account not found: {0}")]
    AccountNotFound(String),

    /// No Pending transaction for the reference.
    #[error("{0}")]
    PendingTransactionNotFound(String),

    /// Transaction not found.
    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    /// Conflict - resource already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The rate limiter refused the request.
    #[error("Rate limit exceeded. Try again later.")]
    RateLimited(RateLimitDecision),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// A rule-profile run failed.
    #[error("execution failed: {0}")]
    Execution(String),

    /// Signature verification could not run.
    #[error("Signature verification failed")]
    SignatureVerificationFailed,

    /// A key needed for verification or encryption is missing.
    #[error("{0}")]
    KeyNotConfigured(String),

    /// The payment provider could not be reached or answered with an error.
    #[error("external service error: {0}")]
    ExternalService(String),
}

/// JSON error envelope.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    code: &'static str,
    message: String,
    data: serde_json::Value,
    error: String,
}

impl ApiError {
    /// HTTP status and stable code.
    #[must_use]
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "400.000"),
            Self::InvalidAmount(_) => (StatusCode::BAD_REQUEST, "400.001"),
            Self::AccountFrozen(_) => (StatusCode::BAD_REQUEST, "400.002"),
            Self::InsufficientBalance { .. } => (StatusCode::BAD_REQUEST, "400.003"),
            Self::DuplicateReference(_) => (StatusCode::BAD_REQUEST, "400.004"),
            Self::AmountMismatch(_) => (StatusCode::BAD_REQUEST, "400.005"),
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "401.000"),
            Self::MissingApiKey => (StatusCode::UNAUTHORIZED, "401.001"),
            Self::InvalidApiKey => (StatusCode::UNAUTHORIZED, "401.002"),
            Self::InvalidSignature => (StatusCode::UNAUTHORIZED, "401.003"),
            Self::IpNotAllowed => (StatusCode::FORBIDDEN, "403.001"),
            Self::ClientContextMissing => (StatusCode::FORBIDDEN, "403.002"),
            Self::AccountNotFound(_) => (StatusCode::NOT_FOUND, "404.001"),
            Self::PendingTransactionNotFound(_) => (StatusCode::NOT_FOUND, "404.002"),
            Self::TransactionNotFound(_) => (StatusCode::NOT_FOUND, "404.003"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "409.000"),
            Self::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, "429.000"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "500.000"),
            Self::Execution(_) => (StatusCode::INTERNAL_SERVER_ERROR, "500.001"),
            Self::SignatureVerificationFailed => (StatusCode::INTERNAL_SERVER_ERROR, "500.000"),
            Self::KeyNotConfigured(_) => (StatusCode::INTERNAL_SERVER_ERROR, "500.002"),
            Self::ExternalService(_) => (StatusCode::BAD_GATEWAY, "502.000"),
        }
    }

    /// Short name recorded as the exception type of a request log.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BadRequest",
            Self::InvalidAmount(_) => "InvalidAmount",
            Self::AccountFrozen(_) => "AccountFrozen",
            Self::InsufficientBalance { .. } => "InsufficientBalance",
            Self::DuplicateReference(_) => "DuplicateReference",
            Self::AmountMismatch(_) => "AmountMismatch",
            Self::Unauthorized => "Unauthorized",
            Self::MissingApiKey => "MissingApiKey",
            Self::InvalidApiKey => "InvalidApiKey",
            Self::InvalidSignature => "InvalidSignature",
            Self::IpNotAllowed => "IpNotAllowed",
            Self::ClientContextMissing => "ClientContextMissing",
            Self::AccountNotFound(_) => "AccountNotFound",
            Self::PendingTransactionNotFound(_) => "PendingTransactionNotFound",
            Self::TransactionNotFound(_) => "TransactionNotFound",
            Self::Conflict(_) => "Conflict",
            Self::RateLimited(_) => "RateLimited",
            Self::Internal(_) => "Internal",
            Self::Execution(_) => "Execution",
            Self::SignatureVerificationFailed => "SignatureVerificationFailed",
            Self::KeyNotConfigured(_) => "KeyNotConfigured",
            Self::ExternalService(_) => "ExternalService",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let kind = self.kind();

        let (message, data, error) = match &self {
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    "An internal error occurred".to_string(),
                    serde_json::json!({}),
                    "internal error".to_string(),
                )
            }
            Self::Execution(msg) => {
                tracing::error!(error = %msg, "Rule profile execution failed");
                (
                    "Transaction processing failed".to_string(),
                    serde_json::json!({}),
                    msg.clone(),
                )
            }
            Self::InsufficientBalance {
                bucket,
                balance,
                required,
            } => (
                format!("Insufficient {bucket} balance"),
                serde_json::json!({
                    "bucket": bucket,
                    "balance": balance,
                    "required": required,
                }),
                self.to_string(),
            ),
            Self::RateLimited(decision) => (
                self.to_string(),
                serde_json::json!({ "retry_after": decision.retry_after }),
                self.to_string(),
            ),
            _ => (self.to_string(), serde_json::json!({}), self.to_string()),
        };

        let body = ErrorResponse {
            success: false,
            code,
            message,
            data,
            error,
        };

        let mut response = (status, Json(body)).into_response();
        if let Self::RateLimited(decision) = &self {
            for (name, value) in rate_limit_headers(decision) {
                response.headers_mut().insert(name, value);
            }
        }
        response.extensions_mut().insert(ErrorKind(kind));
        response
    }
}

/// Marks a response produced from an [`ApiError`], for request logging.
#[derive(Debug, Clone, Copy)]
pub struct ErrorKind(pub &'static str);

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::AccountNotFound("account not found".into()),
            StoreError::DuplicateReference { reference } => Self::DuplicateReference(reference),
            StoreError::AccountExists { funding_target } => Self::Conflict(format!(
                "an account already exists for funding target {funding_target}"
            )),
            StoreError::AccountNumberTaken(number) => {
                Self::Conflict(format!("account number {number} is taken"))
            }
            StoreError::AccountNumbersExhausted => {
                Self::Internal("account numbers exhausted".into())
            }
            StoreError::Database(msg) | StoreError::Serialization(msg) => Self::Internal(msg),
        }
    }
}

impl From<WalletError> for ApiError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::InvalidAmount(_) => Self::InvalidAmount(err.to_string()),
            WalletError::InvalidReference(_) | WalletError::InvalidId(_) => {
                Self::BadRequest(err.to_string())
            }
            WalletError::AccountFrozen { account_id } => Self::AccountFrozen(account_id),
            WalletError::InsufficientBalance {
                bucket,
                balance,
                required,
            } => Self::InsufficientBalance {
                bucket,
                balance,
                required,
            },
            WalletError::PendingTransactionNotFound { .. } => {
                Self::PendingTransactionNotFound(err.to_string())
            }
            WalletError::AmountMismatch { .. } => Self::AmountMismatch(err.to_string()),
            WalletError::DuplicateReference { reference } => Self::DuplicateReference(reference),
            WalletError::InvariantViolation { .. } => Self::Internal(err.to_string()),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Wallet(e) => e.into(),
            EngineError::Store(e) => e.into(),
            EngineError::Execution(e) => Self::Execution(e.to_string()),
            EngineError::TransactionNotFound(reference) => Self::TransactionNotFound(reference),
        }
    }
}

impl From<GatewayClientError> for ApiError {
    fn from(err: GatewayClientError) -> Self {
        Self::ExternalService(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn gateway_failures_are_bad_gateway() {
        let err: ApiError = GatewayClientError::Api {
            status: 503,
            message: "down".into(),
        }
        .into();
        assert_eq!(err.status_and_code(), (StatusCode::BAD_GATEWAY, "502.000"));
        assert_eq!(err.kind(), "ExternalService");
    }

    #[test]
    fn wallet_errors_map_to_stable_codes() {
        let frozen: ApiError = WalletError::AccountFrozen {
            account_id: "a".into(),
        }
        .into();
        assert_eq!(frozen.status_and_code().1, "400.002");

        let short: ApiError = WalletError::InsufficientBalance {
            bucket: Bucket::Available,
            balance: dec!(1),
            required: dec!(2),
        }
        .into();
        assert_eq!(short.status_and_code(), (StatusCode::BAD_REQUEST, "400.003"));

        let missing: ApiError = WalletError::PendingTransactionNotFound {
            kind: "topup".into(),
            reference: "T1".into(),
        }
        .into();
        assert_eq!(missing.status_and_code(), (StatusCode::NOT_FOUND, "404.002"));
    }

    #[test]
    fn store_errors_map_to_stable_codes() {
        let duplicate: ApiError = StoreError::DuplicateReference {
            reference: "R1".into(),
        }
        .into();
        assert_eq!(duplicate.status_and_code().1, "400.004");

        let internal: ApiError = StoreError::Database("boom".into()).into();
        assert_eq!(
            internal.status_and_code(),
            (StatusCode::INTERNAL_SERVER_ERROR, "500.000")
        );
    }

    #[test]
    fn rate_limited_response_carries_headers() {
        let decision = RateLimitDecision::blocked(3, 1_700_000_060, 42);
        let response = ApiError::RateLimited(decision).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["x-ratelimit-limit"], "3");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
        assert_eq!(response.headers()["retry-after"], "42");
    }
}
