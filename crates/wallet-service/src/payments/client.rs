//! HTTP payment gateway client.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::prelude::ToPrimitive;
use tokio::sync::RwLock;

use super::types::{
    GatewayResult, MobileMoneyRequest, PaymentSubmission, QueryRequest, TokenRequest,
    TokenResponse,
};
use super::PaymentGateway;

/// Tokens are refreshed this long before the provider expires them.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// Token lifetime when the provider does not say.
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(3600);

/// Mobile-money channel used for payouts and collections.
const MOBILE_MONEY_CHANNEL: &str = "MPESA";

fn wire_amount(amount: rust_decimal::Decimal) -> Result<f64, GatewayClientError> {
    amount.to_f64().ok_or_else(|| {
        GatewayClientError::Configuration(format!("amount {amount} cannot be sent"))
    })
}

/// Error type for payment gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum GatewayClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider returned an error status.
    #[error("payment gateway error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body or status text.
        message: String,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Payment gateway client using consumer-key token auth.
#[derive(Debug)]
pub struct HttpPaymentGateway {
    client: Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    results_url: Option<String>,
    token: RwLock<Option<CachedToken>>,
}

impl HttpPaymentGateway {
    /// Create a new client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Provider API URL
    /// * `client_id` / `client_secret` - Consumer credentials
    /// * `results_url` - Where the provider should post results, if anywhere
    pub fn new(
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        results_url: Option<String>,
    ) -> Result<Self, GatewayClientError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(GatewayClientError::Configuration(
                "payment gateway URL is empty".into(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| GatewayClientError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            results_url,
            token: RwLock::new(None),
        })
    }

    async fn authenticate(&self) -> Result<String, GatewayClientError> {
        let url = format!("{}/api/v1/token/", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&TokenRequest {
                consumer_key: &self.client_id,
                consumer_secret: &self.client_secret,
                grant_type: "client_credentials",
            })
            .send()
            .await?;

        let token: TokenResponse = Self::handle_response(response).await?;
        let ttl = token
            .data
            .expires_in
            .map_or(DEFAULT_TOKEN_TTL, Duration::from_secs);
        let refresh_at = Instant::now() + ttl.saturating_sub(TOKEN_REFRESH_MARGIN);

        *self.token.write().await = Some(CachedToken {
            value: token.data.token.clone(),
            refresh_at,
        });
        tracing::debug!("Payment gateway token refreshed");
        Ok(token.data.token)
    }

    async fn bearer_token(&self) -> Result<String, GatewayClientError> {
        if let Some(cached) = self.token.read().await.as_ref() {
            if cached.refresh_at > Instant::now() {
                return Ok(cached.value.clone());
            }
        }
        self.authenticate().await
    }

    /// POST `body` to `endpoint`, re-authenticating once on 401.
    async fn post<B: serde::Serialize + Sync>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<GatewayResult, GatewayClientError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut token = self.bearer_token().await?;

        for attempt in 0..2 {
            let response = self
                .client
                .post(&url)
                .bearer_auth(&token)
                .json(body)
                .send()
                .await?;

            if response.status() == StatusCode::UNAUTHORIZED && attempt == 0 {
                tracing::debug!(endpoint, "Payment gateway token rejected, re-authenticating");
                token = self.authenticate().await?;
                continue;
            }
            return Self::handle_response(response).await;
        }

        Err(GatewayClientError::Api {
            status: StatusCode::UNAUTHORIZED.as_u16(),
            message: "authentication failed".into(),
        })
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, GatewayClientError> {
        let status = response.status();
        if status.is_success() {
            let bytes = response.bytes().await?;
            return Ok(serde_json::from_slice(&bytes)?);
        }

        let body = response.text().await.unwrap_or_default();
        let message = if body.is_empty() {
            format!("HTTP {status}")
        } else {
            body
        };
        Err(GatewayClientError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn submit_payment(
        &self,
        submission: &PaymentSubmission,
    ) -> Result<GatewayResult, GatewayClientError> {
        let amount = wire_amount(submission.amount)?;

        tracing::info!(
            reference = %submission.reference,
            amount = %submission.amount,
            "Submitting payment to gateway"
        );
        self.post(
            "/api/v1/mobile-money/send-payment/",
            &MobileMoneyRequest {
                external_reference: &submission.reference,
                amount,
                phone_number: &submission.destination,
                channel: MOBILE_MONEY_CHANNEL,
                reason: &submission.reason,
                results_url: self.results_url.as_deref(),
            },
        )
        .await
    }

    async fn request_collection(
        &self,
        collection: &PaymentSubmission,
    ) -> Result<GatewayResult, GatewayClientError> {
        let amount = wire_amount(collection.amount)?;

        tracing::info!(
            reference = %collection.reference,
            amount = %collection.amount,
            "Requesting collection from gateway"
        );
        self.post(
            "/api/v1/mobile-money/receive-payment/",
            &MobileMoneyRequest {
                external_reference: &collection.reference,
                amount,
                phone_number: &collection.destination,
                channel: MOBILE_MONEY_CHANNEL,
                reason: &collection.reason,
                results_url: self.results_url.as_deref(),
            },
        )
        .await
    }

    async fn query_status(&self, reference: &str) -> Result<GatewayResult, GatewayClientError> {
        self.post(
            "/api/v1/mobile-money/transaction-query/",
            &QueryRequest {
                transaction_reference: reference,
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_base_url_is_rejected() {
        let result = HttpPaymentGateway::new("", "id", "secret", None);
        assert!(matches!(result, Err(GatewayClientError::Configuration(_))));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let client = HttpPaymentGateway::new("http://gw.test/", "id", "secret", None).unwrap();
        assert_eq!(client.base_url, "http://gw.test");
    }
}
