//! Outbound payment provider integration.
//!
//! The wallet submits payouts, requests collections for topups and polls
//! their status through the
//! [`PaymentGateway`] trait; [`HttpPaymentGateway`] is the production
//! implementation. Results come back either synchronously, through the
//! provider callback, or through the reconciliation job.

mod client;
mod types;

pub use client::{GatewayClientError, HttpPaymentGateway};
pub use types::{GatewayResult, PaymentSubmission, RESULT_SUCCESS};

use async_trait::async_trait;

/// A mobile-money payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Ask the provider to send a payment.
    async fn submit_payment(
        &self,
        submission: &PaymentSubmission,
    ) -> Result<GatewayResult, GatewayClientError>;

    /// Ask the provider to collect a payment from the payer's phone.
    async fn request_collection(
        &self,
        collection: &PaymentSubmission,
    ) -> Result<GatewayResult, GatewayClientError>;

    /// Query the provider for the status of `reference`.
    async fn query_status(&self, reference: &str) -> Result<GatewayResult, GatewayClientError>;
}
