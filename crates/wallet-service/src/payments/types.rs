//! Payment gateway wire types.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

/// Result code the provider uses for success.
pub const RESULT_SUCCESS: i64 = 0;

/// A mobile-money transfer the wallet asks the provider to perform: a payout
/// to `destination`, or a collection from it.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentSubmission {
    /// Wallet transaction reference.
    pub reference: String,
    /// Amount to send or collect.
    pub amount: Decimal,
    /// Phone number paid to, or charged for a collection.
    pub destination: String,
    /// Free-text reason shown to the recipient.
    pub reason: String,
}

/// Token request body.
#[derive(Debug, Serialize)]
pub(crate) struct TokenRequest<'a> {
    pub consumer_key: &'a str,
    pub consumer_secret: &'a str,
    pub grant_type: &'a str,
}

/// Token response body.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub data: TokenData,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenData {
    pub token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Send-payment and receive-payment request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct MobileMoneyRequest<'a> {
    pub external_reference: &'a str,
    pub amount: f64,
    pub phone_number: &'a str,
    pub channel: &'a str,
    pub reason: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results_url: Option<&'a str>,
}

/// Transaction-query request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct QueryRequest<'a> {
    pub transaction_reference: &'a str,
}

/// Provider result, returned by submit and query and posted to the callback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GatewayResult {
    /// Provider result code; `0` is success.
    #[serde(default, deserialize_with = "number_or_string")]
    pub result_code: Option<i64>,
    /// Human-readable result.
    #[serde(default)]
    pub result_desc: Option<String>,
    /// The wallet reference the provider echoes back.
    #[serde(default)]
    pub originator_reference: Option<String>,
    /// Provider receipt.
    #[serde(default, rename = "TransactionID")]
    pub transaction_id: Option<String>,
}

impl GatewayResult {
    /// Whether the provider reports success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result_code == Some(RESULT_SUCCESS)
    }

    /// Whether a callback confirms a completed transfer.
    ///
    /// Callbacks also carry the success code for accepted-but-unfinished
    /// requests; only a description saying the transfer went through
    /// settles the transaction.
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.is_success()
            && self
                .result_desc
                .as_deref()
                .is_some_and(|d| d.to_ascii_lowercase().contains("successfully"))
    }
}

/// Accept `0`, `"0"` or nothing.
fn number_or_string<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}
