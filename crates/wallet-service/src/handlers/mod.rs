//! API handlers.

pub mod accounts;
pub mod admin;
pub mod callbacks;
pub mod health;
pub mod payments;
pub mod topups;
pub mod transactions;

use serde::Deserialize;
use wallet_core::AccountId;

use crate::error::ApiError;

/// `?limit=` on listing endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Maximum number of rows to return.
    pub limit: Option<usize>,
}

/// Body of an approve or reject call.
#[derive(Debug, Default, Deserialize)]
pub struct SettleRequest {
    /// Expected amount; must match the pending transaction when given.
    #[serde(default)]
    pub amount: Option<rust_decimal::Decimal>,
    /// Provider receipt.
    #[serde(default)]
    pub receipt: Option<String>,
    /// Reason or note recorded on the transaction.
    #[serde(default)]
    pub note: Option<String>,
}

pub(crate) fn parse_account_id(raw: &str) -> Result<AccountId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid account id: {raw}")))
}
