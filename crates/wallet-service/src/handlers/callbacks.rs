//! Payment provider callbacks.
//!
//! The provider posts a [`GatewayResult`] for every payout and collection it
//! processes.
//! When a callback secret is configured the raw body must carry a hex
//! HMAC-SHA256 in `X-Callback-Signature`.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;

use wallet_core::{Resolution, Settlement, Transaction, TransactionStatus, WalletError};

use crate::crypto::{constant_time_eq, hmac_sha256_hex};
use crate::engine::EngineError;
use crate::error::ApiError;
use crate::payments::GatewayResult;
use crate::response::ApiResponse;
use crate::state::AppState;

/// Header carrying the callback HMAC.
pub const CALLBACK_SIGNATURE_HEADER: &str = "x-callback-signature";

/// Settle the transaction a provider result refers to.
///
/// Confirmed transfers are approved and failures rejected. Accepted but
/// unfinished transfers are acknowledged and stay Pending.
pub async fn payment_callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<ApiResponse<Transaction>, ApiError> {
    if let Some(secret) = &state.config.payment_callback_secret {
        verify_callback_signature(secret, &headers, &body)?;
    }

    let result: GatewayResult = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid callback payload: {e}")))?;
    let reference = result
        .originator_reference
        .as_deref()
        .filter(|r| !r.is_empty())
        .ok_or_else(|| ApiError::BadRequest("OriginatorReference is required".into()))?;

    let transaction = state
        .store
        .get_transaction_by_reference(reference)?
        .ok_or_else(|| ApiError::TransactionNotFound(reference.to_string()))?;

    tracing::info!(
        reference = %reference,
        result_code = ?result.result_code,
        result_desc = ?result.result_desc,
        "Payment callback received"
    );

    let resolution = if result.is_confirmed() {
        if result.transaction_id.as_deref().filter(|id| !id.is_empty()).is_none() {
            return Err(ApiError::BadRequest(
                "TransactionID is required for a confirmed transfer".into(),
            ));
        }
        Resolution::Approve
    } else if result.is_success() {
        return Ok(ApiResponse::ok("Callback acknowledged", transaction));
    } else {
        Resolution::Reject
    };

    settle_pending(&state, transaction, resolution, &result).await
}

/// Settle `transaction`, acknowledging instead when it is no longer Pending.
///
/// A concurrent callback or reconciliation pass can settle the transaction
/// between the read above and the engine's locked re-read; the loser gets
/// the same acknowledgement as a late duplicate.
async fn settle_pending(
    state: &AppState,
    transaction: Transaction,
    resolution: Resolution,
    result: &GatewayResult,
) -> Result<ApiResponse<Transaction>, ApiError> {
    if transaction.status != TransactionStatus::Pending {
        return Ok(already_settled(transaction));
    }

    let settled = state
        .engine
        .settle(
            transaction.transaction_type,
            resolution,
            &Settlement {
                reference: &transaction.reference,
                amount: None,
                receipt: result.transaction_id.as_deref(),
                note: result.result_desc.as_deref(),
            },
        )
        .await;

    match settled {
        Ok(settled) => Ok(ApiResponse::ok("Callback processed", settled)),
        Err(EngineError::Wallet(WalletError::PendingTransactionNotFound { .. })) => {
            let current = state
                .store
                .get_transaction(&transaction.id)?
                .ok_or_else(|| ApiError::TransactionNotFound(transaction.reference.clone()))?;
            Ok(already_settled(current))
        }
        Err(e) => Err(e.into()),
    }
}

fn already_settled(transaction: Transaction) -> ApiResponse<Transaction> {
    tracing::warn!(
        reference = %transaction.reference,
        status = ?transaction.status,
        "Callback for a settled transaction ignored"
    );
    ApiResponse::ok("Transaction already settled", transaction)
}

fn verify_callback_signature(
    secret: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), ApiError> {
    let signature = headers
        .get(CALLBACK_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::InvalidSignature)?;

    let expected = hmac_sha256_hex(secret, body).map_err(|e| ApiError::Internal(e.to_string()))?;
    if !constant_time_eq(&expected, &signature.trim().to_ascii_lowercase()) {
        tracing::warn!("Payment callback signature mismatch");
        return Err(ApiError::InvalidSignature);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use rust_decimal_macros::dec;
    use wallet_core::{Initiation, TransactionType, DEFAULT_CURRENCY};
    use wallet_store::MemoryStore;

    #[tokio::test]
    async fn losing_a_settlement_race_is_acknowledged() {
        let state = AppState::new(Arc::new(MemoryStore::new()), ServiceConfig::default());
        state.seed_rule_profiles().unwrap();
        let account = state
            .engine
            .create_account("merchant-race", DEFAULT_CURRENCY)
            .await
            .unwrap();
        let stale = state
            .engine
            .initiate(
                TransactionType::Topup,
                &account.id,
                &Initiation {
                    reference: "RACE-1",
                    amount: dec!(25),
                    description: None,
                },
            )
            .await
            .unwrap();
        state
            .engine
            .settle(
                TransactionType::Topup,
                Resolution::Approve,
                &Settlement {
                    reference: "RACE-1",
                    receipt: Some("QK1"),
                    ..Settlement::default()
                },
            )
            .await
            .unwrap();

        let failed = GatewayResult {
            result_code: Some(1),
            ..GatewayResult::default()
        };
        let response = settle_pending(&state, stale, Resolution::Reject, &failed)
            .await
            .unwrap();
        assert_eq!(response.message(), "Transaction already settled");
        assert_eq!(response.data().status, TransactionStatus::Completed);
    }
}
