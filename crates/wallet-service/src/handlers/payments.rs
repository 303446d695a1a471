//! Payment workflow handlers.
//!
//! A payment reserves funds on initiation. With a payment gateway configured
//! and a destination given, the payout is submitted to the provider right
//! away; a refused submission rejects the payment and releases the funds.
//! An unreachable provider leaves it Pending for the callback or the
//! reconciliation job.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::{Extension, Json};
use rust_decimal::Decimal;
use serde::Deserialize;

use wallet_core::{Initiation, Resolution, Settlement, Transaction, TransactionType};

use super::topups::settle;
use super::{parse_account_id, SettleRequest};
use crate::error::ApiError;
use crate::gateway::RequestContext;
use crate::payments::PaymentSubmission;
use crate::response::ApiResponse;
use crate::state::AppState;

/// Initiate payment request.
#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    /// Account to debit.
    pub account_id: String,
    /// Amount to pay.
    pub amount: Decimal,
    /// External reference; generated when omitted.
    #[serde(default)]
    pub reference: Option<String>,
    /// Description stored on the transaction.
    #[serde(default)]
    pub description: Option<String>,
    /// Payout destination (phone number) for the payment gateway.
    #[serde(default)]
    pub destination: Option<String>,
}

/// Start a payment, submitting it to the provider when possible.
pub async fn initiate_payment(
    State(state): State<Arc<AppState>>,
    ctx: Option<Extension<RequestContext>>,
    Json(body): Json<InitiatePaymentRequest>,
) -> Result<ApiResponse<Transaction>, ApiError> {
    let account_id = parse_account_id(&body.account_id)?;
    let reference = body
        .reference
        .unwrap_or_else(|| state.engine.next_reference());

    let transaction = state
        .engine
        .initiate(
            TransactionType::Payment,
            &account_id,
            &Initiation {
                reference: &reference,
                amount: body.amount,
                description: body.description.as_deref(),
            },
        )
        .await?;

    let (Some(gateway), Some(destination)) = (&state.payments, body.destination) else {
        return Ok(ApiResponse::created("Payment initiated", transaction));
    };

    let submission = PaymentSubmission {
        reference: transaction.reference.clone(),
        amount: transaction.amount,
        destination,
        reason: transaction.description.clone(),
    };
    match gateway.submit_payment(&submission).await {
        Ok(result) if result.is_success() => {
            Ok(ApiResponse::created("Payment submitted", transaction))
        }
        Ok(result) => {
            let note = result
                .result_desc
                .unwrap_or_else(|| "payment refused by provider".to_string());
            tracing::warn!(
                request_id = ?ctx.as_ref().map(|Extension(c)| c.request_id),
                reference = %transaction.reference,
                result_code = ?result.result_code,
                note = %note,
                "Payment submission refused"
            );
            let rejected = state
                .engine
                .settle(
                    TransactionType::Payment,
                    Resolution::Reject,
                    &Settlement {
                        reference: &transaction.reference,
                        note: Some(&note),
                        ..Settlement::default()
                    },
                )
                .await?;
            Ok(ApiResponse::ok("Payment refused by provider", rejected))
        }
        Err(e) => {
            tracing::warn!(
                reference = %transaction.reference,
                error = %e,
                "Payment submission failed - left Pending for reconciliation"
            );
            Ok(ApiResponse::created("Payment initiated", transaction))
        }
    }
}

/// Confirm a pending payment.
pub async fn approve_payment(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
    body: Option<Json<SettleRequest>>,
) -> Result<ApiResponse<Transaction>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let transaction = settle(
        &state,
        TransactionType::Payment,
        Resolution::Approve,
        &reference,
        &body,
    )
    .await?;
    Ok(ApiResponse::ok("Payment approved", transaction))
}

/// Reject a pending payment, releasing the reserved funds.
pub async fn reject_payment(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
    body: Option<Json<SettleRequest>>,
) -> Result<ApiResponse<Transaction>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let transaction = settle(
        &state,
        TransactionType::Payment,
        Resolution::Reject,
        &reference,
        &body,
    )
    .await?;
    Ok(ApiResponse::ok("Payment rejected", transaction))
}
