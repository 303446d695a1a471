//! Topup workflow handlers.
//!
//! With a payment gateway configured and a payer phone number given, the
//! provider is asked to collect the amount plus the collection charge. The
//! topup stays Pending until the provider's callback (or reconciliation)
//! confirms the collection. A refused or failed request rejects it.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::{Extension, Json};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use wallet_core::{
    collection_charge, Initiation, Resolution, Settlement, Transaction, TransactionType,
};

use super::{parse_account_id, SettleRequest};
use crate::error::ApiError;
use crate::gateway::RequestContext;
use crate::payments::PaymentSubmission;
use crate::response::ApiResponse;
use crate::state::AppState;

/// Initiate topup request.
#[derive(Debug, Deserialize)]
pub struct InitiateTopupRequest {
    /// Account to credit.
    pub account_id: String,
    /// Amount to credit once confirmed.
    pub amount: Decimal,
    /// External reference; generated when omitted.
    #[serde(default)]
    pub reference: Option<String>,
    /// Description stored on the transaction.
    #[serde(default)]
    pub description: Option<String>,
    /// Payer phone number to collect from through the payment gateway.
    #[serde(default)]
    pub phone_number: Option<String>,
}

/// A topup, with the collection amounts when the provider was asked to
/// collect it.
#[derive(Debug, Serialize)]
pub struct TopupResponse {
    /// The topup transaction.
    #[serde(flatten)]
    pub transaction: Transaction,
    /// Collection charge added on top of the credited amount.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charge: Option<Decimal>,
    /// Amount the payer is asked for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_amount: Option<Decimal>,
}

impl From<Transaction> for TopupResponse {
    fn from(transaction: Transaction) -> Self {
        Self {
            transaction,
            charge: None,
            total_amount: None,
        }
    }
}

/// Start a topup. The amount is uncleared until approved.
pub async fn initiate_topup(
    State(state): State<Arc<AppState>>,
    ctx: Option<Extension<RequestContext>>,
    Json(body): Json<InitiateTopupRequest>,
) -> Result<ApiResponse<TopupResponse>, ApiError> {
    let account_id = parse_account_id(&body.account_id)?;
    let reference = body
        .reference
        .unwrap_or_else(|| state.engine.next_reference());

    let transaction = state
        .engine
        .initiate(
            TransactionType::Topup,
            &account_id,
            &Initiation {
                reference: &reference,
                amount: body.amount,
                description: body.description.as_deref(),
            },
        )
        .await?;

    let (Some(gateway), Some(phone_number)) = (&state.payments, body.phone_number) else {
        return Ok(ApiResponse::created("Topup initiated", transaction.into()));
    };

    let charge = collection_charge(transaction.amount);
    let total_amount = transaction.amount + charge;
    let collection = PaymentSubmission {
        reference: transaction.reference.clone(),
        amount: total_amount,
        destination: phone_number,
        reason: transaction.description.clone(),
    };

    match gateway.request_collection(&collection).await {
        Ok(result) if result.is_success() => Ok(ApiResponse::created(
            "Collection requested",
            TopupResponse {
                transaction,
                charge: Some(charge),
                total_amount: Some(total_amount),
            },
        )),
        Ok(result) => {
            let note = result
                .result_desc
                .unwrap_or_else(|| "collection refused by provider".to_string());
            tracing::warn!(
                request_id = ?ctx.as_ref().map(|Extension(c)| c.request_id),
                reference = %transaction.reference,
                result_code = ?result.result_code,
                note = %note,
                "Collection request refused"
            );
            let rejected = reject_with_note(&state, &transaction.reference, &note).await?;
            Ok(ApiResponse::ok("Collection refused by provider", rejected.into()))
        }
        Err(e) => {
            tracing::warn!(
                reference = %transaction.reference,
                error = %e,
                "Collection request failed - rejecting topup"
            );
            reject_with_note(&state, &transaction.reference, &e.to_string()).await?;
            Err(e.into())
        }
    }
}

async fn reject_with_note(
    state: &AppState,
    reference: &str,
    note: &str,
) -> Result<Transaction, ApiError> {
    let transaction = state
        .engine
        .settle(
            TransactionType::Topup,
            Resolution::Reject,
            &Settlement {
                reference,
                note: Some(note),
                ..Settlement::default()
            },
        )
        .await?;
    Ok(transaction)
}

/// Confirm a pending topup.
pub async fn approve_topup(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
    body: Option<Json<SettleRequest>>,
) -> Result<ApiResponse<Transaction>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let transaction = settle(
        &state,
        TransactionType::Topup,
        Resolution::Approve,
        &reference,
        &body,
    )
    .await?;
    Ok(ApiResponse::ok("Topup approved", transaction))
}

/// Reject a pending topup.
pub async fn reject_topup(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
    body: Option<Json<SettleRequest>>,
) -> Result<ApiResponse<Transaction>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let transaction = settle(
        &state,
        TransactionType::Topup,
        Resolution::Reject,
        &reference,
        &body,
    )
    .await?;
    Ok(ApiResponse::ok("Topup rejected", transaction))
}

/// Approve or reject through the engine.
pub(crate) async fn settle(
    state: &AppState,
    kind: TransactionType,
    resolution: Resolution,
    reference: &str,
    body: &SettleRequest,
) -> Result<Transaction, ApiError> {
    let transaction = state
        .engine
        .settle(
            kind,
            resolution,
            &Settlement {
                reference,
                amount: body.amount,
                receipt: body.receipt.as_deref(),
                note: body.note.as_deref(),
            },
        )
        .await?;
    Ok(transaction)
}
