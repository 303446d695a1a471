//! Transaction lookup.

use std::sync::Arc;

use axum::extract::{Path, State};
use serde::Serialize;

use wallet_core::{BalanceLog, BalanceLogEntry, Transaction};

use crate::error::ApiError;
use crate::response::ApiResponse;
use crate::state::AppState;

/// A transaction with its rule-profile executions.
#[derive(Debug, Serialize)]
pub struct TransactionDetail {
    /// The transaction.
    pub transaction: Transaction,
    /// Its balance logs, each with its entries.
    pub balance_logs: Vec<BalanceLogDetail>,
}

/// One balance log and its entries.
#[derive(Debug, Serialize)]
pub struct BalanceLogDetail {
    /// The log.
    #[serde(flatten)]
    pub log: BalanceLog,
    /// Credit and debit entries.
    pub entries: Vec<BalanceLogEntry>,
}

/// Get a transaction by reference.
pub async fn get_transaction(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
) -> Result<ApiResponse<TransactionDetail>, ApiError> {
    let transaction = state
        .store
        .get_transaction_by_reference(&reference)?
        .ok_or_else(|| ApiError::TransactionNotFound(reference.clone()))?;

    let balance_logs = state
        .store
        .list_balance_logs_by_transaction(&transaction.id)?
        .into_iter()
        .map(|log| -> Result<BalanceLogDetail, ApiError> {
            let entries = state.store.list_balance_log_entries(&log.id)?;
            Ok(BalanceLogDetail { log, entries })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ApiResponse::ok(
        "Transaction",
        TransactionDetail {
            transaction,
            balance_logs,
        },
    ))
}
