//! Background reconciliation of Pending transactions.
//!
//! Pending topups and payments younger than the configured TTL are polled
//! against the payment provider. A confirmed transfer is approved with the
//! provider's receipt; anything else leaves the transaction Pending for the
//! next pass or the provider callback. Older transactions are left for
//! manual review.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use wallet_core::{Resolution, Settlement, TransactionType};

use crate::error::ApiError;
use crate::state::AppState;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Transactions polled.
    pub checked: usize,
    /// Transactions approved.
    pub approved: usize,
    /// Polls that failed.
    pub errors: usize,
}

/// Spawn the interval task. Returns `None` without a payment gateway.
pub fn spawn_reconciler(state: Arc<AppState>) -> Option<JoinHandle<()>> {
    if !state.has_payments() {
        return None;
    }
    let period = Duration::from_secs(state.config.reconcile_interval_seconds.max(1));
    tracing::info!(interval_seconds = period.as_secs(), "Reconciliation job started");

    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match reconcile_pending(&state).await {
                Ok(summary) if summary.checked > 0 => {
                    tracing::info!(
                        checked = summary.checked,
                        approved = summary.approved,
                        errors = summary.errors,
                        "Reconciliation pass finished"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Reconciliation pass failed"),
            }
        }
    }))
}

/// Run one pass over the Pending transactions.
pub async fn reconcile_pending(state: &AppState) -> Result<ReconcileSummary, ApiError> {
    let mut summary = ReconcileSummary::default();
    let Some(gateway) = &state.payments else {
        return Ok(summary);
    };

    let cutoff = Utc::now() - chrono::Duration::minutes(state.config.reconcile_ttl_minutes);
    let pending: Vec<_> = state
        .store
        .list_pending_transactions(cutoff)?
        .into_iter()
        .filter(|t| {
            matches!(
                t.transaction_type,
                TransactionType::Topup | TransactionType::Payment
            )
        })
        .collect();

    for transaction in pending {
        summary.checked += 1;
        let result = match gateway.query_status(&transaction.reference).await {
            Ok(result) => result,
            Err(e) => {
                summary.errors += 1;
                tracing::warn!(
                    reference = %transaction.reference,
                    error = %e,
                    "Status query failed"
                );
                continue;
            }
        };

        let receipt = result.transaction_id.as_deref().filter(|r| !r.is_empty());
        let Some(receipt) = receipt.filter(|_| result.is_success()) else {
            tracing::debug!(
                reference = %transaction.reference,
                result_code = ?result.result_code,
                "Transaction not confirmed yet"
            );
            continue;
        };

        let settled = state
            .engine
            .settle(
                transaction.transaction_type,
                Resolution::Approve,
                &Settlement {
                    reference: &transaction.reference,
                    amount: None,
                    receipt: Some(receipt),
                    note: result.result_desc.as_deref(),
                },
            )
            .await;
        match settled {
            Ok(_) => summary.approved += 1,
            Err(e) => {
                summary.errors += 1;
                tracing::warn!(
                    reference = %transaction.reference,
                    error = %e,
                    "Approval after status query failed"
                );
            }
        }
    }

    Ok(summary)
}
