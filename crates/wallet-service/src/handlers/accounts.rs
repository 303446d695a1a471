//! Account management handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use wallet_core::{Account, ActionLogEntry, ReconciliationReport, Transaction};

use super::{parse_account_id, ListQuery};
use crate::error::ApiError;
use crate::response::ApiResponse;
use crate::state::AppState;

/// Account response.
#[derive(Debug, Serialize)]
pub struct AccountResponse {
    /// Account id.
    pub id: String,
    /// 12-digit account number.
    pub account_number: String,
    /// Owner key.
    pub funding_target: String,
    /// ISO currency code.
    pub currency: String,
    /// Total balance.
    pub current: Decimal,
    /// Spendable balance.
    pub available: Decimal,
    /// Held for pending payments.
    pub reserved: Decimal,
    /// From unconfirmed topups.
    pub uncleared: Decimal,
    /// Whether the account is active.
    pub is_active: bool,
    /// Whether the account is frozen.
    pub is_frozen: bool,
    /// Last transition time.
    pub last_transaction_at: Option<String>,
    /// Created timestamp.
    pub created_at: String,
}

impl From<&Account> for AccountResponse {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id.to_string(),
            account_number: account.account_number.clone(),
            funding_target: account.funding_target.clone(),
            currency: account.currency.clone(),
            current: account.current,
            available: account.available,
            reserved: account.reserved,
            uncleared: account.uncleared,
            is_active: account.is_active,
            is_frozen: account.is_frozen,
            last_transaction_at: account.last_transaction_at.map(|t| t.to_rfc3339()),
            created_at: account.created_at.to_rfc3339(),
        }
    }
}

/// Create account request.
#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    /// Key of the entity the wallet belongs to.
    pub funding_target: String,
    /// Currency; the configured default when omitted.
    #[serde(default)]
    pub currency: Option<String>,
}

/// Create the account of a funding target.
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateAccountRequest>,
) -> Result<ApiResponse<AccountResponse>, ApiError> {
    let funding_target = body.funding_target.trim();
    if funding_target.is_empty() {
        return Err(ApiError::BadRequest("funding_target is required".into()));
    }
    let currency = body
        .currency
        .as_deref()
        .unwrap_or(&state.config.default_currency);

    let account = state.engine.create_account(funding_target, currency).await?;
    Ok(ApiResponse::created(
        "Account created",
        AccountResponse::from(&account),
    ))
}

/// Get an account with its balances.
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
) -> Result<ApiResponse<AccountResponse>, ApiError> {
    let account_id = parse_account_id(&account_id)?;
    let account = state.engine.accounts().get(&account_id)?;
    Ok(ApiResponse::ok("Account", AccountResponse::from(&account)))
}

/// Freeze an account.
pub async fn freeze_account(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
) -> Result<ApiResponse<AccountResponse>, ApiError> {
    let account_id = parse_account_id(&account_id)?;
    let account = state.engine.set_frozen(&account_id, true).await?;
    Ok(ApiResponse::ok("Account frozen", AccountResponse::from(&account)))
}

/// Unfreeze an account.
pub async fn unfreeze_account(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
) -> Result<ApiResponse<AccountResponse>, ApiError> {
    let account_id = parse_account_id(&account_id)?;
    let account = state.engine.set_frozen(&account_id, false).await?;
    Ok(ApiResponse::ok(
        "Account unfrozen",
        AccountResponse::from(&account),
    ))
}

/// List an account's action log, newest first.
pub async fn list_actions(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<ApiResponse<Vec<ActionLogEntry>>, ApiError> {
    let account_id = parse_account_id(&account_id)?;
    state.engine.accounts().get(&account_id)?;

    let mut actions = state.store.list_actions_by_account(&account_id)?;
    actions.reverse();
    if let Some(limit) = query.limit {
        actions.truncate(limit);
    }
    Ok(ApiResponse::ok("Workflow actions", actions))
}

/// List an account's transactions, newest first.
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<ApiResponse<Vec<Transaction>>, ApiError> {
    let account_id = parse_account_id(&account_id)?;
    state.engine.accounts().get(&account_id)?;

    let transactions = state
        .store
        .list_transactions_by_account(&account_id, query.limit)?;
    Ok(ApiResponse::ok("Transactions", transactions))
}

/// Replay the action log against the stored balances.
pub async fn reconcile_account(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
) -> Result<ApiResponse<ReconciliationReport>, ApiError> {
    let account_id = parse_account_id(&account_id)?;
    let report = state.engine.reconcile(&account_id).await?;
    Ok(ApiResponse::ok("Reconciliation", report))
}
