//! Core types and ledger logic for the wallet service.
//!
//! This crate holds everything that does not touch storage or the network:
//!
//! - **Accounts**: `Account` with its four balance buckets
//! - **Workflow**: the six topup/payment transitions plus freeze/unfreeze
//! - **Charges**: the progressive collection charge table
//! - **Ledger**: `BalanceLedger`, `BalanceLog` and `BalanceLogEntry`
//! - **Rule profiles**: `RuleBook`, `ProcessorRegistry`, `RuleProfileExecutor`
//! - **Rate limiting**: rules, scope keys, windows and decisions
//! - **Gateway records**: `ApiClient`, `SystemKey`, `Session`, `RequestLog`
//!
//! # Balance invariant
//!
//! For every account, at every commit:
//!
//! `current = available + reserved + uncleared` (within 0.01)
//!
//! Amounts are `rust_decimal::Decimal` with two decimal places.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod action_log;
pub mod balance_log;
pub mod batch;
pub mod charges;
pub mod client;
pub mod error;
pub mod executor;
pub mod ids;
pub mod ledger;
pub mod money;
pub mod processors;
pub mod rate_limit;
pub mod reconcile;
pub mod reference;
pub mod request_log;
pub mod rules;
pub mod transaction;
pub mod workflow;

pub use account::{
    format_account_number, next_account_number, Account, Bucket, ACCOUNT_NUMBER_LENGTH,
    ACCOUNT_NUMBER_PREFIX, DEFAULT_CURRENCY,
};
pub use action_log::{ActionLogEntry, ActionType, WorkflowStep};
pub use balance_log::{BalanceLog, BalanceLogEntry, EntryType, LogState};
pub use batch::LedgerBatch;
pub use charges::{collection_charge, ChargeTier, CHARGE_TIERS};
pub use client::{generate_api_key, ApiClient, Session, SystemKey};
pub use error::{Result, WalletError};
pub use executor::{
    ExecutionError, ExecutionOutcome, ExecutionReport, ExecutionRequest, RuleProfileExecutor,
    SkipReason, StepFailure,
};
pub use ids::{
    AccountId, ActionLogId, ApiClientId, BalanceLogEntryId, BalanceLogId, IdError, RequestId,
    RuleId, TransactionId,
};
pub use ledger::{remark_history, BalanceLedger, LedgerError};
pub use money::{approx_eq, round_money, validate_amount, BALANCE_TOLERANCE, MAX_AMOUNT};
pub use processors::{Processor, ProcessorError, ProcessorRegistry, StepContext};
pub use rate_limit::{
    RateLimitAttempt, RateLimitBlock, RateLimitDecision, RateLimitRule, RateLimitScope,
    RateLimitSubject, RatePeriod,
};
pub use reconcile::{
    health_report, reconcile_account, BucketBalances, BucketDiscrepancy, HealthReport,
    ReconciliationReport,
};
pub use reference::ReferenceGenerator;
pub use request_log::{truncate_body, RequestLog, MAX_LOGGED_RESPONSE_CHARS};
pub use rules::{ProfileScope, RuleBook, RuleProfile, RuleProfileCommand};
pub use transaction::{Transaction, TransactionStatus, TransactionType};
pub use workflow::{
    freeze, initiate_payment, initiate_topup, payment_approved, payment_rejected, settle,
    topup_approved, topup_rejected, unfreeze, Initiation, Resolution, Settlement,
    TransitionOutcome,
};
