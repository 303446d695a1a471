//! Execution records of rule-profile runs.
//!
//! A [`BalanceLog`] describes one executor invocation; each credit or debit
//! made inside it is a [`BalanceLogEntry`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::account::Bucket;
use crate::ids::{AccountId, BalanceLogEntryId, BalanceLogId, TransactionId};

/// State of a balance log or one of its entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogState {
    /// Execution in progress.
    Active,
    /// Execution finished successfully.
    Completed,
    /// Execution aborted.
    Failed,
}

impl LogState {
    /// Whether the state is final.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

/// Credit or debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    /// Credit.
    Cr,
    /// Debit.
    Dr,
}

/// Aggregate record of one rule-profile execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceLog {
    /// Record identifier.
    pub id: BalanceLogId,

    /// Account the execution ran against.
    pub account_id: AccountId,

    /// Transaction that triggered the execution.
    pub transaction_id: TransactionId,

    /// Name of the balance entry type (the executor name).
    pub balance_entry_type: String,

    /// Transaction reference.
    pub reference: String,

    /// Description passed by the caller.
    pub description: String,

    /// Provider receipt, when known.
    pub receipt: Option<String>,

    /// Amount processed.
    pub amount: Decimal,

    /// Snapshot of the account's total balance at execution time.
    pub total_balance: Decimal,

    /// Execution state.
    pub state: LogState,

    /// Failure message, set when the state is `Failed`.
    pub failure: Option<String>,

    /// When the execution started.
    pub created_at: DateTime<Utc>,

    /// When the state last changed.
    pub updated_at: DateTime<Utc>,
}

impl BalanceLog {
    /// Mark the log with a terminal state.
    pub fn finish(&mut self, state: LogState, now: DateTime<Utc>) {
        self.state = state;
        self.updated_at = now;
    }

    /// Mark the log Failed with a message.
    pub fn fail(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.failure = Some(message.into());
        self.finish(LogState::Failed, now);
    }
}

/// One credit or debit made during an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceLogEntry {
    /// Entry identifier.
    pub id: BalanceLogEntryId,

    /// Parent balance log.
    pub balance_log_id: BalanceLogId,

    /// Account the entry was posted against.
    pub account_id: AccountId,

    /// Credit or debit.
    pub entry_type: EntryType,

    /// Bucket the entry was posted to.
    pub bucket: Bucket,

    /// Rounded amount.
    pub amount: Decimal,

    /// Bucket balance before the entry.
    pub balance_before: Decimal,

    /// Bucket balance after the entry.
    pub balance_after: Decimal,

    /// Entry state.
    pub state: LogState,

    /// When the entry was posted.
    pub created_at: DateTime<Utc>,
}
