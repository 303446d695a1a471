//! The unit of work committed atomically by the store.

use crate::account::Account;
use crate::action_log::ActionLogEntry;
use crate::balance_log::{BalanceLog, BalanceLogEntry};
use crate::transaction::Transaction;

/// Every record produced by one workflow step.
///
/// Storage backends apply a batch all-or-nothing: either every record lands
/// or none does.
#[derive(Debug, Clone, Default)]
pub struct LedgerBatch {
    /// Accounts to upsert.
    pub accounts: Vec<Account>,
    /// Transactions to upsert.
    pub transactions: Vec<Transaction>,
    /// Action-log rows to append.
    pub actions: Vec<ActionLogEntry>,
    /// Balance logs to upsert.
    pub balance_logs: Vec<BalanceLog>,
    /// Balance-log entries to upsert.
    pub balance_log_entries: Vec<BalanceLogEntry>,
}

impl LedgerBatch {
    /// Create an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the batch holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
            && self.transactions.is_empty()
            && self.actions.is_empty()
            && self.balance_logs.is_empty()
            && self.balance_log_entries.is_empty()
    }

    /// Move every record of `other` into this batch.
    pub fn merge(&mut self, other: Self) {
        self.accounts.extend(other.accounts);
        self.transactions.extend(other.transactions);
        self.actions.extend(other.actions);
        self.balance_logs.extend(other.balance_logs);
        self.balance_log_entries.extend(other.balance_log_entries);
    }
}
