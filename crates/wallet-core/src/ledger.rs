//! Credit/debit primitives against a single bucket.
//!
//! The ledger never persists the account: it computes `old ± amount`, records
//! a [`BalanceLogEntry`] and returns the new value. Keeping the account in step
//! is the workflow engine's job.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::account::{Account, Bucket};
use crate::balance_log::{BalanceLog, BalanceLogEntry, EntryType, LogState};
use crate::ids::BalanceLogEntryId;
use crate::money::round_money;

/// Why a ledger posting had no effect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// The balance log no longer accepts entries.
    #[error("balance log {0} is closed")]
    LogClosed(String),

    /// The account is not the one the balance log was opened for.
    #[error("account {account_id} does not belong to balance log {log_id}")]
    AccountMismatch {
        /// Account passed to the posting.
        account_id: String,
        /// Open balance log.
        log_id: String,
    },

    /// Negative amounts cannot be posted.
    #[error("cannot post negative amount {0}")]
    NegativeAmount(Decimal),
}

/// The entries posted during one executor run.
#[derive(Debug, Clone)]
pub struct BalanceLedger {
    log: BalanceLog,
    entries: Vec<BalanceLogEntry>,
}

impl BalanceLedger {
    /// Open a ledger for an Active balance log.
    #[must_use]
    pub fn open(log: BalanceLog) -> Self {
        Self {
            log,
            entries: Vec::new(),
        }
    }

    /// The balance log this ledger posts under.
    #[must_use]
    pub fn log(&self) -> &BalanceLog {
        &self.log
    }

    /// Entries posted so far.
    #[must_use]
    pub fn entries(&self) -> &[BalanceLogEntry] {
        &self.entries
    }

    /// Credit `amount` to `bucket`, returning the new bucket balance.
    ///
    /// # Errors
    ///
    /// Returns a `LedgerError` when the posting is rejected; nothing is recorded.
    pub fn credit(
        &mut self,
        account: &Account,
        bucket: Bucket,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Decimal, LedgerError> {
        self.post(account, bucket, EntryType::Cr, amount, now)
    }

    /// Debit `amount` from `bucket`, returning the new bucket balance.
    ///
    /// The result may be negative; callers check balances beforehand.
    ///
    /// # Errors
    ///
    /// Returns a `LedgerError` when the posting is rejected; nothing is recorded.
    pub fn debit(
        &mut self,
        account: &Account,
        bucket: Bucket,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Decimal, LedgerError> {
        self.post(account, bucket, EntryType::Dr, amount, now)
    }

    fn post(
        &mut self,
        account: &Account,
        bucket: Bucket,
        entry_type: EntryType,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Decimal, LedgerError> {
        if self.log.state != LogState::Active {
            return Err(LedgerError::LogClosed(self.log.id.to_string()));
        }
        if self.log.account_id != account.id {
            return Err(LedgerError::AccountMismatch {
                account_id: account.id.to_string(),
                log_id: self.log.id.to_string(),
            });
        }
        let amount = round_money(amount);
        if amount < Decimal::ZERO {
            return Err(LedgerError::NegativeAmount(amount));
        }

        let before = account.balance(bucket);
        let after = match entry_type {
            EntryType::Cr => before + amount,
            EntryType::Dr => before - amount,
        };

        self.entries.push(BalanceLogEntry {
            id: BalanceLogEntryId::generate(),
            balance_log_id: self.log.id,
            account_id: account.id,
            entry_type,
            bucket,
            amount,
            balance_before: before,
            balance_after: after,
            state: LogState::Completed,
            created_at: now,
        });

        Ok(after)
    }

    /// Close the ledger with a terminal state.
    ///
    /// A Failed run keeps its log but drops the entries: they describe
    /// postings that were rolled back.
    #[must_use]
    pub fn close(mut self, state: LogState, now: DateTime<Utc>) -> (BalanceLog, Vec<BalanceLogEntry>) {
        self.log.finish(state, now);
        if state == LogState::Failed {
            self.entries.clear();
        }
        (self.log, self.entries)
    }

    /// Close the ledger as Failed with a message.
    #[must_use]
    pub fn fail(mut self, message: &str, now: DateTime<Utc>) -> BalanceLog {
        self.log.fail(message, now);
        self.log
    }
}

/// Re-mark historical balance logs of a transaction and their entries.
///
/// Used by approve/reject to carry the transaction's final outcome onto every
/// execution record it produced.
pub fn remark_history(
    logs: &mut [BalanceLog],
    entries: &mut [BalanceLogEntry],
    state: LogState,
    now: DateTime<Utc>,
) {
    for log in logs.iter_mut() {
        log.finish(state, now);
    }
    for entry in entries.iter_mut() {
        entry.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::DEFAULT_CURRENCY;
    use crate::ids::{BalanceLogId, TransactionId};
    use rust_decimal_macros::dec;

    fn open_for(account: &Account) -> BalanceLedger {
        let now = Utc::now();
        BalanceLedger::open(BalanceLog {
            id: BalanceLogId::generate(),
            account_id: account.id,
            transaction_id: TransactionId::generate(),
            balance_entry_type: "InitiateTopup".into(),
            reference: "T1".into(),
            description: "test".into(),
            receipt: None,
            amount: dec!(10),
            total_balance: account.current,
            state: LogState::Active,
            failure: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn account() -> Account {
        let mut account = Account::new("100000000001", "merchant-1", DEFAULT_CURRENCY);
        account.available = dec!(20);
        account.current = dec!(20);
        account
    }

    #[test]
    fn credit_and_debit_return_new_balances() {
        let account = account();
        let mut ledger = open_for(&account);
        let now = Utc::now();

        assert_eq!(
            ledger.credit(&account, Bucket::Uncleared, dec!(10), now),
            Ok(dec!(10))
        );
        assert_eq!(
            ledger.debit(&account, Bucket::Available, dec!(5.555), now),
            Ok(dec!(14.44))
        );

        let entries = ledger.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].entry_type, EntryType::Cr);
        assert_eq!(entries[1].entry_type, EntryType::Dr);
        assert_eq!(entries[1].amount, dec!(5.56));
        assert!(entries.iter().all(|e| e.state == LogState::Completed));
        // The account itself is untouched.
        assert_eq!(account.available, dec!(20));
    }

    #[test]
    fn debit_is_not_clamped() {
        let account = account();
        let mut ledger = open_for(&account);
        assert_eq!(
            ledger.debit(&account, Bucket::Reserved, dec!(3), Utc::now()),
            Ok(dec!(-3))
        );
    }

    #[test]
    fn foreign_account_is_rejected() {
        let account = account();
        let other = Account::new("100000000002", "merchant-2", DEFAULT_CURRENCY);
        let mut ledger = open_for(&account);
        assert!(matches!(
            ledger.credit(&other, Bucket::Current, dec!(1), Utc::now()),
            Err(LedgerError::AccountMismatch { .. })
        ));
        assert!(ledger.entries().is_empty());
    }

    #[test]
    fn closed_log_accepts_nothing() {
        let account = account();
        let mut ledger = open_for(&account);
        ledger.log.finish(LogState::Completed, Utc::now());
        assert!(matches!(
            ledger.credit(&account, Bucket::Current, dec!(1), Utc::now()),
            Err(LedgerError::LogClosed(_))
        ));
    }

    #[test]
    fn failed_close_drops_entries() {
        let account = account();
        let mut ledger = open_for(&account);
        let now = Utc::now();
        ledger
            .credit(&account, Bucket::Current, dec!(1), now)
            .unwrap();
        let (log, entries) = ledger.close(LogState::Failed, now);
        assert_eq!(log.state, LogState::Failed);
        assert!(entries.is_empty());
    }

    #[test]
    fn remark_history_updates_logs_and_entries() {
        let account = account();
        let mut ledger = open_for(&account);
        let now = Utc::now();
        ledger
            .credit(&account, Bucket::Current, dec!(1), now)
            .unwrap();
        let (log, entries) = ledger.close(LogState::Completed, now);
        let mut logs = vec![log];
        let mut entries = entries;
        remark_history(&mut logs, &mut entries, LogState::Failed, now);
        assert_eq!(logs[0].state, LogState::Failed);
        assert_eq!(entries[0].state, LogState::Failed);
    }
}
