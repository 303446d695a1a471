//! Wallet health checks.
//!
//! [`reconcile_account`] replays an account's action log from zero and
//! compares the result with the stored buckets. [`health_report`] aggregates
//! system-wide figures.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::account::{Account, Bucket};
use crate::action_log::ActionLogEntry;
use crate::money::approx_eq;
use crate::transaction::{Transaction, TransactionStatus};

/// The four bucket values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BucketBalances {
    /// Total balance.
    pub current: Decimal,
    /// Spendable balance.
    pub available: Decimal,
    /// Held balance.
    pub reserved: Decimal,
    /// Unconfirmed balance.
    pub uncleared: Decimal,
}

impl BucketBalances {
    /// Buckets of an account.
    #[must_use]
    pub fn of(account: &Account) -> Self {
        Self {
            current: account.current,
            available: account.available,
            reserved: account.reserved,
            uncleared: account.uncleared,
        }
    }

    /// Read one bucket.
    #[must_use]
    pub fn get(&self, bucket: Bucket) -> Decimal {
        match bucket {
            Bucket::Current => self.current,
            Bucket::Available => self.available,
            Bucket::Reserved => self.reserved,
            Bucket::Uncleared => self.uncleared,
        }
    }

    fn add(&mut self, bucket: Bucket, delta: Decimal) {
        let slot = match bucket {
            Bucket::Current => &mut self.current,
            Bucket::Available => &mut self.available,
            Bucket::Reserved => &mut self.reserved,
            Bucket::Uncleared => &mut self.uncleared,
        };
        *slot += delta;
    }
}

/// A bucket whose stored value disagrees with the replayed one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketDiscrepancy {
    /// The bucket.
    pub bucket: Bucket,
    /// Stored value.
    pub stored: Decimal,
    /// Value recomputed from the action log.
    pub expected: Decimal,
}

/// Result of reconciling one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    /// Account number.
    pub account_number: String,
    /// Stored buckets.
    pub stored: BucketBalances,
    /// Buckets replayed from the action log.
    pub replayed: BucketBalances,
    /// Buckets that differ by more than the tolerance.
    pub discrepancies: Vec<BucketDiscrepancy>,
    /// Whether the stored buckets satisfy the balance invariant.
    pub invariant_holds: bool,
    /// Action-log rows replayed.
    pub actions_replayed: usize,
}

impl ReconciliationReport {
    /// Whether the account is fully consistent.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.invariant_holds && self.discrepancies.is_empty()
    }
}

/// Replay `actions` from zero and compare with `account`.
#[must_use]
pub fn reconcile_account(account: &Account, actions: &[ActionLogEntry]) -> ReconciliationReport {
    let mut replayed = BucketBalances::default();
    for action in actions {
        replayed.add(action.action_type.bucket(), action.action_type.signed(action.amount));
    }

    let stored = BucketBalances::of(account);
    let discrepancies = Bucket::ALL
        .into_iter()
        .filter(|&bucket| !approx_eq(stored.get(bucket), replayed.get(bucket)))
        .map(|bucket| BucketDiscrepancy {
            bucket,
            stored: stored.get(bucket),
            expected: replayed.get(bucket),
        })
        .collect();

    ReconciliationReport {
        account_number: account.account_number.clone(),
        stored,
        replayed,
        discrepancies,
        invariant_holds: account.is_balanced(),
        actions_replayed: actions.len(),
    }
}

/// System-wide wallet figures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// When the report was built.
    pub generated_at: DateTime<Utc>,
    /// All accounts.
    pub total_accounts: usize,
    /// Active accounts.
    pub active_accounts: usize,
    /// Frozen accounts.
    pub frozen_accounts: usize,
    /// Sum of every account's buckets.
    pub totals: BucketBalances,
    /// Pending transactions.
    pub pending_transactions: usize,
    /// Completed transactions.
    pub completed_transactions: usize,
    /// Failed transactions.
    pub failed_transactions: usize,
    /// Account numbers breaking the balance invariant.
    pub unbalanced_accounts: Vec<String>,
}

impl HealthReport {
    /// Whether no account breaks the invariant.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.unbalanced_accounts.is_empty()
    }
}

/// Aggregate accounts and transactions into a [`HealthReport`].
pub fn health_report<'a>(
    accounts: &[Account],
    transactions: impl IntoIterator<Item = &'a Transaction>,
    now: DateTime<Utc>,
) -> HealthReport {
    let mut totals = BucketBalances::default();
    for account in accounts {
        for bucket in Bucket::ALL {
            totals.add(bucket, account.balance(bucket));
        }
    }

    let (mut pending, mut completed, mut failed) = (0, 0, 0);
    for transaction in transactions {
        match transaction.status {
            TransactionStatus::Pending => pending += 1,
            TransactionStatus::Completed => completed += 1,
            TransactionStatus::Failed => failed += 1,
        }
    }

    HealthReport {
        generated_at: now,
        total_accounts: accounts.len(),
        active_accounts: accounts.iter().filter(|a| a.is_active).count(),
        frozen_accounts: accounts.iter().filter(|a| a.is_frozen).count(),
        totals,
        pending_transactions: pending,
        completed_transactions: completed,
        failed_transactions: failed,
        unbalanced_accounts: accounts
            .iter()
            .filter(|a| !a.is_balanced())
            .map(|a| a.account_number.clone())
            .collect(),
    }
}
