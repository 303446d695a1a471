//! Wallet accounts and their balance buckets.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WalletError};
use crate::ids::AccountId;
use crate::money::approx_eq;

// ============================================================================
// Constants
// ============================================================================

/// Leading digit of every generated account number.
pub const ACCOUNT_NUMBER_PREFIX: &str = "1";

/// Total length of a generated account number.
pub const ACCOUNT_NUMBER_LENGTH: usize = 12;

/// Currency used when none is configured.
pub const DEFAULT_CURRENCY: &str = "KES";

/// One of the four named sub-balances of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    /// Total balance: available + reserved + uncleared.
    Current,
    /// Funds that can be spent.
    Available,
    /// Funds held for in-flight payments.
    Reserved,
    /// Incoming funds not yet confirmed.
    Uncleared,
}

impl Bucket {
    /// All buckets in display order.
    pub const ALL: [Self; 4] = [Self::Current, Self::Available, Self::Reserved, Self::Uncleared];

    /// Lowercase name used in logs and configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Available => "available",
            Self::Reserved => "reserved",
            Self::Uncleared => "uncleared",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A wallet account: one ledger per funding target.
///
/// Balances are only ever changed by workflow transitions running under the
/// account lock. At rest the account satisfies
/// `current == available + reserved + uncleared` within one cent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Internal identifier.
    pub id: AccountId,

    /// Sequential, zero-padded 12-digit account number.
    pub account_number: String,

    /// Key of the entity this wallet belongs to (unique).
    pub funding_target: String,

    /// Total balance.
    pub current: Decimal,

    /// Spendable balance.
    pub available: Decimal,

    /// Balance held for pending payments.
    pub reserved: Decimal,

    /// Balance from unconfirmed topups.
    pub uncleared: Decimal,

    /// Whether the account is active.
    pub is_active: bool,

    /// Frozen accounts cannot initiate payments.
    pub is_frozen: bool,

    /// Incremented on every persisted mutation.
    pub version: u64,

    /// ISO currency code.
    pub currency: String,

    /// When the last transition touched this account.
    pub last_transaction_at: Option<DateTime<Utc>>,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create an empty, active account.
    #[must_use]
    pub fn new(
        account_number: impl Into<String>,
        funding_target: impl Into<String>,
        currency: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: AccountId::generate(),
            account_number: account_number.into(),
            funding_target: funding_target.into(),
            current: Decimal::ZERO,
            available: Decimal::ZERO,
            reserved: Decimal::ZERO,
            uncleared: Decimal::ZERO,
            is_active: true,
            is_frozen: false,
            version: 0,
            currency: currency.into(),
            last_transaction_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Read a bucket balance.
    #[must_use]
    pub fn balance(&self, bucket: Bucket) -> Decimal {
        match bucket {
            Bucket::Current => self.current,
            Bucket::Available => self.available,
            Bucket::Reserved => self.reserved,
            Bucket::Uncleared => self.uncleared,
        }
    }

    /// Overwrite a bucket balance.
    pub fn set_balance(&mut self, bucket: Bucket, value: Decimal) {
        match bucket {
            Bucket::Current => self.current = value,
            Bucket::Available => self.available = value,
            Bucket::Reserved => self.reserved = value,
            Bucket::Uncleared => self.uncleared = value,
        }
    }

    /// Fail with `InsufficientBalance` unless `bucket` holds at least `amount`.
    ///
    /// # Errors
    ///
    /// Returns `WalletError::InsufficientBalance` when the bucket is short.
    pub fn require(&self, bucket: Bucket, amount: Decimal) -> Result<()> {
        let balance = self.balance(bucket);
        if balance < amount {
            return Err(WalletError::InsufficientBalance {
                bucket,
                balance,
                required: amount,
            });
        }
        Ok(())
    }

    /// Sum of the three component buckets.
    #[must_use]
    pub fn component_total(&self) -> Decimal {
        self.available + self.reserved + self.uncleared
    }

    /// Whether `current == available + reserved + uncleared` within tolerance.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        approx_eq(self.current, self.component_total())
    }

    /// Check the at-rest invariants: balanced buckets, none negative.
    ///
    /// # Errors
    ///
    /// Returns `WalletError::InvariantViolation` describing the first breach.
    pub fn validate(&self) -> Result<()> {
        for bucket in Bucket::ALL {
            if self.balance(bucket) < Decimal::ZERO {
                return Err(WalletError::InvariantViolation {
                    account_id: self.id.to_string(),
                    detail: format!("{bucket} balance is negative ({})", self.balance(bucket)),
                });
            }
        }
        if !self.is_balanced() {
            return Err(WalletError::InvariantViolation {
                account_id: self.id.to_string(),
                detail: format!(
                    "current {} != available {} + reserved {} + uncleared {}",
                    self.current, self.available, self.reserved, self.uncleared
                ),
            });
        }
        Ok(())
    }

    /// Bump the version and timestamps after a mutation.
    pub fn touch(&mut self, now: DateTime<Utc>, is_transaction: bool) {
        self.version += 1;
        self.updated_at = now;
        if is_transaction {
            self.last_transaction_at = Some(now);
        }
    }
}

/// Format a numeric account number: prefix, zero padding, sequence.
///
/// Returns `None` when the sequence does not fit in the fixed width.
#[must_use]
pub fn format_account_number(sequence: u64) -> Option<String> {
    let width = ACCOUNT_NUMBER_LENGTH - ACCOUNT_NUMBER_PREFIX.len();
    let digits = sequence.to_string();
    if digits.len() > width {
        return None;
    }
    Some(format!("{ACCOUNT_NUMBER_PREFIX}{digits:0>width$}"))
}

/// The account number that follows `highest`, the largest numeric number in use.
///
/// When no numeric account number exists yet the first number is
/// `prefix + zeros + 1`. Returns `None` when the sequence space is exhausted.
#[must_use]
pub fn next_account_number(highest: Option<u64>) -> Option<String> {
    match highest {
        None => format_account_number(1),
        Some(highest) => {
            let next = highest.checked_add(1)?;
            let rendered = next.to_string();
            if rendered.len() == ACCOUNT_NUMBER_LENGTH {
                Some(rendered)
            } else {
                // Legacy numbers without the prefix are re-anchored under it.
                format_account_number(next)
            }
        }
    }
}
