//! Wallet transactions.
//!
//! A [`Transaction`] is created Pending by an initiate step and mutated exactly
//! once more, by approve (Completed) or reject (Failed).

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::{AccountId, TransactionId};

/// Kind of money movement a transaction represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Money coming into the wallet.
    Topup,
    /// Money leaving the wallet.
    Payment,
    /// Manual correction.
    Adjustment,
    /// Money returned to the wallet.
    Refund,
}

impl TransactionType {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Topup => "topup",
            Self::Payment => "payment",
            Self::Adjustment => "adjustment",
            Self::Refund => "refund",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Initiated, waiting for approval or rejection.
    Pending,
    /// Approved.
    Completed,
    /// Rejected.
    Failed,
}

impl TransactionStatus {
    /// Whether no further transition is allowed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// One topup or payment workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Internal identifier (ULID, time-ordered).
    pub id: TransactionId,

    /// Owning account.
    pub account_id: AccountId,

    /// Kind of movement.
    pub transaction_type: TransactionType,

    /// Amount moved.
    pub amount: Decimal,

    /// Primary balance before the initiating transition.
    pub balance_before: Decimal,

    /// Primary balance after the most recent transition.
    pub balance_after: Decimal,

    /// External reference (unique across transactions).
    pub reference: String,

    /// Receipt number issued by the payment provider.
    pub receipt_id: Option<String>,

    /// Free-text description.
    pub description: String,

    /// Lifecycle status.
    pub status: TransactionStatus,

    /// Audit metadata: before/after pairs for every bucket touched.
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// When the transaction was initiated.
    pub created_at: DateTime<Utc>,

    /// When the transaction was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Create a Pending transaction.
    #[must_use]
    pub fn pending(
        account_id: AccountId,
        transaction_type: TransactionType,
        amount: Decimal,
        reference: impl Into<String>,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            account_id,
            transaction_type,
            amount,
            balance_before: Decimal::ZERO,
            balance_after: Decimal::ZERO,
            reference: reference.into(),
            receipt_id: None,
            description: description.into(),
            status: TransactionStatus::Pending,
            metadata: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this is a Pending transaction of the given type.
    #[must_use]
    pub fn is_pending(&self, transaction_type: TransactionType) -> bool {
        self.status == TransactionStatus::Pending && self.transaction_type == transaction_type
    }

    /// Record a before/after pair under `section` in the metadata map.
    ///
    /// Each workflow step writes its own section so later steps never
    /// overwrite the audit values of earlier ones.
    pub fn record_change(&mut self, section: &str, field: &str, before: Decimal, after: Decimal) {
        let entry = self
            .metadata
            .entry(section.to_string())
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
        if let serde_json::Value::Object(map) = entry {
            map.insert(format!("{field}_before"), before.to_string().into());
            map.insert(format!("{field}_after"), after.to_string().into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn pending_transaction_defaults() {
        let tx = Transaction::pending(
            AccountId::generate(),
            TransactionType::Topup,
            dec!(50),
            "REF1",
            "Topup",
            Utc::now(),
        );
        assert!(tx.is_pending(TransactionType::Topup));
        assert!(!tx.is_pending(TransactionType::Payment));
        assert!(!tx.status.is_terminal());
        assert!(tx.metadata.is_empty());
    }

    #[test]
    fn record_change_writes_string_pairs() {
        let mut tx = Transaction::pending(
            AccountId::generate(),
            TransactionType::Payment,
            dec!(10),
            "REF2",
            "Payment",
            Utc::now(),
        );
        tx.record_change("initiate_payment", "available", dec!(100.00), dec!(90.00));
        tx.record_change("initiate_payment", "reserved", dec!(0.00), dec!(10.00));
        let section = &tx.metadata["initiate_payment"];
        assert_eq!(section["available_before"], "100.00");
        assert_eq!(section["available_after"], "90.00");
        assert_eq!(section["reserved_after"], "10.00");
    }

    #[test]
    fn type_serializes_snake_case() {
        let json = serde_json::to_string(&TransactionType::Topup).unwrap();
        assert_eq!(json, "\"topup\"");
    }
}
