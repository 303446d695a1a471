//! Append-only action log: one row per bucket movement.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::account::Bucket;
use crate::ids::{AccountId, ActionLogId, TransactionId};

/// Direction and bucket of a single movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Credit to `uncleared`.
    MoneyToUncleared,
    /// Credit to `current`.
    MoneyToCurrent,
    /// Debit from `uncleared`.
    MoneyFromUncleared,
    /// Credit to `available`.
    MoneyToAvailable,
    /// Debit from `available`.
    MoneyFromAvailable,
    /// Credit to `reserved`.
    MoneyToReserved,
    /// Debit from `reserved`.
    MoneyFromReserved,
    /// Debit from `current`.
    MoneyFromCurrent,
}

impl ActionType {
    /// The action type for moving money into `bucket`.
    #[must_use]
    pub const fn into_bucket(bucket: Bucket) -> Self {
        match bucket {
            Bucket::Current => Self::MoneyToCurrent,
            Bucket::Available => Self::MoneyToAvailable,
            Bucket::Reserved => Self::MoneyToReserved,
            Bucket::Uncleared => Self::MoneyToUncleared,
        }
    }

    /// The action type for moving money out of `bucket`.
    #[must_use]
    pub const fn out_of_bucket(bucket: Bucket) -> Self {
        match bucket {
            Bucket::Current => Self::MoneyFromCurrent,
            Bucket::Available => Self::MoneyFromAvailable,
            Bucket::Reserved => Self::MoneyFromReserved,
            Bucket::Uncleared => Self::MoneyFromUncleared,
        }
    }

    /// The bucket this action touches.
    #[must_use]
    pub const fn bucket(self) -> Bucket {
        match self {
            Self::MoneyToCurrent | Self::MoneyFromCurrent => Bucket::Current,
            Self::MoneyToAvailable | Self::MoneyFromAvailable => Bucket::Available,
            Self::MoneyToReserved | Self::MoneyFromReserved => Bucket::Reserved,
            Self::MoneyToUncleared | Self::MoneyFromUncleared => Bucket::Uncleared,
        }
    }

    /// Whether the movement adds money to its bucket.
    #[must_use]
    pub const fn is_credit(self) -> bool {
        matches!(
            self,
            Self::MoneyToCurrent
                | Self::MoneyToAvailable
                | Self::MoneyToReserved
                | Self::MoneyToUncleared
        )
    }

    /// Signed effect of `amount` on the bucket.
    #[must_use]
    pub fn signed(self, amount: Decimal) -> Decimal {
        if self.is_credit() {
            amount
        } else {
            -amount
        }
    }
}

/// The workflow transition that produced an action-log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    /// `initiate_topup`
    InitiateTopup,
    /// `topup_approved`
    TopupApproved,
    /// `topup_rejected`
    TopupRejected,
    /// `initiate_payment`
    InitiatePayment,
    /// `payment_approved`
    PaymentApproved,
    /// `payment_rejected`
    PaymentRejected,
}

impl WorkflowStep {
    /// Snake-case transition name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InitiateTopup => "initiate_topup",
            Self::TopupApproved => "topup_approved",
            Self::TopupRejected => "topup_rejected",
            Self::InitiatePayment => "initiate_payment",
            Self::PaymentApproved => "payment_approved",
            Self::PaymentRejected => "payment_rejected",
        }
    }

    /// Name of the rule-profile executor run after this transition.
    #[must_use]
    pub const fn executor_name(self) -> &'static str {
        match self {
            Self::InitiateTopup => "InitiateTopup",
            Self::TopupApproved => "ApproveTopupTransaction",
            Self::TopupRejected => "RejectTopupTransaction",
            Self::InitiatePayment => "InitiatePayment",
            Self::PaymentApproved => "ApprovePaymentTransaction",
            Self::PaymentRejected => "RejectPaymentTransaction",
        }
    }
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One bucket movement inside a transaction. Never mutated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    /// Row identifier (ULID, time-ordered).
    pub id: ActionLogId,

    /// Account whose bucket moved.
    pub account_id: AccountId,

    /// Parent transaction.
    pub transaction_id: TransactionId,

    /// Parent transaction reference, denormalized for lookups.
    pub reference: String,

    /// Direction and bucket.
    pub action_type: ActionType,

    /// Amount moved.
    pub amount: Decimal,

    /// Bucket balance before the movement.
    pub balance_before: Decimal,

    /// Bucket balance after the movement.
    pub balance_after: Decimal,

    /// Transition that produced the row.
    pub workflow_step: WorkflowStep,

    /// Position within the transaction's trail, starting at 1.
    pub sequence: u32,

    /// Human-readable description.
    pub description: String,

    /// When the movement happened.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn action_types_map_to_buckets() {
        for bucket in Bucket::ALL {
            assert_eq!(ActionType::into_bucket(bucket).bucket(), bucket);
            assert_eq!(ActionType::out_of_bucket(bucket).bucket(), bucket);
            assert!(ActionType::into_bucket(bucket).is_credit());
            assert!(!ActionType::out_of_bucket(bucket).is_credit());
        }
    }

    #[test]
    fn signed_amounts() {
        assert_eq!(ActionType::MoneyToReserved.signed(dec!(5)), dec!(5));
        assert_eq!(ActionType::MoneyFromReserved.signed(dec!(5)), dec!(-5));
    }

    #[test]
    fn action_type_wire_names() {
        let json = serde_json::to_string(&ActionType::MoneyFromReserved).unwrap();
        assert_eq!(json, "\"money_from_reserved\"");
    }
}
