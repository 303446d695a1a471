//! Error types for the wallet core.

use rust_decimal::Decimal;

use crate::account::Bucket;
use crate::ids::IdError;

/// Result type for wallet operations.
pub type Result<T> = std::result::Result<T, WalletError>;

/// Errors raised by wallet validation and workflow transitions.
///
/// Every variant except [`WalletError::InvariantViolation`] is a caller-facing
/// validation failure: it is raised before any mutation is produced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalletError {
    /// Amount is not positive, has more than two decimals, or is too large.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Reference is empty or malformed.
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// The account is frozen and cannot initiate payments.
    #[error("account {account_id} is frozen")]
    AccountFrozen {
        /// The frozen account.
        account_id: String,
    },

    /// A bucket does not hold enough funds for the movement.
    #[error("insufficient {bucket} balance: balance={balance}, required={required}")]
    InsufficientBalance {
        /// The bucket that is short.
        bucket: Bucket,
        /// The bucket's balance.
        balance: Decimal,
        /// The amount required.
        required: Decimal,
    },

    /// No Pending transaction of the expected type exists for the reference.
    #[error("no pending {kind} transaction found for reference {reference}")]
    PendingTransactionNotFound {
        /// Transaction type that was expected.
        kind: String,
        /// The external reference.
        reference: String,
    },

    /// The amount given to approve/reject differs from the pending transaction.
    #[error("amount {actual} does not match pending transaction {reference} amount {expected}")]
    AmountMismatch {
        /// The external reference.
        reference: String,
        /// Amount recorded on the transaction.
        expected: Decimal,
        /// Amount supplied by the caller.
        actual: Decimal,
    },

    /// A transaction with this reference already exists.
    #[error("duplicate transaction reference: {reference}")]
    DuplicateReference {
        /// The external reference.
        reference: String,
    },

    /// Account balances break the bucket invariant or went negative.
    #[error("balance invariant violated on account {account_id}: {detail}")]
    InvariantViolation {
        /// The offending account.
        account_id: String,
        /// What was wrong.
        detail: String,
    },

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}
