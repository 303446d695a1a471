//! Error types for wallet storage.

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("not found")]
    NotFound,

    /// Another transaction already uses this reference.
    #[error("duplicate transaction reference: {reference}")]
    DuplicateReference {
        /// The conflicting reference.
        reference: String,
    },

    /// An account already exists for this funding target.
    #[error("account already exists for funding target {funding_target}")]
    AccountExists {
        /// The funding target key.
        funding_target: String,
    },

    /// The account number is already assigned.
    #[error("account number {0} is taken")]
    AccountNumberTaken(String),

    /// No account numbers are left in the 12-digit range.
    #[error("account numbers exhausted")]
    AccountNumbersExhausted,
}
