//! Storage layer for the wallet ledger.
//!
//! This crate persists accounts, transactions, the action log, balance logs,
//! rule profiles, rate-limit state and gateway records. Two backends
//! implement [`Store`]:
//!
//! - [`RocksStore`]: `RocksDB` column families with CBOR values (feature
//!   `rocksdb-backend`, on by default)
//! - [`MemoryStore`]: `HashMap`s behind a lock, for tests and local runs
//!
//! [`AccountStore`] layers the per-account pessimistic lock and account
//! number generation on top of any backend.
//!
//! # Column families
//!
//! - `accounts`, `account_numbers`, `accounts_by_target`
//! - `transactions`, `transactions_by_reference`, `transactions_by_account`,
//!   `pending_transactions`
//! - `action_log`, `action_log_by_transaction`
//! - `balance_logs`, `balance_logs_by_transaction`, `balance_log_entries`
//! - `rule_profiles`, `balance_entry_types`
//! - `rate_limit_rules`, `rate_limit_attempts`, `rate_limit_counters`,
//!   `rate_limit_blocks`
//! - `api_clients`, `api_clients_by_key`, `system_keys`, `sessions`,
//!   `request_logs`
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "rocksdb-backend")] {
//! use wallet_store::{RocksStore, Store};
//! use wallet_core::{Account, DEFAULT_CURRENCY};
//!
//! let store = RocksStore::open("/tmp/wallet-db").unwrap();
//!
//! let account = Account::new("100000000001", "merchant-42", DEFAULT_CURRENCY);
//! store.insert_account(&account).unwrap();
//!
//! let retrieved = store.get_account(&account.id).unwrap();
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod accounts;
pub mod error;
pub mod keys;
pub mod memory;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
pub mod schema;

pub use accounts::{AccountStore, LockedAccount};
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use chrono::{DateTime, Utc};
use wallet_core::{
    Account, AccountId, ActionLogEntry, ApiClient, ApiClientId, BalanceLog, BalanceLogEntry,
    BalanceLogId, LedgerBatch, RateLimitAttempt, RateLimitBlock, RateLimitRule, RequestLog,
    RuleBook, RuleId, RuleProfile, Session, SystemKey, Transaction, TransactionId,
};

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., `RocksDB`, in-memory for testing).
pub trait Store: Send + Sync {
    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Insert a new account and its number and funding-target indexes.
    ///
    /// # Errors
    ///
    /// - `StoreError::AccountExists` if the funding target already has one.
    /// - `StoreError::AccountNumberTaken` if the number is assigned.
    fn insert_account(&self, account: &Account) -> Result<()>;

    /// Get an account by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>>;

    /// Get an account by account number.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_account_by_number(&self, account_number: &str) -> Result<Option<Account>>;

    /// Get the account bound to a funding target.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_account_by_target(&self, funding_target: &str) -> Result<Option<Account>>;

    /// List every account.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_accounts(&self) -> Result<Vec<Account>>;

    /// Highest purely numeric account number, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn highest_account_number(&self) -> Result<Option<u64>>;

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    /// Apply every record of `batch` atomically.
    ///
    /// Accounts, transactions, balance logs and entries are upserted; action
    /// rows are appended. Secondary indexes are maintained in the same write.
    ///
    /// # Errors
    ///
    /// - `StoreError::DuplicateReference` if a transaction's reference is
    ///   already used by another transaction. Nothing is written.
    fn commit(&self, batch: &LedgerBatch) -> Result<()>;

    /// Get a transaction by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_transaction(&self, transaction_id: &TransactionId) -> Result<Option<Transaction>>;

    /// Get a transaction by its unique reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_transaction_by_reference(&self, reference: &str) -> Result<Option<Transaction>>;

    /// List an account's transactions, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_transactions_by_account(
        &self,
        account_id: &AccountId,
        limit: Option<usize>,
    ) -> Result<Vec<Transaction>>;

    /// List every transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_transactions(&self) -> Result<Vec<Transaction>>;

    /// List Pending transactions created at or after `since`, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_pending_transactions(&self, since: DateTime<Utc>) -> Result<Vec<Transaction>>;

    /// List an account's action-log rows in the order they were recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_actions_by_account(&self, account_id: &AccountId) -> Result<Vec<ActionLogEntry>>;

    /// List a transaction's action-log rows by sequence.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_actions_by_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Vec<ActionLogEntry>>;

    /// List the balance logs written for a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_balance_logs_by_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Vec<BalanceLog>>;

    /// List the entries of a balance log.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_balance_log_entries(&self, log_id: &BalanceLogId) -> Result<Vec<BalanceLogEntry>>;

    // =========================================================================
    // Rule Configuration
    // =========================================================================

    /// Insert or replace a rule profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_rule_profile(&self, profile: &RuleProfile) -> Result<()>;

    /// List every rule profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_rule_profiles(&self) -> Result<Vec<RuleProfile>>;

    /// Register a balance entry type name.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_balance_entry_type(&self, name: &str) -> Result<()>;

    /// List balance entry type names.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_balance_entry_types(&self) -> Result<Vec<String>>;

    /// Snapshot the rule configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn load_rule_book(&self) -> Result<RuleBook> {
        Ok(RuleBook::new(
            self.list_rule_profiles()?,
            self.list_balance_entry_types()?,
        ))
    }

    // =========================================================================
    // Rate Limiting
    // =========================================================================

    /// Insert or replace a rate-limit rule.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_rate_limit_rule(&self, rule: &RateLimitRule) -> Result<()>;

    /// List every rate-limit rule.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_rate_limit_rules(&self) -> Result<Vec<RateLimitRule>>;

    /// Add `attempt.count` to the counter of the attempt's
    /// (rule, key, endpoint, window) bucket, creating it on first hit, and
    /// record the latest method and time.
    ///
    /// The counter update is a single atomic increment.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn increment_attempt(&self, attempt: &RateLimitAttempt) -> Result<()>;

    /// Sum of the counters of every endpoint bucket for (rule, key, window).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn window_attempts(&self, rule_id: &RuleId, key: &str, window_start: i64) -> Result<u64>;

    /// Get the block on (rule, key), expired or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_rate_limit_block(&self, rule_id: &RuleId, key: &str) -> Result<Option<RateLimitBlock>>;

    /// Insert or replace the block on (rule, key).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_rate_limit_block(&self, block: &RateLimitBlock) -> Result<()>;

    // =========================================================================
    // Gateway Records
    // =========================================================================

    /// Insert or replace an API client.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_api_client(&self, client: &ApiClient) -> Result<()>;

    /// Get an API client by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_api_client(&self, client_id: &ApiClientId) -> Result<Option<ApiClient>>;

    /// Get the API client owning `api_key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_api_client_by_key(&self, api_key: &str) -> Result<Option<ApiClient>>;

    /// Insert or replace a server keypair.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_system_key(&self, key: &SystemKey) -> Result<()>;

    /// The most recently created active server keypair.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_active_system_key(&self) -> Result<Option<SystemKey>>;

    /// Insert or replace a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_session(&self, session: &Session) -> Result<()>;

    /// Get a session by bearer token.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_session(&self, token: &str) -> Result<Option<Session>>;

    /// Append a request log.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_request_log(&self, log: &RequestLog) -> Result<()>;

    /// List request logs, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_request_logs(&self, limit: usize) -> Result<Vec<RequestLog>>;
}

/// Sort action rows the way they were recorded.
pub(crate) fn sort_actions(actions: &mut [ActionLogEntry]) {
    actions.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.transaction_id.cmp(&b.transaction_id))
            .then_with(|| a.sequence.cmp(&b.sequence))
    });
}

/// Sort transactions newest first.
pub(crate) fn sort_newest_first(transactions: &mut [Transaction]) {
    transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
}
