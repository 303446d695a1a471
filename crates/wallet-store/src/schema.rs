//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Account records, keyed by `account_id`.
    pub const ACCOUNTS: &str = "accounts";

    /// Index: account number → `account_id`.
    pub const ACCOUNT_NUMBERS: &str = "account_numbers";

    /// Index: funding target → `account_id`.
    pub const ACCOUNTS_BY_TARGET: &str = "accounts_by_target";

    /// Transactions, keyed by `transaction_id` (ULID).
    pub const TRANSACTIONS: &str = "transactions";

    /// Index: reference → `transaction_id`.
    pub const TRANSACTIONS_BY_REFERENCE: &str = "transactions_by_reference";

    /// Index: `account_id || transaction_id`, empty value.
    pub const TRANSACTIONS_BY_ACCOUNT: &str = "transactions_by_account";

    /// Index: `created_at millis (BE) || transaction_id` of every Pending
    /// transaction, empty value.
    pub const PENDING_TRANSACTIONS: &str = "pending_transactions";

    /// Action-log rows, keyed by `account_id || action_id`.
    pub const ACTION_LOG: &str = "action_log";

    /// Index: `transaction_id || action_id` → `account_id || action_id`.
    pub const ACTION_LOG_BY_TRANSACTION: &str = "action_log_by_transaction";

    /// Balance logs, keyed by `balance_log_id`.
    pub const BALANCE_LOGS: &str = "balance_logs";

    /// Index: `transaction_id || balance_log_id`, empty value.
    pub const BALANCE_LOGS_BY_TRANSACTION: &str = "balance_logs_by_transaction";

    /// Balance-log entries, keyed by `balance_log_id || entry_id`.
    pub const BALANCE_LOG_ENTRIES: &str = "balance_log_entries";

    /// Rule profiles, keyed by `scope || name`.
    pub const RULE_PROFILES: &str = "rule_profiles";

    /// Balance entry type names, empty values.
    pub const BALANCE_ENTRY_TYPES: &str = "balance_entry_types";

    /// Rate-limit rules, keyed by `rule_id`.
    pub const RATE_LIMIT_RULES: &str = "rate_limit_rules";

    /// Rate-limit attempt rows, keyed by the attempt bucket key.
    pub const RATE_LIMIT_ATTEMPTS: &str = "rate_limit_attempts";

    /// Attempt counters (little-endian `u64`, merge operator), same keys as
    /// [`RATE_LIMIT_ATTEMPTS`].
    pub const RATE_LIMIT_COUNTERS: &str = "rate_limit_counters";

    /// Rate-limit blocks, keyed by `rule_id || scope key`.
    pub const RATE_LIMIT_BLOCKS: &str = "rate_limit_blocks";

    /// API clients, keyed by `client_id`.
    pub const API_CLIENTS: &str = "api_clients";

    /// Index: API key → `client_id`.
    pub const API_CLIENTS_BY_KEY: &str = "api_clients_by_key";

    /// Server keypairs, keyed by name.
    pub const SYSTEM_KEYS: &str = "system_keys";

    /// Bearer sessions, keyed by token.
    pub const SESSIONS: &str = "sessions";

    /// Request logs, keyed by `started_at millis (BE) || request_id`.
    pub const REQUEST_LOGS: &str = "request_logs";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ACCOUNTS,
        cf::ACCOUNT_NUMBERS,
        cf::ACCOUNTS_BY_TARGET,
        cf::TRANSACTIONS,
        cf::TRANSACTIONS_BY_REFERENCE,
        cf::TRANSACTIONS_BY_ACCOUNT,
        cf::PENDING_TRANSACTIONS,
        cf::ACTION_LOG,
        cf::ACTION_LOG_BY_TRANSACTION,
        cf::BALANCE_LOGS,
        cf::BALANCE_LOGS_BY_TRANSACTION,
        cf::BALANCE_LOG_ENTRIES,
        cf::RULE_PROFILES,
        cf::BALANCE_ENTRY_TYPES,
        cf::RATE_LIMIT_RULES,
        cf::RATE_LIMIT_ATTEMPTS,
        cf::RATE_LIMIT_COUNTERS,
        cf::RATE_LIMIT_BLOCKS,
        cf::API_CLIENTS,
        cf::API_CLIENTS_BY_KEY,
        cf::SYSTEM_KEYS,
        cf::SESSIONS,
        cf::REQUEST_LOGS,
    ]
}
