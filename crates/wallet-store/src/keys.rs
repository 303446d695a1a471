//! Key encoding utilities for `RocksDB`.
//!
//! Composite keys concatenate fixed-width id bytes so that prefix scans over
//! the leading id list everything belonging to it, in ULID (time) order.

use chrono::{DateTime, Utc};
use wallet_core::{
    AccountId, ActionLogId, ApiClientId, BalanceLogEntryId, BalanceLogId, ProfileScope, RequestId,
    RuleId, TransactionId,
};

/// Separator between variable-length key components.
const SEPARATOR: u8 = 0;

/// Create an account key from an account ID.
#[must_use]
pub fn account_key(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

/// Create a transaction key from a transaction ID.
#[must_use]
pub fn transaction_key(transaction_id: &TransactionId) -> Vec<u8> {
    transaction_id.to_bytes().to_vec()
}

/// Create an account-transaction index key.
///
/// Format: `account_id (16 bytes) || transaction_id (16 bytes)`
#[must_use]
pub fn account_transaction_key(account_id: &AccountId, transaction_id: &TransactionId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(account_id.as_bytes());
    key.extend_from_slice(&transaction_id.to_bytes());
    key
}

/// Create an action-log key.
///
/// Format: `account_id (16 bytes) || action_id (16 bytes)`
#[must_use]
pub fn action_key(account_id: &AccountId, action_id: &ActionLogId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(account_id.as_bytes());
    key.extend_from_slice(&action_id.to_bytes());
    key
}

/// Create a transaction-action index key.
///
/// Format: `transaction_id (16 bytes) || action_id (16 bytes)`
#[must_use]
pub fn transaction_action_key(transaction_id: &TransactionId, action_id: &ActionLogId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(&transaction_id.to_bytes());
    key.extend_from_slice(&action_id.to_bytes());
    key
}

/// Create a balance-log key.
#[must_use]
pub fn balance_log_key(log_id: &BalanceLogId) -> Vec<u8> {
    log_id.to_bytes().to_vec()
}

/// Create a transaction-balance-log index key.
///
/// Format: `transaction_id (16 bytes) || balance_log_id (16 bytes)`
#[must_use]
pub fn transaction_balance_log_key(transaction_id: &TransactionId, log_id: &BalanceLogId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(&transaction_id.to_bytes());
    key.extend_from_slice(&log_id.to_bytes());
    key
}

/// Create a balance-log-entry key.
///
/// Format: `balance_log_id (16 bytes) || entry_id (16 bytes)`
#[must_use]
pub fn balance_log_entry_key(log_id: &BalanceLogId, entry_id: &BalanceLogEntryId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(&log_id.to_bytes());
    key.extend_from_slice(&entry_id.to_bytes());
    key
}

/// Create a prefix from a 16-byte id.
#[must_use]
pub fn id_prefix(bytes: &[u8; 16]) -> Vec<u8> {
    bytes.to_vec()
}

/// Extract the trailing ULID bytes of a 32-byte composite key.
///
/// Returns `None` for keys of any other length.
#[must_use]
pub fn trailing_id(key: &[u8]) -> Option<[u8; 16]> {
    if key.len() != 32 {
        return None;
    }
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&key[16..32]);
    Some(bytes)
}

/// Create a rule-profile key.
///
/// Format: `scope (1 byte) || name`
#[must_use]
pub fn rule_profile_key(scope: ProfileScope, name: &str) -> Vec<u8> {
    let tag = match scope {
        ProfileScope::Executor => b'e',
        ProfileScope::Processor => b'p',
    };
    let mut key = Vec::with_capacity(1 + name.len());
    key.push(tag);
    key.extend_from_slice(name.as_bytes());
    key
}

/// Create a rate-limit rule key.
#[must_use]
pub fn rate_limit_rule_key(rule_id: &RuleId) -> Vec<u8> {
    rule_id.as_bytes().to_vec()
}

/// Prefix shared by every attempt row of (rule, key, window).
///
/// Format: `rule_id (16) || window_start (8, BE) || key || 0x00`
#[must_use]
pub fn attempt_window_prefix(rule_id: &RuleId, key: &str, window_start: i64) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(25 + key.len());
    prefix.extend_from_slice(rule_id.as_bytes());
    prefix.extend_from_slice(&window_start.to_be_bytes());
    prefix.extend_from_slice(key.as_bytes());
    prefix.push(SEPARATOR);
    prefix
}

/// Create an attempt key: the window prefix followed by the endpoint.
#[must_use]
pub fn attempt_key(rule_id: &RuleId, key: &str, endpoint: &str, window_start: i64) -> Vec<u8> {
    let mut bucket = attempt_window_prefix(rule_id, key, window_start);
    bucket.extend_from_slice(endpoint.as_bytes());
    bucket
}

/// Create a rate-limit block key.
///
/// Format: `rule_id (16) || key`
#[must_use]
pub fn block_key(rule_id: &RuleId, key: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(16 + key.len());
    bytes.extend_from_slice(rule_id.as_bytes());
    bytes.extend_from_slice(key.as_bytes());
    bytes
}

/// Create an API client key.
#[must_use]
pub fn api_client_key(client_id: &ApiClientId) -> Vec<u8> {
    client_id.as_bytes().to_vec()
}

/// Create a request-log key.
///
/// Format: `started_at millis (8, BE) || request_id (16)`, so the keyspace
/// sorts by start time.
#[must_use]
pub fn request_log_key(started_at: DateTime<Utc>, request_id: &RequestId) -> Vec<u8> {
    let mut key = Vec::with_capacity(24);
    key.extend_from_slice(&started_at.timestamp_millis().to_be_bytes());
    key.extend_from_slice(request_id.as_bytes());
    key
}

/// Create a pending-transaction index key.
///
/// Format: `created_at millis (8, BE) || transaction_id (16)`
#[must_use]
pub fn pending_transaction_key(created_at: DateTime<Utc>, transaction_id: &TransactionId) -> Vec<u8> {
    let mut key = Vec::with_capacity(24);
    key.extend_from_slice(&created_at.timestamp_millis().to_be_bytes());
    key.extend_from_slice(&transaction_id.to_bytes());
    key
}

/// Extract the transaction ID of a pending-transaction index key.
#[must_use]
pub fn pending_transaction_id(key: &[u8]) -> Option<[u8; 16]> {
    key.get(8..24)
        .filter(|_| key.len() == 24)
        .and_then(|bytes| bytes.try_into().ok())
}
