//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.
//! Ledger commits and account inserts run under a single writer lock so that
//! uniqueness checks on references, numbers and funding targets cannot race
//! the `WriteBatch` that follows them.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MergeOperands, MultiThreaded, Options, WriteBatch,
};

use chrono::{DateTime, Utc};
use wallet_core::{
    Account, AccountId, ActionLogEntry, ApiClient, ApiClientId, BalanceLog, BalanceLogEntry,
    BalanceLogId, LedgerBatch, RateLimitAttempt, RateLimitBlock, RateLimitRule, RequestLog,
    RuleId, RuleProfile, Session, SystemKey, Transaction, TransactionId, TransactionStatus,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{sort_actions, sort_newest_first, Store};

type Row = (Box<[u8]>, Box<[u8]>);

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    writer: Mutex<()>,
}

fn decode_counter(bytes: &[u8]) -> u64 {
    <[u8; 8]>::try_from(bytes).map_or(0, u64::from_le_bytes)
}

fn add_counters(_key: &[u8], existing: Option<&[u8]>, operands: &MergeOperands) -> Option<Vec<u8>> {
    let total = operands
        .iter()
        .fold(existing.map_or(0, decode_counter), |acc, operand| {
            acc.saturating_add(decode_counter(operand))
        });
    Some(total.to_le_bytes().to_vec())
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| {
                let mut cf_opts = Options::default();
                if name == cf::RATE_LIMIT_COUNTERS {
                    cf_opts.set_merge_operator_associative("wallet_counter_add", add_counters);
                }
                ColumnFamilyDescriptor::new(name, cf_opts)
            })
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            writer: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, ()>> {
        self.writer
            .lock()
            .map_err(|_| StoreError::Database("writer lock poisoned".into()))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get_raw(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get_value<T: serde::de::DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        self.get_raw(cf_name, key)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn put_value<T: serde::Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        let value = Self::serialize(value)?;
        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Collect every row whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<Row>> {
        let cf = self.cf(cf_name)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        let mut rows = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            rows.push((key, value));
        }
        Ok(rows)
    }

    /// Deserialize every value of a column family.
    fn scan_values<T: serde::de::DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .iterator_cf(&cf, IteratorMode::Start)
            .map(|item| {
                let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
                Self::deserialize(&value)
            })
            .collect()
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    fn insert_account(&self, account: &Account) -> Result<()> {
        let _writer = self.lock_writer()?;

        if self
            .get_raw(cf::ACCOUNTS_BY_TARGET, account.funding_target.as_bytes())?
            .is_some()
        {
            return Err(StoreError::AccountExists {
                funding_target: account.funding_target.clone(),
            });
        }
        if self
            .get_raw(cf::ACCOUNT_NUMBERS, account.account_number.as_bytes())?
            .is_some()
        {
            return Err(StoreError::AccountNumberTaken(account.account_number.clone()));
        }

        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let cf_numbers = self.cf(cf::ACCOUNT_NUMBERS)?;
        let cf_targets = self.cf(cf::ACCOUNTS_BY_TARGET)?;
        let account_key = keys::account_key(&account.id);

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_accounts, &account_key, Self::serialize(account)?);
        batch.put_cf(&cf_numbers, account.account_number.as_bytes(), &account_key);
        batch.put_cf(&cf_targets, account.funding_target.as_bytes(), &account_key);
        self.write(batch)
    }

    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        self.get_value(cf::ACCOUNTS, &keys::account_key(account_id))
    }

    fn get_account_by_number(&self, account_number: &str) -> Result<Option<Account>> {
        match self.get_raw(cf::ACCOUNT_NUMBERS, account_number.as_bytes())? {
            Some(account_key) => self.get_value(cf::ACCOUNTS, &account_key),
            None => Ok(None),
        }
    }

    fn get_account_by_target(&self, funding_target: &str) -> Result<Option<Account>> {
        match self.get_raw(cf::ACCOUNTS_BY_TARGET, funding_target.as_bytes())? {
            Some(account_key) => self.get_value(cf::ACCOUNTS, &account_key),
            None => Ok(None),
        }
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        let mut accounts: Vec<Account> = self.scan_values(cf::ACCOUNTS)?;
        accounts.sort_by(|a, b| a.account_number.cmp(&b.account_number));
        Ok(accounts)
    }

    fn highest_account_number(&self) -> Result<Option<u64>> {
        let mut highest = None;
        for (number, _) in self.scan_prefix(cf::ACCOUNT_NUMBERS, &[])? {
            let parsed = std::str::from_utf8(&number)
                .ok()
                .and_then(|n| n.parse::<u64>().ok());
            highest = highest.max(parsed);
        }
        Ok(highest)
    }

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    fn commit(&self, ledger: &LedgerBatch) -> Result<()> {
        let _writer = self.lock_writer()?;

        for transaction in &ledger.transactions {
            if let Some(existing) =
                self.get_raw(cf::TRANSACTIONS_BY_REFERENCE, transaction.reference.as_bytes())?
            {
                if existing.as_slice() != transaction.id.to_bytes() {
                    return Err(StoreError::DuplicateReference {
                        reference: transaction.reference.clone(),
                    });
                }
            }
        }

        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let cf_numbers = self.cf(cf::ACCOUNT_NUMBERS)?;
        let cf_targets = self.cf(cf::ACCOUNTS_BY_TARGET)?;
        let cf_tx = self.cf(cf::TRANSACTIONS)?;
        let cf_tx_by_ref = self.cf(cf::TRANSACTIONS_BY_REFERENCE)?;
        let cf_tx_by_account = self.cf(cf::TRANSACTIONS_BY_ACCOUNT)?;
        let cf_pending = self.cf(cf::PENDING_TRANSACTIONS)?;
        let cf_actions = self.cf(cf::ACTION_LOG)?;
        let cf_actions_by_tx = self.cf(cf::ACTION_LOG_BY_TRANSACTION)?;
        let cf_logs = self.cf(cf::BALANCE_LOGS)?;
        let cf_logs_by_tx = self.cf(cf::BALANCE_LOGS_BY_TRANSACTION)?;
        let cf_entries = self.cf(cf::BALANCE_LOG_ENTRIES)?;

        let mut batch = WriteBatch::default();

        for account in &ledger.accounts {
            let account_key = keys::account_key(&account.id);
            batch.put_cf(&cf_accounts, &account_key, Self::serialize(account)?);
            batch.put_cf(&cf_numbers, account.account_number.as_bytes(), &account_key);
            batch.put_cf(&cf_targets, account.funding_target.as_bytes(), &account_key);
        }

        for transaction in &ledger.transactions {
            let tx_key = keys::transaction_key(&transaction.id);
            batch.put_cf(&cf_tx, &tx_key, Self::serialize(transaction)?);
            batch.put_cf(&cf_tx_by_ref, transaction.reference.as_bytes(), &tx_key);
            batch.put_cf(
                &cf_tx_by_account,
                keys::account_transaction_key(&transaction.account_id, &transaction.id),
                [],
            );
            let pending_key = keys::pending_transaction_key(transaction.created_at, &transaction.id);
            if transaction.status == TransactionStatus::Pending {
                batch.put_cf(&cf_pending, pending_key, []);
            } else {
                batch.delete_cf(&cf_pending, pending_key);
            }
        }

        for action in &ledger.actions {
            let action_key = keys::action_key(&action.account_id, &action.id);
            batch.put_cf(&cf_actions, &action_key, Self::serialize(action)?);
            batch.put_cf(
                &cf_actions_by_tx,
                keys::transaction_action_key(&action.transaction_id, &action.id),
                &action_key,
            );
        }

        for log in &ledger.balance_logs {
            batch.put_cf(&cf_logs, keys::balance_log_key(&log.id), Self::serialize(log)?);
            batch.put_cf(
                &cf_logs_by_tx,
                keys::transaction_balance_log_key(&log.transaction_id, &log.id),
                [],
            );
        }

        for entry in &ledger.balance_log_entries {
            batch.put_cf(
                &cf_entries,
                keys::balance_log_entry_key(&entry.balance_log_id, &entry.id),
                Self::serialize(entry)?,
            );
        }

        self.write(batch)
    }

    fn get_transaction(&self, transaction_id: &TransactionId) -> Result<Option<Transaction>> {
        self.get_value(cf::TRANSACTIONS, &keys::transaction_key(transaction_id))
    }

    fn get_transaction_by_reference(&self, reference: &str) -> Result<Option<Transaction>> {
        match self.get_raw(cf::TRANSACTIONS_BY_REFERENCE, reference.as_bytes())? {
            Some(tx_key) => self.get_value(cf::TRANSACTIONS, &tx_key),
            None => Ok(None),
        }
    }

    fn list_transactions_by_account(
        &self,
        account_id: &AccountId,
        limit: Option<usize>,
    ) -> Result<Vec<Transaction>> {
        let prefix = keys::id_prefix(account_id.as_bytes());
        let mut transactions = Vec::new();
        for (key, _) in self.scan_prefix(cf::TRANSACTIONS_BY_ACCOUNT, &prefix)? {
            let Some(tx_bytes) = keys::trailing_id(&key) else {
                continue;
            };
            if let Some(tx) = self.get_transaction(&TransactionId::from_bytes(tx_bytes))? {
                transactions.push(tx);
            }
        }

        sort_newest_first(&mut transactions);
        if let Some(limit) = limit {
            transactions.truncate(limit);
        }
        Ok(transactions)
    }

    fn list_transactions(&self) -> Result<Vec<Transaction>> {
        let mut transactions: Vec<Transaction> = self.scan_values(cf::TRANSACTIONS)?;
        sort_newest_first(&mut transactions);
        Ok(transactions)
    }

    fn list_pending_transactions(&self, since: DateTime<Utc>) -> Result<Vec<Transaction>> {
        let cf = self.cf(cf::PENDING_TRANSACTIONS)?;
        let from = since.timestamp_millis().to_be_bytes();
        let mut transactions = Vec::new();
        for item in self
            .db
            .iterator_cf(&cf, IteratorMode::From(&from, Direction::Forward))
        {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let Some(tx_bytes) = keys::pending_transaction_id(&key) else {
                continue;
            };
            if let Some(tx) = self.get_transaction(&TransactionId::from_bytes(tx_bytes))? {
                if tx.status == TransactionStatus::Pending && tx.created_at >= since {
                    transactions.push(tx);
                }
            }
        }

        sort_newest_first(&mut transactions);
        Ok(transactions)
    }

    fn list_actions_by_account(&self, account_id: &AccountId) -> Result<Vec<ActionLogEntry>> {
        let prefix = keys::id_prefix(account_id.as_bytes());
        let mut actions = self
            .scan_prefix(cf::ACTION_LOG, &prefix)?
            .into_iter()
            .map(|(_, value)| Self::deserialize(&value))
            .collect::<Result<Vec<ActionLogEntry>>>()?;
        sort_actions(&mut actions);
        Ok(actions)
    }

    fn list_actions_by_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Vec<ActionLogEntry>> {
        let prefix = keys::id_prefix(&transaction_id.to_bytes());
        let mut actions = Vec::new();
        for (_, action_key) in self.scan_prefix(cf::ACTION_LOG_BY_TRANSACTION, &prefix)? {
            if let Some(action) = self.get_value::<ActionLogEntry>(cf::ACTION_LOG, &action_key)? {
                actions.push(action);
            }
        }
        actions.sort_by_key(|a| a.sequence);
        Ok(actions)
    }

    fn list_balance_logs_by_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Vec<BalanceLog>> {
        let prefix = keys::id_prefix(&transaction_id.to_bytes());
        let mut logs = Vec::new();
        for (key, _) in self.scan_prefix(cf::BALANCE_LOGS_BY_TRANSACTION, &prefix)? {
            let Some(log_bytes) = keys::trailing_id(&key) else {
                continue;
            };
            let log_key = keys::balance_log_key(&BalanceLogId::from_bytes(log_bytes));
            if let Some(log) = self.get_value::<BalanceLog>(cf::BALANCE_LOGS, &log_key)? {
                logs.push(log);
            }
        }
        logs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(logs)
    }

    fn list_balance_log_entries(&self, log_id: &BalanceLogId) -> Result<Vec<BalanceLogEntry>> {
        let prefix = keys::id_prefix(&log_id.to_bytes());
        let mut entries = self
            .scan_prefix(cf::BALANCE_LOG_ENTRIES, &prefix)?
            .into_iter()
            .map(|(_, value)| Self::deserialize(&value))
            .collect::<Result<Vec<BalanceLogEntry>>>()?;
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(entries)
    }

    // =========================================================================
    // Rule Configuration
    // =========================================================================

    fn put_rule_profile(&self, profile: &RuleProfile) -> Result<()> {
        let key = keys::rule_profile_key(profile.scope, &profile.name);
        self.put_value(cf::RULE_PROFILES, &key, profile)
    }

    fn list_rule_profiles(&self) -> Result<Vec<RuleProfile>> {
        self.scan_values(cf::RULE_PROFILES)
    }

    fn put_balance_entry_type(&self, name: &str) -> Result<()> {
        let cf = self.cf(cf::BALANCE_ENTRY_TYPES)?;
        self.db
            .put_cf(&cf, name.as_bytes(), [])
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn list_balance_entry_types(&self) -> Result<Vec<String>> {
        Ok(self
            .scan_prefix(cf::BALANCE_ENTRY_TYPES, &[])?
            .into_iter()
            .map(|(key, _)| String::from_utf8_lossy(&key).into_owned())
            .collect())
    }

    // =========================================================================
    // Rate Limiting
    // =========================================================================

    fn put_rate_limit_rule(&self, rule: &RateLimitRule) -> Result<()> {
        self.put_value(cf::RATE_LIMIT_RULES, &keys::rate_limit_rule_key(&rule.id), rule)
    }

    fn list_rate_limit_rules(&self) -> Result<Vec<RateLimitRule>> {
        self.scan_values(cf::RATE_LIMIT_RULES)
    }

    fn increment_attempt(&self, attempt: &RateLimitAttempt) -> Result<()> {
        let cf_attempts = self.cf(cf::RATE_LIMIT_ATTEMPTS)?;
        let cf_counters = self.cf(cf::RATE_LIMIT_COUNTERS)?;
        let key = keys::attempt_key(
            &attempt.rule_id,
            &attempt.key,
            &attempt.endpoint,
            attempt.window_start,
        );

        // The attempts row keeps the latest method and time; its count is
        // authoritative only in the counters column family.
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_attempts, &key, Self::serialize(attempt)?);
        batch.merge_cf(&cf_counters, &key, attempt.count.to_le_bytes());
        self.write(batch)
    }

    fn window_attempts(&self, rule_id: &RuleId, key: &str, window_start: i64) -> Result<u64> {
        let prefix = keys::attempt_window_prefix(rule_id, key, window_start);
        Ok(self
            .scan_prefix(cf::RATE_LIMIT_COUNTERS, &prefix)?
            .iter()
            .map(|(_, value)| decode_counter(value))
            .sum())
    }

    fn get_rate_limit_block(&self, rule_id: &RuleId, key: &str) -> Result<Option<RateLimitBlock>> {
        self.get_value(cf::RATE_LIMIT_BLOCKS, &keys::block_key(rule_id, key))
    }

    fn put_rate_limit_block(&self, block: &RateLimitBlock) -> Result<()> {
        self.put_value(
            cf::RATE_LIMIT_BLOCKS,
            &keys::block_key(&block.rule_id, &block.key),
            block,
        )
    }

    // =========================================================================
    // Gateway Records
    // =========================================================================

    fn put_api_client(&self, client: &ApiClient) -> Result<()> {
        let _writer = self.lock_writer()?;
        let cf_clients = self.cf(cf::API_CLIENTS)?;
        let cf_by_key = self.cf(cf::API_CLIENTS_BY_KEY)?;
        let client_key = keys::api_client_key(&client.id);

        let mut batch = WriteBatch::default();
        if let Some(previous) = self.get_api_client(&client.id)? {
            if previous.api_key != client.api_key {
                batch.delete_cf(&cf_by_key, previous.api_key.as_bytes());
            }
        }
        batch.put_cf(&cf_clients, &client_key, Self::serialize(client)?);
        batch.put_cf(&cf_by_key, client.api_key.as_bytes(), &client_key);
        self.write(batch)
    }

    fn get_api_client(&self, client_id: &ApiClientId) -> Result<Option<ApiClient>> {
        self.get_value(cf::API_CLIENTS, &keys::api_client_key(client_id))
    }

    fn get_api_client_by_key(&self, api_key: &str) -> Result<Option<ApiClient>> {
        match self.get_raw(cf::API_CLIENTS_BY_KEY, api_key.as_bytes())? {
            Some(client_key) => self.get_value(cf::API_CLIENTS, &client_key),
            None => Ok(None),
        }
    }

    fn put_system_key(&self, key: &SystemKey) -> Result<()> {
        self.put_value(cf::SYSTEM_KEYS, key.name.as_bytes(), key)
    }

    fn get_active_system_key(&self) -> Result<Option<SystemKey>> {
        Ok(self
            .scan_values::<SystemKey>(cf::SYSTEM_KEYS)?
            .into_iter()
            .filter(|key| key.active)
            .max_by_key(|key| key.created_at))
    }

    fn put_session(&self, session: &Session) -> Result<()> {
        self.put_value(cf::SESSIONS, session.token.as_bytes(), session)
    }

    fn get_session(&self, token: &str) -> Result<Option<Session>> {
        self.get_value(cf::SESSIONS, token.as_bytes())
    }

    fn put_request_log(&self, log: &RequestLog) -> Result<()> {
        self.put_value(
            cf::REQUEST_LOGS,
            &keys::request_log_key(log.started_at, &log.request_id),
            log,
        )
    }

    fn list_request_logs(&self, limit: usize) -> Result<Vec<RequestLog>> {
        let cf = self.cf(cf::REQUEST_LOGS)?;
        self.db
            .iterator_cf(&cf, IteratorMode::End)
            .take(limit)
            .map(|item| {
                let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
                Self::deserialize(&value)
            })
            .collect()
    }
}
