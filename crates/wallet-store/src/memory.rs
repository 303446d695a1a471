//! In-memory storage implementation.
//!
//! Every table lives behind one `RwLock`, so `commit` is trivially atomic.
//! Used by tests and by the service when no data directory is configured.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use wallet_core::{
    Account, AccountId, ActionLogEntry, ActionLogId, ApiClient, ApiClientId, BalanceLog,
    BalanceLogEntry, BalanceLogEntryId, BalanceLogId, LedgerBatch, ProfileScope, RateLimitAttempt,
    RateLimitBlock, RateLimitRule, RequestLog, RuleId, RuleProfile, Session, SystemKey,
    Transaction, TransactionId, TransactionStatus,
};

use crate::error::{Result, StoreError};
use crate::{sort_actions, sort_newest_first, Store};

type AttemptKey = (RuleId, String, i64, String);

#[derive(Default)]
struct Tables {
    accounts: HashMap<AccountId, Account>,
    account_numbers: HashMap<String, AccountId>,
    accounts_by_target: HashMap<String, AccountId>,
    transactions: HashMap<TransactionId, Transaction>,
    references: HashMap<String, TransactionId>,
    actions: HashMap<ActionLogId, ActionLogEntry>,
    balance_logs: HashMap<BalanceLogId, BalanceLog>,
    balance_log_entries: HashMap<BalanceLogEntryId, BalanceLogEntry>,
    rule_profiles: HashMap<(ProfileScope, String), RuleProfile>,
    balance_entry_types: BTreeSet<String>,
    rate_limit_rules: HashMap<RuleId, RateLimitRule>,
    rate_limit_attempts: HashMap<AttemptKey, RateLimitAttempt>,
    rate_limit_blocks: HashMap<(RuleId, String), RateLimitBlock>,
    api_clients: HashMap<ApiClientId, ApiClient>,
    system_keys: HashMap<String, SystemKey>,
    sessions: HashMap<String, Session>,
    request_logs: BTreeMap<(i64, u64), RequestLog>,
    request_log_seq: u64,
}

/// `HashMap`-backed storage implementation.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| StoreError::Database("memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| StoreError::Database("memory store lock poisoned".into()))
    }
}

impl Store for MemoryStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    fn insert_account(&self, account: &Account) -> Result<()> {
        let mut tables = self.write()?;
        if tables.accounts_by_target.contains_key(&account.funding_target) {
            return Err(StoreError::AccountExists {
                funding_target: account.funding_target.clone(),
            });
        }
        if tables.account_numbers.contains_key(&account.account_number) {
            return Err(StoreError::AccountNumberTaken(account.account_number.clone()));
        }
        tables
            .account_numbers
            .insert(account.account_number.clone(), account.id);
        tables
            .accounts_by_target
            .insert(account.funding_target.clone(), account.id);
        tables.accounts.insert(account.id, account.clone());
        Ok(())
    }

    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        Ok(self.read()?.accounts.get(account_id).cloned())
    }

    fn get_account_by_number(&self, account_number: &str) -> Result<Option<Account>> {
        let tables = self.read()?;
        Ok(tables
            .account_numbers
            .get(account_number)
            .and_then(|id| tables.accounts.get(id))
            .cloned())
    }

    fn get_account_by_target(&self, funding_target: &str) -> Result<Option<Account>> {
        let tables = self.read()?;
        Ok(tables
            .accounts_by_target
            .get(funding_target)
            .and_then(|id| tables.accounts.get(id))
            .cloned())
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        let mut accounts: Vec<_> = self.read()?.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| a.account_number.cmp(&b.account_number));
        Ok(accounts)
    }

    fn highest_account_number(&self) -> Result<Option<u64>> {
        Ok(self
            .read()?
            .account_numbers
            .keys()
            .filter_map(|number| number.parse::<u64>().ok())
            .max())
    }

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    fn commit(&self, batch: &LedgerBatch) -> Result<()> {
        let mut tables = self.write()?;

        for transaction in &batch.transactions {
            if let Some(existing) = tables.references.get(&transaction.reference) {
                if *existing != transaction.id {
                    return Err(StoreError::DuplicateReference {
                        reference: transaction.reference.clone(),
                    });
                }
            }
        }

        for account in &batch.accounts {
            tables
                .account_numbers
                .insert(account.account_number.clone(), account.id);
            tables
                .accounts_by_target
                .insert(account.funding_target.clone(), account.id);
            tables.accounts.insert(account.id, account.clone());
        }
        for transaction in &batch.transactions {
            tables
                .references
                .insert(transaction.reference.clone(), transaction.id);
            tables
                .transactions
                .insert(transaction.id, transaction.clone());
        }
        for action in &batch.actions {
            tables.actions.insert(action.id, action.clone());
        }
        for log in &batch.balance_logs {
            tables.balance_logs.insert(log.id, log.clone());
        }
        for entry in &batch.balance_log_entries {
            tables.balance_log_entries.insert(entry.id, entry.clone());
        }
        Ok(())
    }

    fn get_transaction(&self, transaction_id: &TransactionId) -> Result<Option<Transaction>> {
        Ok(self.read()?.transactions.get(transaction_id).cloned())
    }

    fn get_transaction_by_reference(&self, reference: &str) -> Result<Option<Transaction>> {
        let tables = self.read()?;
        Ok(tables
            .references
            .get(reference)
            .and_then(|id| tables.transactions.get(id))
            .cloned())
    }

    fn list_transactions_by_account(
        &self,
        account_id: &AccountId,
        limit: Option<usize>,
    ) -> Result<Vec<Transaction>> {
        let mut transactions: Vec<_> = self
            .read()?
            .transactions
            .values()
            .filter(|tx| tx.account_id == *account_id)
            .cloned()
            .collect();
        sort_newest_first(&mut transactions);
        if let Some(limit) = limit {
            transactions.truncate(limit);
        }
        Ok(transactions)
    }

    fn list_transactions(&self) -> Result<Vec<Transaction>> {
        let mut transactions: Vec<_> = self.read()?.transactions.values().cloned().collect();
        sort_newest_first(&mut transactions);
        Ok(transactions)
    }

    fn list_pending_transactions(&self, since: DateTime<Utc>) -> Result<Vec<Transaction>> {
        let mut transactions: Vec<_> = self
            .read()?
            .transactions
            .values()
            .filter(|tx| tx.status == TransactionStatus::Pending && tx.created_at >= since)
            .cloned()
            .collect();
        sort_newest_first(&mut transactions);
        Ok(transactions)
    }

    fn list_actions_by_account(&self, account_id: &AccountId) -> Result<Vec<ActionLogEntry>> {
        let mut actions: Vec<_> = self
            .read()?
            .actions
            .values()
            .filter(|a| a.account_id == *account_id)
            .cloned()
            .collect();
        sort_actions(&mut actions);
        Ok(actions)
    }

    fn list_actions_by_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Vec<ActionLogEntry>> {
        let mut actions: Vec<_> = self
            .read()?
            .actions
            .values()
            .filter(|a| a.transaction_id == *transaction_id)
            .cloned()
            .collect();
        actions.sort_by_key(|a| a.sequence);
        Ok(actions)
    }

    fn list_balance_logs_by_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Vec<BalanceLog>> {
        let mut logs: Vec<_> = self
            .read()?
            .balance_logs
            .values()
            .filter(|log| log.transaction_id == *transaction_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(logs)
    }

    fn list_balance_log_entries(&self, log_id: &BalanceLogId) -> Result<Vec<BalanceLogEntry>> {
        let mut entries: Vec<_> = self
            .read()?
            .balance_log_entries
            .values()
            .filter(|entry| entry.balance_log_id == *log_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(entries)
    }

    // =========================================================================
    // Rule Configuration
    // =========================================================================

    fn put_rule_profile(&self, profile: &RuleProfile) -> Result<()> {
        self.write()?
            .rule_profiles
            .insert((profile.scope, profile.name.clone()), profile.clone());
        Ok(())
    }

    fn list_rule_profiles(&self) -> Result<Vec<RuleProfile>> {
        Ok(self.read()?.rule_profiles.values().cloned().collect())
    }

    fn put_balance_entry_type(&self, name: &str) -> Result<()> {
        self.write()?.balance_entry_types.insert(name.to_string());
        Ok(())
    }

    fn list_balance_entry_types(&self) -> Result<Vec<String>> {
        Ok(self.read()?.balance_entry_types.iter().cloned().collect())
    }

    // =========================================================================
    // Rate Limiting
    // =========================================================================

    fn put_rate_limit_rule(&self, rule: &RateLimitRule) -> Result<()> {
        self.write()?.rate_limit_rules.insert(rule.id, rule.clone());
        Ok(())
    }

    fn list_rate_limit_rules(&self) -> Result<Vec<RateLimitRule>> {
        Ok(self.read()?.rate_limit_rules.values().cloned().collect())
    }

    fn increment_attempt(&self, attempt: &RateLimitAttempt) -> Result<()> {
        let key = (
            attempt.rule_id,
            attempt.key.clone(),
            attempt.window_start,
            attempt.endpoint.clone(),
        );
        let mut tables = self.write()?;
        tables
            .rate_limit_attempts
            .entry(key)
            .and_modify(|row| {
                row.count += attempt.count;
                row.method.clone_from(&attempt.method);
                row.last_attempt_at = attempt.last_attempt_at;
            })
            .or_insert_with(|| attempt.clone());
        Ok(())
    }

    fn window_attempts(&self, rule_id: &RuleId, key: &str, window_start: i64) -> Result<u64> {
        Ok(self
            .read()?
            .rate_limit_attempts
            .iter()
            .filter(|((rule, k, window, _), _)| rule == rule_id && k == key && *window == window_start)
            .map(|(_, row)| row.count)
            .sum())
    }

    fn get_rate_limit_block(&self, rule_id: &RuleId, key: &str) -> Result<Option<RateLimitBlock>> {
        Ok(self
            .read()?
            .rate_limit_blocks
            .get(&(*rule_id, key.to_string()))
            .cloned())
    }

    fn put_rate_limit_block(&self, block: &RateLimitBlock) -> Result<()> {
        self.write()?
            .rate_limit_blocks
            .insert((block.rule_id, block.key.clone()), block.clone());
        Ok(())
    }

    // =========================================================================
    // Gateway Records
    // =========================================================================

    fn put_api_client(&self, client: &ApiClient) -> Result<()> {
        self.write()?.api_clients.insert(client.id, client.clone());
        Ok(())
    }

    fn get_api_client(&self, client_id: &ApiClientId) -> Result<Option<ApiClient>> {
        Ok(self.read()?.api_clients.get(client_id).cloned())
    }

    fn get_api_client_by_key(&self, api_key: &str) -> Result<Option<ApiClient>> {
        Ok(self
            .read()?
            .api_clients
            .values()
            .find(|client| client.api_key == api_key)
            .cloned())
    }

    fn put_system_key(&self, key: &SystemKey) -> Result<()> {
        self.write()?.system_keys.insert(key.name.clone(), key.clone());
        Ok(())
    }

    fn get_active_system_key(&self) -> Result<Option<SystemKey>> {
        Ok(self
            .read()?
            .system_keys
            .values()
            .filter(|key| key.active)
            .max_by_key(|key| key.created_at)
            .cloned())
    }

    fn put_session(&self, session: &Session) -> Result<()> {
        self.write()?
            .sessions
            .insert(session.token.clone(), session.clone());
        Ok(())
    }

    fn get_session(&self, token: &str) -> Result<Option<Session>> {
        Ok(self.read()?.sessions.get(token).cloned())
    }

    fn put_request_log(&self, log: &RequestLog) -> Result<()> {
        let mut tables = self.write()?;
        tables.request_log_seq += 1;
        let key = (log.started_at.timestamp_millis(), tables.request_log_seq);
        tables.request_logs.insert(key, log.clone());
        Ok(())
    }

    fn list_request_logs(&self, limit: usize) -> Result<Vec<RequestLog>> {
        Ok(self
            .read()?
            .request_logs
            .values()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wallet_core::{initiate_topup, topup_approved, Initiation, Settlement, DEFAULT_CURRENCY};

    fn seeded() -> (MemoryStore, Account) {
        let store = MemoryStore::new();
        let account = Account::new("100000000001", "merchant-1", DEFAULT_CURRENCY);
        store.insert_account(&account).unwrap();
        (store, account)
    }

    #[test]
    fn accounts_are_unique_per_target_and_number() {
        let (store, _) = seeded();

        let same_target = Account::new("100000000002", "merchant-1", DEFAULT_CURRENCY);
        assert!(matches!(
            store.insert_account(&same_target),
            Err(StoreError::AccountExists { .. })
        ));

        let same_number = Account::new("100000000001", "merchant-2", DEFAULT_CURRENCY);
        assert!(matches!(
            store.insert_account(&same_number),
            Err(StoreError::AccountNumberTaken(_))
        ));

        assert_eq!(store.highest_account_number().unwrap(), Some(100_000_000_001));
        assert!(store.get_account_by_target("merchant-1").unwrap().is_some());
    }

    #[test]
    fn commit_writes_the_whole_batch() {
        let (store, account) = seeded();
        let outcome = initiate_topup(
            &account,
            &Initiation {
                reference: "TOP-1",
                amount: dec!(50),
                description: None,
            },
            Utc::now(),
        )
        .unwrap();
        let transaction_id = outcome.transaction.id;
        store.commit(&outcome.into_batch()).unwrap();

        let stored = store.get_account(&account.id).unwrap().unwrap();
        assert_eq!(stored.uncleared, dec!(50));
        let tx = store.get_transaction_by_reference("TOP-1").unwrap().unwrap();
        assert_eq!(tx.id, transaction_id);
        let actions = store.list_actions_by_transaction(&transaction_id).unwrap();
        assert_eq!(actions.iter().map(|a| a.sequence).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn pending_listing_skips_old_and_settled_transactions() {
        let (store, account) = seeded();
        let now = Utc::now();
        let topup = |account: &Account, reference: &'static str, at| {
            initiate_topup(
                account,
                &Initiation {
                    reference,
                    amount: dec!(10),
                    description: None,
                },
                at,
            )
            .unwrap()
        };

        let stale = topup(&account, "OLD", now - chrono::Duration::hours(2));
        let account = stale.account.clone();
        store.commit(&stale.into_batch()).unwrap();
        let fresh = topup(&account, "NEW", now);
        let account = fresh.account.clone();
        let pending = fresh.transaction.clone();
        store.commit(&fresh.into_batch()).unwrap();

        let since = now - chrono::Duration::minutes(10);
        let listed = store.list_pending_transactions(since).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].reference, "NEW");

        let approved = topup_approved(
            &account,
            Some(&pending),
            &Settlement {
                reference: "NEW",
                ..Settlement::default()
            },
            3,
            now,
        )
        .unwrap();
        store.commit(&approved.into_batch()).unwrap();
        assert!(store.list_pending_transactions(since).unwrap().is_empty());
    }

    #[test]
    fn duplicate_reference_rejects_the_batch() {
        let (store, account) = seeded();
        let now = Utc::now();
        let initiation = Initiation {
            reference: "DUP",
            amount: dec!(5),
            description: None,
        };
        let first = initiate_topup(&account, &initiation, now).unwrap();
        store.commit(&first.into_batch()).unwrap();

        let second = initiate_topup(&account, &initiation, now).unwrap();
        let err = store.commit(&second.into_batch()).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateReference { .. }));

        let stored = store.get_account(&account.id).unwrap().unwrap();
        assert_eq!(stored.uncleared, dec!(5));
    }

    #[test]
    fn attempts_are_summed_across_endpoints() {
        let store = MemoryStore::new();
        let rule = RuleId::generate();
        let now = Utc::now();
        for endpoint in ["/a", "/b", "/a"] {
            store
                .increment_attempt(&RateLimitAttempt {
                    rule_id: rule,
                    key: "ip:1".into(),
                    endpoint: endpoint.into(),
                    method: "GET".into(),
                    window_start: 60,
                    count: 1,
                    last_attempt_at: now,
                })
                .unwrap();
        }
        assert_eq!(store.window_attempts(&rule, "ip:1", 60).unwrap(), 3);
        assert_eq!(store.window_attempts(&rule, "ip:1", 120).unwrap(), 0);
    }
}
