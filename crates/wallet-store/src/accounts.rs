//! Pessimistic account locking and account creation.
//!
//! Every workflow step on an account runs while holding that account's lock,
//! so steps on the same account serialize while steps on different accounts
//! run in parallel. Account creation takes one global lock because it scans
//! for the highest account number.
//!
//! Lock entries nobody holds or waits on are pruned whenever a lock is taken,
//! so the lock table only grows with the number of accounts in flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use wallet_core::{next_account_number, Account, AccountId};

use crate::error::{Result, StoreError};
use crate::Store;

/// Probes before giving up on finding a free account number.
const MAX_NUMBER_PROBES: usize = 1_000;

/// An account snapshot read while holding its lock.
///
/// The lock is released when this value is dropped.
pub struct LockedAccount {
    account: Account,
    _guard: OwnedMutexGuard<()>,
}

impl LockedAccount {
    /// The snapshot.
    #[must_use]
    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Account ID.
    #[must_use]
    pub fn id(&self) -> AccountId {
        self.account.id
    }
}

impl std::fmt::Debug for LockedAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockedAccount")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

/// Account access with per-account locks on top of a [`Store`].
pub struct AccountStore {
    store: Arc<dyn Store>,
    locks: Mutex<HashMap<AccountId, Arc<AsyncMutex<()>>>>,
    creation: AsyncMutex<()>,
}

impl AccountStore {
    /// Wrap a store.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
            creation: AsyncMutex::new(()),
        }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    fn lock_for(&self, account_id: AccountId) -> Result<Arc<AsyncMutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| StoreError::Database("account lock table poisoned".into()))?;
        // A count of one means only the table holds the lock, and new holders
        // can only clone it through the table.
        locks.retain(|id, lock| *id == account_id || Arc::strong_count(lock) > 1);
        Ok(Arc::clone(locks.entry(account_id).or_default()))
    }

    #[cfg(test)]
    fn lock_table_len(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or_default()
    }

    /// Lock an account and read it.
    ///
    /// Waits while another step holds the same account.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account doesn't exist.
    pub async fn lock_and_load(&self, account_id: &AccountId) -> Result<LockedAccount> {
        let guard = self.lock_for(*account_id)?.lock_owned().await;
        tracing::trace!(account_id = %account_id, "Account lock acquired");

        let account = self
            .store
            .get_account(account_id)?
            .ok_or(StoreError::NotFound)?;
        Ok(LockedAccount {
            account,
            _guard: guard,
        })
    }

    /// Read an account without locking it.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account doesn't exist.
    pub fn get(&self, account_id: &AccountId) -> Result<Account> {
        self.store
            .get_account(account_id)?
            .ok_or(StoreError::NotFound)
    }

    /// Create the account for `funding_target` with the next free account
    /// number.
    ///
    /// # Errors
    ///
    /// - `StoreError::AccountExists` if the target already has an account.
    /// - `StoreError::AccountNumbersExhausted` if no number is left.
    pub async fn create_account(&self, funding_target: &str, currency: &str) -> Result<Account> {
        let _creation = self.creation.lock().await;

        if self.store.get_account_by_target(funding_target)?.is_some() {
            return Err(StoreError::AccountExists {
                funding_target: funding_target.to_string(),
            });
        }

        let mut highest = self.store.highest_account_number()?;
        for _ in 0..MAX_NUMBER_PROBES {
            let number = next_account_number(highest).ok_or(StoreError::AccountNumbersExhausted)?;
            if self.store.get_account_by_number(&number)?.is_some() {
                highest = number.parse().ok();
                continue;
            }

            let account = Account::new(number, funding_target, currency);
            self.store.insert_account(&account)?;
            tracing::info!(
                account_id = %account.id,
                account_number = %account.account_number,
                funding_target,
                "Account created"
            );
            return Ok(account);
        }
        Err(StoreError::AccountNumbersExhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use std::time::Duration;
    use wallet_core::DEFAULT_CURRENCY;

    fn account_store() -> AccountStore {
        AccountStore::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn account_numbers_are_sequential() {
        let accounts = account_store();
        let first = accounts.create_account("a", DEFAULT_CURRENCY).await.unwrap();
        let second = accounts.create_account("b", DEFAULT_CURRENCY).await.unwrap();
        assert_eq!(first.account_number, "100000000001");
        assert_eq!(second.account_number, "100000000002");

        let again = accounts.create_account("a", DEFAULT_CURRENCY).await;
        assert!(matches!(again, Err(StoreError::AccountExists { .. })));
    }

    #[tokio::test]
    async fn legacy_numbers_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_account(&Account::new("LEGACY-7", "legacy", DEFAULT_CURRENCY))
            .unwrap();
        store
            .insert_account(&Account::new("100000000041", "old", DEFAULT_CURRENCY))
            .unwrap();
        let accounts = AccountStore::new(store);

        let created = accounts.create_account("new", DEFAULT_CURRENCY).await.unwrap();
        assert_eq!(created.account_number, "100000000042");
    }

    #[tokio::test]
    async fn missing_account_is_not_found() {
        let accounts = account_store();
        let result = accounts.lock_and_load(&AccountId::generate()).await;
        assert!(matches!(result, Err(StoreError::NotFound)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn same_account_locks_serialize() {
        let accounts = Arc::new(account_store());
        let account = accounts.create_account("m", DEFAULT_CURRENCY).await.unwrap();

        let held = accounts.lock_and_load(&account.id).await.unwrap();
        let contender = {
            let accounts = Arc::clone(&accounts);
            let id = account.id;
            tokio::spawn(async move { accounts.lock_and_load(&id).await.map(|l| l.id()) })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(held);
        let id = tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(id, account.id);
    }

    #[tokio::test]
    async fn released_locks_are_pruned() {
        let accounts = account_store();
        let a = accounts.create_account("a", DEFAULT_CURRENCY).await.unwrap();
        let b = accounts.create_account("b", DEFAULT_CURRENCY).await.unwrap();

        let held_a = accounts.lock_and_load(&a.id).await.unwrap();
        let held_b = accounts.lock_and_load(&b.id).await.unwrap();
        assert_eq!(accounts.lock_table_len(), 2);
        drop(held_a);
        drop(held_b);

        for _ in 0..10 {
            let _step = accounts.lock_and_load(&a.id).await.unwrap();
        }
        assert_eq!(accounts.lock_table_len(), 1);

        let _ = accounts.lock_and_load(&AccountId::generate()).await;
        let _c = accounts.lock_and_load(&b.id).await.unwrap();
        assert_eq!(accounts.lock_table_len(), 1);
    }

    #[tokio::test]
    async fn different_accounts_do_not_block() {
        let accounts = account_store();
        let a = accounts.create_account("a", DEFAULT_CURRENCY).await.unwrap();
        let b = accounts.create_account("b", DEFAULT_CURRENCY).await.unwrap();

        let _held = accounts.lock_and_load(&a.id).await.unwrap();
        let other = tokio::time::timeout(Duration::from_millis(100), accounts.lock_and_load(&b.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(other.id(), b.id);
    }
}
