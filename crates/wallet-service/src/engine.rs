//! Workflow orchestration.
//!
//! Every step runs the same sequence against one account:
//!
//! 1. lock the account and read it
//! 2. run the pure transition from `wallet_core::workflow`
//! 3. run the rule-profile executor configured for the step
//! 4. commit the transition and the execution records as one batch
//! 5. release the lock, then honour the profile's pacing delay
//!
//! A failed executor run never commits balance movements. During an
//! initiate step the transaction is stored Failed with the Failed balance
//! log; during approve/reject only the Failed balance log is stored and the
//! transaction stays Pending so the step can be retried.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

use wallet_core::{
    health_report, initiate_payment, initiate_topup, reconcile_account, remark_history, settle,
    Account, AccountId, ExecutionError, ExecutionOutcome, ExecutionRequest, HealthReport,
    Initiation, LedgerBatch, LogState, ProcessorRegistry, ReconciliationReport,
    ReferenceGenerator, Resolution, RuleProfileExecutor, Settlement, Transaction,
    TransactionStatus, TransactionType, TransitionOutcome, WalletError,
};
use wallet_store::{AccountStore, Store, StoreError};

use crate::notify::{Notification, Notifier};

/// Errors raised while running a workflow step.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Validation or transition failure.
    #[error(transparent)]
    Wallet(#[from] WalletError),

    /// Storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The rule-profile run failed; nothing but its Failed log was stored.
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// No transaction carries the reference.
    #[error("transaction not found: {0}")]
    TransactionNotFound(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Runs workflow steps against locked accounts.
pub struct WalletEngine {
    accounts: Arc<AccountStore>,
    registry: ProcessorRegistry,
    notifier: Arc<dyn Notifier>,
    references: Mutex<ReferenceGenerator>,
}

impl WalletEngine {
    /// Create an engine with the standard processors.
    #[must_use]
    pub fn new(accounts: Arc<AccountStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            accounts,
            registry: ProcessorRegistry::standard(),
            notifier,
            references: Mutex::new(ReferenceGenerator::new()),
        }
    }

    /// The locked account store.
    #[must_use]
    pub fn accounts(&self) -> &Arc<AccountStore> {
        &self.accounts
    }

    fn store(&self) -> &Arc<dyn Store> {
        self.accounts.store()
    }

    /// A fresh transaction reference for callers that don't bring one.
    pub fn next_reference(&self) -> String {
        self.references
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generate()
    }

    /// Create the account of `funding_target`.
    pub async fn create_account(&self, funding_target: &str, currency: &str) -> Result<Account> {
        Ok(self.accounts.create_account(funding_target, currency).await?)
    }

    // =========================================================================
    // Initiate
    // =========================================================================

    /// Start a topup or payment on `account_id`.
    ///
    /// Returns the Pending transaction.
    pub async fn initiate(
        &self,
        kind: TransactionType,
        account_id: &AccountId,
        initiation: &Initiation<'_>,
    ) -> Result<Transaction> {
        let transition = match kind {
            TransactionType::Topup => initiate_topup,
            TransactionType::Payment => initiate_payment,
            TransactionType::Adjustment | TransactionType::Refund => {
                return Err(WalletError::InvalidReference(format!(
                    "{kind} transactions have no workflow"
                ))
                .into())
            }
        };

        let rules = self.store().load_rule_book()?;
        let locked = self.accounts.lock_and_load(account_id).await?;
        let now = Utc::now();

        if self
            .store()
            .get_transaction_by_reference(initiation.reference)?
            .is_some()
        {
            return Err(WalletError::DuplicateReference {
                reference: initiation.reference.to_string(),
            }
            .into());
        }

        let outcome = transition(locked.account(), initiation, now)?;
        outcome.account.validate()?;

        let executor = RuleProfileExecutor::new(&self.registry, &rules);
        let run = executor.execute(
            &ExecutionRequest {
                executor: outcome.step.executor_name(),
                transaction: &outcome.transaction,
                account: locked.account(),
                amount: outcome.transaction.amount,
                description: &outcome.transaction.description,
                receipt: None,
            },
            now,
        );

        let (batch, pacing) = match run {
            Ok(run) => Self::with_execution(outcome.into_batch(), run),
            Err(err) => {
                let failed = failed_initiation(&outcome, &err, now);
                self.store().commit(&LedgerBatch {
                    transactions: vec![failed],
                    balance_logs: vec![(*err.failed_log).clone()],
                    ..LedgerBatch::default()
                })?;
                return Err(err.into());
            }
        };

        self.store().commit(&batch)?;
        drop(locked);

        let transaction = batch
            .transactions
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Database("committed batch without transaction".into()))?;
        tracing::info!(
            account_id = %account_id,
            reference = %transaction.reference,
            kind = %kind,
            amount = %transaction.amount,
            "Transaction initiated"
        );

        pace(pacing).await;
        Ok(transaction)
    }

    // =========================================================================
    // Approve / reject
    // =========================================================================

    /// Approve or reject the Pending transaction named by `settlement`.
    ///
    /// Returns the settled transaction.
    pub async fn settle(
        &self,
        kind: TransactionType,
        resolution: Resolution,
        settlement: &Settlement<'_>,
    ) -> Result<Transaction> {
        let not_pending = || WalletError::PendingTransactionNotFound {
            kind: kind.to_string(),
            reference: settlement.reference.to_string(),
        };
        let found = self
            .store()
            .get_transaction_by_reference(settlement.reference)?
            .ok_or_else(not_pending)?;

        let rules = self.store().load_rule_book()?;
        let locked = self.accounts.lock_and_load(&found.account_id).await?;
        let now = Utc::now();

        // Re-read under the lock: a concurrent step may have settled it.
        let pending = self.store().get_transaction(&found.id)?;
        let next_sequence = self
            .store()
            .list_actions_by_transaction(&found.id)?
            .iter()
            .map(|action| action.sequence)
            .max()
            .unwrap_or(0)
            + 1;

        let outcome = settle(
            kind,
            resolution,
            locked.account(),
            pending.as_ref(),
            settlement,
            next_sequence,
            now,
        )?;
        outcome.account.validate()?;

        let executor = RuleProfileExecutor::new(&self.registry, &rules);
        let run = executor.execute(
            &ExecutionRequest {
                executor: outcome.step.executor_name(),
                transaction: &outcome.transaction,
                account: locked.account(),
                amount: outcome.transaction.amount,
                description: &outcome.transaction.description,
                receipt: settlement.receipt,
            },
            now,
        );

        let run = match run {
            Ok(run) => run,
            Err(err) => {
                self.store().commit(&LedgerBatch {
                    balance_logs: vec![(*err.failed_log).clone()],
                    ..LedgerBatch::default()
                })?;
                return Err(err.into());
            }
        };

        let final_state = match resolution {
            Resolution::Approve => LogState::Completed,
            Resolution::Reject => LogState::Failed,
        };
        let history = self.balance_history(&outcome.transaction)?;
        let (mut batch, pacing) = Self::with_execution(outcome.into_batch(), run);
        batch.merge(history);
        remark_history(
            &mut batch.balance_logs,
            &mut batch.balance_log_entries,
            final_state,
            now,
        );

        self.store().commit(&batch)?;
        let account = locked.account().clone();
        drop(locked);

        let transaction = batch
            .transactions
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Database("committed batch without transaction".into()))?;
        tracing::info!(
            account_id = %account.id,
            reference = %transaction.reference,
            kind = %kind,
            status = ?transaction.status,
            "Transaction settled"
        );

        self.notify(&account, &transaction, resolution);
        pace(pacing).await;
        Ok(transaction)
    }

    /// Balance logs and entries already stored for `transaction`.
    fn balance_history(&self, transaction: &Transaction) -> Result<LedgerBatch> {
        let logs = self
            .store()
            .list_balance_logs_by_transaction(&transaction.id)?;
        let mut entries = Vec::new();
        for log in &logs {
            entries.extend(self.store().list_balance_log_entries(&log.id)?);
        }
        Ok(LedgerBatch {
            balance_logs: logs,
            balance_log_entries: entries,
            ..LedgerBatch::default()
        })
    }

    fn with_execution(mut batch: LedgerBatch, run: ExecutionOutcome) -> (LedgerBatch, Duration) {
        match run {
            ExecutionOutcome::Completed(report) => {
                let pacing = report.pacing;
                report.append_to(&mut batch);
                (batch, pacing)
            }
            ExecutionOutcome::Skipped(_) => (batch, Duration::ZERO),
        }
    }

    fn notify(&self, account: &Account, transaction: &Transaction, resolution: Resolution) {
        let outcome = match resolution {
            Resolution::Approve => "approved",
            Resolution::Reject => "rejected",
        };
        let notification = Notification {
            recipient: account.funding_target.clone(),
            template: format!("{}_{outcome}", transaction.transaction_type),
            context: serde_json::json!({
                "account_number": account.account_number,
                "reference": transaction.reference,
                "amount": transaction.amount,
                "receipt": transaction.receipt_id,
                "currency": account.currency,
            }),
        };
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move { notifier.send(notification).await });
    }

    // =========================================================================
    // Account maintenance
    // =========================================================================

    /// Freeze or unfreeze an account.
    pub async fn set_frozen(&self, account_id: &AccountId, frozen: bool) -> Result<Account> {
        let locked = self.accounts.lock_and_load(account_id).await?;
        let now = Utc::now();
        let account = if frozen {
            wallet_core::freeze(locked.account(), now)
        } else {
            wallet_core::unfreeze(locked.account(), now)
        };
        self.store().commit(&LedgerBatch {
            accounts: vec![account.clone()],
            ..LedgerBatch::default()
        })?;
        tracing::info!(account_id = %account_id, frozen, "Account freeze state changed");
        Ok(account)
    }

    /// Replay the account's action log against its stored buckets.
    pub async fn reconcile(&self, account_id: &AccountId) -> Result<ReconciliationReport> {
        let locked = self.accounts.lock_and_load(account_id).await?;
        let actions = self.store().list_actions_by_account(account_id)?;
        let report = reconcile_account(locked.account(), &actions);
        if !report.is_consistent() {
            tracing::warn!(
                account_id = %account_id,
                discrepancies = report.discrepancies.len(),
                invariant_holds = report.invariant_holds,
                "Account does not reconcile"
            );
        }
        Ok(report)
    }

    /// System-wide account and transaction figures.
    pub fn health_report(&self) -> Result<HealthReport> {
        let accounts = self.store().list_accounts()?;
        let transactions = self.store().list_transactions()?;
        Ok(health_report(&accounts, &transactions, Utc::now()))
    }
}

impl std::fmt::Debug for WalletEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletEngine")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// The initiated transaction as stored after its executor failed.
fn failed_initiation(
    outcome: &TransitionOutcome,
    err: &ExecutionError,
    now: DateTime<Utc>,
) -> Transaction {
    let mut transaction = outcome.transaction.clone();
    transaction.status = TransactionStatus::Failed;
    transaction.balance_after = transaction.balance_before;
    transaction.metadata.clear();
    transaction
        .metadata
        .insert("failure".into(), err.to_string().into());
    transaction.updated_at = now;
    transaction
}

async fn pace(delay: Duration) {
    if !delay.is_zero() {
        tracing::debug!(delay_ms = delay.as_millis(), "Pacing after workflow step");
        tokio::time::sleep(delay).await;
    }
}
