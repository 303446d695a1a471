//! The rule-profile executor.
//!
//! An executor run resolves the executor profile for a workflow step, opens a
//! [`BalanceLog`], and runs each configured processor against a shared
//! [`BalanceLedger`]. The run is all-or-nothing: on success the caller commits
//! the returned log and entries together with the transition; on failure only
//! the Failed log survives.
//!
//! Missing configuration (no balance entry type, no executor profile, no
//! active steps) is not an error: the run is skipped and a warning is logged
//! every time so misconfiguration stays visible.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::account::Account;
use crate::balance_log::{BalanceLog, BalanceLogEntry, LogState};
use crate::batch::LedgerBatch;
use crate::ids::BalanceLogId;
use crate::ledger::BalanceLedger;
use crate::processors::{ProcessorError, ProcessorRegistry, StepContext};
use crate::rules::{ProfileScope, RuleBook};
use crate::transaction::Transaction;

/// Input of one executor run.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionRequest<'a> {
    /// Executor (and balance entry type) name.
    pub executor: &'a str,
    /// Transaction being processed.
    pub transaction: &'a Transaction,
    /// Account snapshot the processors read balances from.
    pub account: &'a Account,
    /// Amount to process.
    pub amount: Decimal,
    /// Description stored on the balance log.
    pub description: &'a str,
    /// Provider receipt, when known.
    pub receipt: Option<&'a str>,
}

/// Why a run did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No balance entry type with the executor's name.
    MissingEntryType,
    /// No active executor profile.
    MissingProfile,
    /// The profile has no active steps.
    NoActiveSteps,
}

/// Records produced by a successful run.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// The Completed balance log.
    pub balance_log: BalanceLog,
    /// Entries posted during the run.
    pub entries: Vec<BalanceLogEntry>,
    /// Result of the last processor.
    pub result: Decimal,
    /// Delay the caller should honour once it has released the account.
    pub pacing: Duration,
}

impl ExecutionReport {
    /// Move the log and its entries into `batch`.
    pub fn append_to(self, batch: &mut LedgerBatch) {
        batch.balance_logs.push(self.balance_log);
        batch.balance_log_entries.extend(self.entries);
    }
}

/// Result of a run that did not fail.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    /// Configuration was missing; nothing was recorded.
    Skipped(SkipReason),
    /// Every step succeeded.
    Completed(ExecutionReport),
}

/// What went wrong inside a run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepFailure {
    /// A profile names a processor that is not registered.
    #[error("processor {0} is not registered")]
    UnknownProcessor(String),

    /// A processor produced no result (its own profile is missing or empty).
    #[error("processor {0} returned no result")]
    NoResult(String),

    /// A processor command failed.
    #[error(transparent)]
    Processor(#[from] ProcessorError),
}

/// A failed run, carrying the Failed balance log to persist on its own.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{executor} execution failed: {cause}")]
pub struct ExecutionError {
    /// Executor name.
    pub executor: String,
    /// The failing step.
    pub cause: StepFailure,
    /// Balance log marked Failed.
    pub failed_log: Box<BalanceLog>,
}

/// Resolves and runs rule profiles.
#[derive(Debug, Clone, Copy)]
pub struct RuleProfileExecutor<'a> {
    registry: &'a ProcessorRegistry,
    rules: &'a RuleBook,
}

impl<'a> RuleProfileExecutor<'a> {
    /// Create an executor over a registry and a rule snapshot.
    #[must_use]
    pub fn new(registry: &'a ProcessorRegistry, rules: &'a RuleBook) -> Self {
        Self { registry, rules }
    }

    /// Run the profile configured for `request.executor`.
    ///
    /// # Errors
    ///
    /// Returns an `ExecutionError` holding the Failed balance log when any
    /// step fails; none of the run's postings should be committed.
    pub fn execute(
        &self,
        request: &ExecutionRequest<'_>,
        now: DateTime<Utc>,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let executor = request.executor;

        if !self.rules.has_entry_type(executor) {
            tracing::warn!(executor, "No balance entry type configured; skipping execution");
            return Ok(ExecutionOutcome::Skipped(SkipReason::MissingEntryType));
        }
        let Some(profile) = self.rules.profile(ProfileScope::Executor, executor) else {
            tracing::warn!(executor, "No rule profile configured; skipping execution");
            return Ok(ExecutionOutcome::Skipped(SkipReason::MissingProfile));
        };
        let steps = profile.active_commands();
        if steps.is_empty() {
            tracing::warn!(executor, "Rule profile has no active steps; skipping execution");
            return Ok(ExecutionOutcome::Skipped(SkipReason::NoActiveSteps));
        }

        let mut ledger = BalanceLedger::open(BalanceLog {
            id: BalanceLogId::generate(),
            account_id: request.account.id,
            transaction_id: request.transaction.id,
            balance_entry_type: executor.to_string(),
            reference: request.transaction.reference.clone(),
            description: request.description.to_string(),
            receipt: request.receipt.map(str::to_string),
            amount: request.amount,
            total_balance: request.account.current,
            state: LogState::Active,
            failure: None,
            created_at: now,
            updated_at: now,
        });

        let mut result = Decimal::ZERO;
        for step in steps {
            let outcome = match self.registry.get(&step.name) {
                None => Err(StepFailure::UnknownProcessor(step.name.clone())),
                Some(processor) => {
                    let mut ctx = StepContext {
                        account: request.account,
                        amount: request.amount,
                        ledger: &mut ledger,
                        now,
                    };
                    match processor.process(self.rules, &mut ctx) {
                        Ok(Some(value)) => Ok(value),
                        Ok(None) => Err(StepFailure::NoResult(step.name.clone())),
                        Err(e) => Err(StepFailure::from(e)),
                    }
                }
            };

            match outcome {
                Ok(value) => result = value,
                Err(cause) => {
                    tracing::error!(
                        executor,
                        step = %step.name,
                        reference = %request.transaction.reference,
                        error = %cause,
                        "Rule profile step failed"
                    );
                    let failed_log = ledger.fail(&cause.to_string(), now);
                    return Err(ExecutionError {
                        executor: executor.to_string(),
                        cause,
                        failed_log: Box::new(failed_log),
                    });
                }
            }
        }

        let (balance_log, entries) = ledger.close(LogState::Completed, now);
        tracing::debug!(
            executor,
            balance_log_id = %balance_log.id,
            entries = entries.len(),
            "Rule profile executed"
        );

        Ok(ExecutionOutcome::Completed(ExecutionReport {
            balance_log,
            entries,
            result,
            pacing: profile.step_delay(),
        }))
    }
}
