//! The wallet state machine.
//!
//! Each transition is a pure function from the locked account snapshot (and,
//! for approve/reject, the Pending transaction) to a [`TransitionOutcome`]:
//! the mutated account, the created or settled transaction and the two
//! action-log rows describing its bucket movements. Preconditions are checked
//! before anything is computed, so a failing transition produces nothing.
//!
//! | Transition         | Movements                                | Status    |
//! |--------------------|------------------------------------------|-----------|
//! | `initiate_topup`   | +current, +uncleared                     | Pending   |
//! | `topup_approved`   | -uncleared, +available                   | Completed |
//! | `topup_rejected`   | -current, -uncleared                     | Failed    |
//! | `initiate_payment` | -available, +reserved                    | Pending   |
//! | `payment_approved` | -reserved, -current                      | Completed |
//! | `payment_rejected` | -reserved, +available                    | Failed    |

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::account::{Account, Bucket};
use crate::action_log::{ActionLogEntry, ActionType, WorkflowStep};
use crate::batch::LedgerBatch;
use crate::error::{Result, WalletError};
use crate::ids::ActionLogId;
use crate::money::validate_amount;
use crate::transaction::{Transaction, TransactionStatus, TransactionType};

/// Records produced by one successful transition.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    /// The step that ran.
    pub step: WorkflowStep,
    /// Account after the movements, version bumped.
    pub account: Account,
    /// The created (initiate) or settled (approve/reject) transaction.
    pub transaction: Transaction,
    /// Two ordered action-log rows.
    pub actions: Vec<ActionLogEntry>,
}

impl TransitionOutcome {
    /// Convert the outcome into a batch ready for commit.
    #[must_use]
    pub fn into_batch(self) -> LedgerBatch {
        LedgerBatch {
            accounts: vec![self.account],
            transactions: vec![self.transaction],
            actions: self.actions,
            ..LedgerBatch::default()
        }
    }
}

/// Input of an initiate step.
#[derive(Debug, Clone, Copy)]
pub struct Initiation<'a> {
    /// External reference, unique across transactions.
    pub reference: &'a str,
    /// Amount to move.
    pub amount: Decimal,
    /// Description stored on the transaction.
    pub description: Option<&'a str>,
}

/// Input of an approve or reject step.
#[derive(Debug, Clone, Copy, Default)]
pub struct Settlement<'a> {
    /// Reference of the Pending transaction.
    pub reference: &'a str,
    /// Amount expected by the caller; defaults to the transaction amount.
    pub amount: Option<Decimal>,
    /// Provider receipt to attach.
    pub receipt: Option<&'a str>,
    /// Reason or note recorded in the metadata.
    pub note: Option<&'a str>,
}

/// Whether a Pending transaction is approved or rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Complete the transaction.
    Approve,
    /// Fail the transaction.
    Reject,
}

impl Resolution {
    /// The workflow step settling a transaction of `kind` this way.
    ///
    /// Only topups and payments have a workflow.
    #[must_use]
    pub const fn step(self, kind: TransactionType) -> Option<WorkflowStep> {
        match (kind, self) {
            (TransactionType::Topup, Self::Approve) => Some(WorkflowStep::TopupApproved),
            (TransactionType::Topup, Self::Reject) => Some(WorkflowStep::TopupRejected),
            (TransactionType::Payment, Self::Approve) => Some(WorkflowStep::PaymentApproved),
            (TransactionType::Payment, Self::Reject) => Some(WorkflowStep::PaymentRejected),
            _ => None,
        }
    }
}

// ============================================================================
// Initiate steps
// ============================================================================

/// `initiate_topup`: credit `current` and `uncleared`.
///
/// # Errors
///
/// Returns `InvalidAmount` or `InvalidReference` for bad input.
pub fn initiate_topup(
    account: &Account,
    initiation: &Initiation<'_>,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome> {
    let amount = validate_initiation(initiation)?;

    let transaction = Transaction::pending(
        account.id,
        TransactionType::Topup,
        amount,
        initiation.reference,
        initiation.description.unwrap_or("Wallet topup"),
        now,
    );

    let mut draft = Draft::new(WorkflowStep::InitiateTopup, account, transaction, 1, now);
    draft.transaction.balance_before = account.current;
    draft.apply(ActionType::MoneyToCurrent, amount);
    draft.apply(ActionType::MoneyToUncleared, amount);
    draft.transaction.balance_after = draft.account.current;
    Ok(draft.finish(TransactionStatus::Pending, None))
}

/// `initiate_payment`: move `amount` from `available` to `reserved`.
///
/// # Errors
///
/// Returns `InvalidAmount`, `InvalidReference`, `AccountFrozen` or
/// `InsufficientBalance`.
pub fn initiate_payment(
    account: &Account,
    initiation: &Initiation<'_>,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome> {
    let amount = validate_initiation(initiation)?;
    if account.is_frozen {
        return Err(WalletError::AccountFrozen {
            account_id: account.id.to_string(),
        });
    }
    account.require(Bucket::Available, amount)?;

    let transaction = Transaction::pending(
        account.id,
        TransactionType::Payment,
        amount,
        initiation.reference,
        initiation.description.unwrap_or("Wallet payment"),
        now,
    );

    let mut draft = Draft::new(WorkflowStep::InitiatePayment, account, transaction, 1, now);
    draft.transaction.balance_before = account.current;
    draft.apply(ActionType::MoneyFromAvailable, amount);
    draft.apply(ActionType::MoneyToReserved, amount);
    draft.transaction.balance_after = draft.account.current;
    Ok(draft.finish(TransactionStatus::Pending, None))
}

// ============================================================================
// Settle steps
// ============================================================================

/// `topup_approved`: move the amount from `uncleared` to `available`.
///
/// `pending` is the transaction currently stored under the reference;
/// `next_sequence` continues the transaction's action-log trail.
///
/// # Errors
///
/// Returns `PendingTransactionNotFound` unless `pending` is a Pending topup
/// of this account, then `AmountMismatch` or `InsufficientBalance`.
pub fn topup_approved(
    account: &Account,
    pending: Option<&Transaction>,
    settlement: &Settlement<'_>,
    next_sequence: u32,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome> {
    let (transaction, amount) =
        require_pending(account, pending, TransactionType::Topup, settlement)?;
    account.require(Bucket::Uncleared, amount)?;

    let mut draft = Draft::new(
        WorkflowStep::TopupApproved,
        account,
        transaction,
        next_sequence,
        now,
    );
    draft.apply(ActionType::MoneyFromUncleared, amount);
    draft.apply(ActionType::MoneyToAvailable, amount);
    Ok(draft.finish(TransactionStatus::Completed, Some(settlement)))
}

/// `topup_rejected`: take the amount back out of `current` and `uncleared`.
///
/// # Errors
///
/// Returns `PendingTransactionNotFound`, `AmountMismatch` or
/// `InsufficientBalance`.
pub fn topup_rejected(
    account: &Account,
    pending: Option<&Transaction>,
    settlement: &Settlement<'_>,
    next_sequence: u32,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome> {
    let (transaction, amount) =
        require_pending(account, pending, TransactionType::Topup, settlement)?;
    account.require(Bucket::Uncleared, amount)?;
    account.require(Bucket::Current, amount)?;

    let mut draft = Draft::new(
        WorkflowStep::TopupRejected,
        account,
        transaction,
        next_sequence,
        now,
    );
    draft.apply(ActionType::MoneyFromCurrent, amount);
    draft.apply(ActionType::MoneyFromUncleared, amount);
    draft.transaction.balance_after = draft.account.current;
    Ok(draft.finish(TransactionStatus::Failed, Some(settlement)))
}

/// `payment_approved`: release the reservation out of the wallet.
///
/// # Errors
///
/// Returns `PendingTransactionNotFound`, `AmountMismatch` or
/// `InsufficientBalance`.
pub fn payment_approved(
    account: &Account,
    pending: Option<&Transaction>,
    settlement: &Settlement<'_>,
    next_sequence: u32,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome> {
    let (transaction, amount) =
        require_pending(account, pending, TransactionType::Payment, settlement)?;
    account.require(Bucket::Reserved, amount)?;
    account.require(Bucket::Current, amount)?;

    let mut draft = Draft::new(
        WorkflowStep::PaymentApproved,
        account,
        transaction,
        next_sequence,
        now,
    );
    draft.apply(ActionType::MoneyFromReserved, amount);
    draft.apply(ActionType::MoneyFromCurrent, amount);
    draft.transaction.balance_after = draft.account.current;
    Ok(draft.finish(TransactionStatus::Completed, Some(settlement)))
}

/// `payment_rejected`: return the reservation to `available`.
///
/// # Errors
///
/// Returns `PendingTransactionNotFound`, `AmountMismatch` or
/// `InsufficientBalance`.
pub fn payment_rejected(
    account: &Account,
    pending: Option<&Transaction>,
    settlement: &Settlement<'_>,
    next_sequence: u32,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome> {
    let (transaction, amount) =
        require_pending(account, pending, TransactionType::Payment, settlement)?;
    account.require(Bucket::Reserved, amount)?;

    let mut draft = Draft::new(
        WorkflowStep::PaymentRejected,
        account,
        transaction,
        next_sequence,
        now,
    );
    draft.apply(ActionType::MoneyFromReserved, amount);
    draft.apply(ActionType::MoneyToAvailable, amount);
    Ok(draft.finish(TransactionStatus::Failed, Some(settlement)))
}

/// Dispatch to the approve/reject transition for `kind`.
///
/// # Errors
///
/// Returns `PendingTransactionNotFound` for transaction types without a
/// workflow, otherwise whatever the selected transition returns.
pub fn settle(
    kind: TransactionType,
    resolution: Resolution,
    account: &Account,
    pending: Option<&Transaction>,
    settlement: &Settlement<'_>,
    next_sequence: u32,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome> {
    let transition = match resolution.step(kind) {
        Some(WorkflowStep::TopupApproved) => topup_approved,
        Some(WorkflowStep::TopupRejected) => topup_rejected,
        Some(WorkflowStep::PaymentApproved) => payment_approved,
        Some(WorkflowStep::PaymentRejected) => payment_rejected,
        _ => {
            return Err(WalletError::PendingTransactionNotFound {
                kind: kind.to_string(),
                reference: settlement.reference.to_string(),
            })
        }
    };
    transition(account, pending, settlement, next_sequence, now)
}

// ============================================================================
// Freeze
// ============================================================================

/// Freeze the account. Frozen accounts cannot initiate payments.
#[must_use]
pub fn freeze(account: &Account, now: DateTime<Utc>) -> Account {
    set_frozen(account, true, now)
}

/// Lift a freeze.
#[must_use]
pub fn unfreeze(account: &Account, now: DateTime<Utc>) -> Account {
    set_frozen(account, false, now)
}

fn set_frozen(account: &Account, frozen: bool, now: DateTime<Utc>) -> Account {
    let mut next = account.clone();
    next.is_frozen = frozen;
    next.touch(now, false);
    next
}

// ============================================================================
// Helpers
// ============================================================================

fn validate_initiation(initiation: &Initiation<'_>) -> Result<Decimal> {
    if initiation.reference.trim().is_empty() {
        return Err(WalletError::InvalidReference(
            "reference must not be empty".into(),
        ));
    }
    validate_amount(initiation.amount)
}

/// The lookup filters on status=Pending: a settled transaction is reported
/// exactly like a missing one.
fn require_pending(
    account: &Account,
    pending: Option<&Transaction>,
    kind: TransactionType,
    settlement: &Settlement<'_>,
) -> Result<(Transaction, Decimal)> {
    let transaction = pending
        .filter(|tx| {
            tx.reference == settlement.reference
                && tx.account_id == account.id
                && tx.is_pending(kind)
        })
        .ok_or_else(|| WalletError::PendingTransactionNotFound {
            kind: kind.to_string(),
            reference: settlement.reference.to_string(),
        })?;

    if let Some(requested) = settlement.amount {
        let requested = validate_amount(requested)?;
        if requested != transaction.amount {
            return Err(WalletError::AmountMismatch {
                reference: transaction.reference.clone(),
                expected: transaction.amount,
                actual: requested,
            });
        }
    }

    Ok((transaction.clone(), transaction.amount))
}

/// Working copy of a transition in progress.
struct Draft {
    step: WorkflowStep,
    account: Account,
    transaction: Transaction,
    actions: Vec<ActionLogEntry>,
    next_sequence: u32,
    now: DateTime<Utc>,
}

impl Draft {
    fn new(
        step: WorkflowStep,
        account: &Account,
        transaction: Transaction,
        next_sequence: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            step,
            account: account.clone(),
            transaction,
            actions: Vec::with_capacity(2),
            next_sequence,
            now,
        }
    }

    fn apply(&mut self, action_type: ActionType, amount: Decimal) {
        let bucket = action_type.bucket();
        let before = self.account.balance(bucket);
        let after = before + action_type.signed(amount);
        self.account.set_balance(bucket, after);
        self.transaction
            .record_change(self.step.as_str(), bucket.as_str(), before, after);

        let description = if action_type.is_credit() {
            format!("Added {amount} to {bucket} balance")
        } else {
            format!("Deducted {amount} from {bucket} balance")
        };

        self.actions.push(ActionLogEntry {
            id: ActionLogId::generate(),
            account_id: self.account.id,
            transaction_id: self.transaction.id,
            reference: self.transaction.reference.clone(),
            action_type,
            amount,
            balance_before: before,
            balance_after: after,
            workflow_step: self.step,
            sequence: self.next_sequence,
            description,
            created_at: self.now,
        });
        self.next_sequence += 1;
    }

    fn finish(
        mut self,
        status: TransactionStatus,
        settlement: Option<&Settlement<'_>>,
    ) -> TransitionOutcome {
        self.account.touch(self.now, true);
        self.transaction.status = status;
        self.transaction.updated_at = self.now;

        if let Some(settlement) = settlement {
            if let Some(receipt) = settlement.receipt {
                self.transaction.receipt_id = Some(receipt.to_string());
            }
            if let Some(note) = settlement.note {
                self.transaction
                    .metadata
                    .insert(format!("{}_note", self.step), note.into());
            }
        }

        TransitionOutcome {
            step: self.step,
            account: self.account,
            transaction: self.transaction,
            actions: self.actions,
        }
    }
}
