//! Processors and the registry that resolves them by name.
//!
//! Stored rule profiles refer to processors and commands by string. The
//! registry maps those strings to compile-time processors and function
//! pointers, populated once at startup.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::account::{Account, Bucket};
use crate::ledger::{BalanceLedger, LedgerError};
use crate::rules::{ProfileScope, RuleBook};

/// Everything a command needs to post to the ledger.
pub struct StepContext<'a> {
    /// Account snapshot the run operates on.
    pub account: &'a Account,
    /// Amount being processed.
    pub amount: Decimal,
    /// Ledger of the current run.
    pub ledger: &'a mut BalanceLedger,
    /// Timestamp for posted entries.
    pub now: DateTime<Utc>,
}

/// A leaf command: one ledger posting, returning the new bucket balance.
pub type CommandFn = fn(&mut StepContext<'_>) -> Result<Decimal, LedgerError>;

/// Errors raised while running a processor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessorError {
    /// A profile names a command the processor does not expose.
    #[error("processor {processor} has no command {command}")]
    UnknownCommand {
        /// Processor name.
        processor: String,
        /// Missing command name.
        command: String,
    },

    /// A ledger posting was rejected.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

macro_rules! ledger_command {
    ($name:ident, $op:ident, $bucket:expr) => {
        fn $name(ctx: &mut StepContext<'_>) -> Result<Decimal, LedgerError> {
            ctx.ledger.$op(ctx.account, $bucket, ctx.amount, ctx.now)
        }
    };
}

ledger_command!(credit_account_current, credit, Bucket::Current);
ledger_command!(credit_account_available, credit, Bucket::Available);
ledger_command!(credit_account_reserved, credit, Bucket::Reserved);
ledger_command!(credit_account_uncleared, credit, Bucket::Uncleared);
ledger_command!(debit_account_current, debit, Bucket::Current);
ledger_command!(debit_account_available, debit, Bucket::Available);
ledger_command!(debit_account_reserved, debit, Bucket::Reserved);
ledger_command!(debit_account_uncleared, debit, Bucket::Uncleared);

/// A named processor exposing a set of named commands.
#[derive(Clone)]
pub struct Processor {
    name: String,
    commands: HashMap<&'static str, CommandFn>,
}

impl fmt::Debug for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut commands: Vec<_> = self.commands.keys().collect();
        commands.sort();
        f.debug_struct("Processor")
            .field("name", &self.name)
            .field("commands", &commands)
            .finish()
    }
}

impl Processor {
    /// A processor without commands.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commands: HashMap::new(),
        }
    }

    /// Register a command under `name`.
    #[must_use]
    pub fn with_command(mut self, name: &'static str, command: CommandFn) -> Self {
        self.commands.insert(name, command);
        self
    }

    /// Processor name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the commands configured for this processor, in profile order.
    ///
    /// Returns the result of the last command, or `None` when no processor
    /// profile (or no active command) is configured.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCommand` for a command this processor does not expose,
    /// or the first rejected ledger posting.
    pub fn process(
        &self,
        rules: &RuleBook,
        ctx: &mut StepContext<'_>,
    ) -> Result<Option<Decimal>, ProcessorError> {
        let Some(profile) = rules.profile(ProfileScope::Processor, &self.name) else {
            tracing::warn!(processor = %self.name, "No rule profile configured for processor");
            return Ok(None);
        };

        let mut last = None;
        for command in profile.active_commands() {
            let run = self.commands.get(command.name.as_str()).ok_or_else(|| {
                ProcessorError::UnknownCommand {
                    processor: self.name.clone(),
                    command: command.name.clone(),
                }
            })?;
            last = Some(run(&mut *ctx)?);
        }
        Ok(last)
    }
}

/// Name → processor map.
#[derive(Debug, Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Processor>,
}

impl ProcessorRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a processor.
    pub fn register(&mut self, processor: Processor) {
        self.processors.insert(processor.name.clone(), processor);
    }

    /// Look up a processor by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Processor> {
        self.processors.get(name)
    }

    /// Registry with the six workflow processors.
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(
            Processor::new("InitiateTopup")
                .with_command("credit_account_current", credit_account_current)
                .with_command("credit_account_uncleared", credit_account_uncleared),
        );
        registry.register(
            Processor::new("ApproveTopupTransaction")
                .with_command("debit_account_uncleared", debit_account_uncleared)
                .with_command("credit_account_available", credit_account_available),
        );
        registry.register(
            Processor::new("RejectTopupTransaction")
                .with_command("debit_account_current", debit_account_current)
                .with_command("debit_account_uncleared", debit_account_uncleared),
        );
        registry.register(
            Processor::new("InitiatePayment")
                .with_command("debit_account_available", debit_account_available)
                .with_command("credit_account_reserved", credit_account_reserved),
        );
        registry.register(
            Processor::new("ApprovePaymentTransaction")
                .with_command("debit_account_reserved", debit_account_reserved)
                .with_command("debit_account_current", debit_account_current),
        );
        registry.register(
            Processor::new("RejectPaymentTransaction")
                .with_command("debit_account_reserved", debit_account_reserved)
                .with_command("credit_account_available", credit_account_available),
        );
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::DEFAULT_CURRENCY;
    use crate::balance_log::{BalanceLog, EntryType, LogState};
    use crate::ids::{BalanceLogId, TransactionId};
    use crate::rules::RuleProfile;
    use rust_decimal_macros::dec;

    fn ledger_for(account: &Account) -> BalanceLedger {
        let now = Utc::now();
        BalanceLedger::open(BalanceLog {
            id: BalanceLogId::generate(),
            account_id: account.id,
            transaction_id: TransactionId::generate(),
            balance_entry_type: "InitiatePayment".into(),
            reference: "R1".into(),
            description: String::new(),
            receipt: None,
            amount: dec!(30),
            total_balance: account.current,
            state: LogState::Active,
            failure: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn funded() -> Account {
        let mut account = Account::new("100000000001", "m", DEFAULT_CURRENCY);
        account.available = dec!(100);
        account.current = dec!(100);
        account
    }

    #[test]
    fn standard_processor_posts_its_commands_in_order() {
        let account = funded();
        let mut ledger = ledger_for(&account);
        let registry = ProcessorRegistry::standard();
        let rules = RuleBook::standard();
        let mut ctx = StepContext {
            account: &account,
            amount: dec!(30),
            ledger: &mut ledger,
            now: Utc::now(),
        };

        let result = registry
            .get("InitiatePayment")
            .unwrap()
            .process(&rules, &mut ctx)
            .unwrap();
        assert_eq!(result, Some(dec!(30)));

        let entries = ledger.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(
            (entries[0].entry_type, entries[0].bucket),
            (EntryType::Dr, Bucket::Available)
        );
        assert_eq!(entries[0].balance_after, dec!(70));
        assert_eq!(
            (entries[1].entry_type, entries[1].bucket),
            (EntryType::Cr, Bucket::Reserved)
        );
    }

    #[test]
    fn missing_processor_profile_yields_none() {
        let account = funded();
        let mut ledger = ledger_for(&account);
        let registry = ProcessorRegistry::standard();
        let rules = RuleBook::default();
        let mut ctx = StepContext {
            account: &account,
            amount: dec!(1),
            ledger: &mut ledger,
            now: Utc::now(),
        };
        let result = registry
            .get("InitiateTopup")
            .unwrap()
            .process(&rules, &mut ctx)
            .unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn unknown_command_is_an_error() {
        let account = funded();
        let mut ledger = ledger_for(&account);
        let registry = ProcessorRegistry::standard();
        let rules = RuleBook::new(
            [RuleProfile::new(
                "InitiateTopup",
                ProfileScope::Processor,
                &["debit_account_reserved"],
            )],
            Vec::new(),
        );
        let mut ctx = StepContext {
            account: &account,
            amount: dec!(1),
            ledger: &mut ledger,
            now: Utc::now(),
        };
        let err = registry
            .get("InitiateTopup")
            .unwrap()
            .process(&rules, &mut ctx)
            .unwrap_err();
        assert!(matches!(err, ProcessorError::UnknownCommand { .. }));
    }
}
