//! Rule profiles: stored configuration that drives the executor pipeline.
//!
//! Profiles live at two levels:
//!
//! - [`ProfileScope::Executor`] profiles are keyed by an executor name
//!   (`InitiatePayment`, ...) and list processor names to run in order.
//! - [`ProfileScope::Processor`] profiles are keyed by a processor name and
//!   list the command names the processor resolves to ledger postings.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which level of the pipeline a profile configures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileScope {
    /// Resolved by an executor; commands name processors.
    Executor,
    /// Resolved by a processor; commands name ledger commands.
    Processor,
}

/// One named step of a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleProfileCommand {
    /// Processor or command name.
    pub name: String,
    /// Position; lower runs first.
    pub order: u32,
    /// Inactive commands are skipped.
    pub active: bool,
}

impl RuleProfileCommand {
    /// An active command at `order`.
    #[must_use]
    pub fn new(name: impl Into<String>, order: u32) -> Self {
        Self {
            name: name.into(),
            order,
            active: true,
        }
    }
}

/// An admin-managed, ordered list of named steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleProfile {
    /// Executor or processor name the profile binds to.
    pub name: String,
    /// Pipeline level.
    pub scope: ProfileScope,
    /// Inactive profiles are treated as missing.
    pub active: bool,
    /// Delay to honour after the run, in milliseconds.
    pub step_delay_ms: u64,
    /// Steps, in any order; see [`RuleProfile::active_commands`].
    pub commands: Vec<RuleProfileCommand>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl RuleProfile {
    /// Build an active profile whose commands run in the given order.
    #[must_use]
    pub fn new(name: impl Into<String>, scope: ProfileScope, commands: &[&str]) -> Self {
        Self {
            name: name.into(),
            scope,
            active: true,
            step_delay_ms: 0,
            commands: commands
                .iter()
                .zip(1..)
                .map(|(name, order)| RuleProfileCommand::new(*name, order))
                .collect(),
            updated_at: Utc::now(),
        }
    }

    /// Active commands sorted by `order`.
    #[must_use]
    pub fn active_commands(&self) -> Vec<&RuleProfileCommand> {
        let mut commands: Vec<_> = self.commands.iter().filter(|c| c.active).collect();
        commands.sort_by_key(|c| c.order);
        commands
    }

    /// The configured delay.
    #[must_use]
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }
}

/// Snapshot of all rule configuration, read once per workflow step.
#[derive(Debug, Clone, Default)]
pub struct RuleBook {
    profiles: HashMap<(ProfileScope, String), RuleProfile>,
    entry_types: HashSet<String>,
}

impl RuleBook {
    /// Build a rule book from stored profiles and balance entry type names.
    #[must_use]
    pub fn new(
        profiles: impl IntoIterator<Item = RuleProfile>,
        entry_types: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            profiles: profiles
                .into_iter()
                .map(|p| ((p.scope, p.name.clone()), p))
                .collect(),
            entry_types: entry_types.into_iter().collect(),
        }
    }

    /// The active profile for `name` at `scope`, if configured.
    #[must_use]
    pub fn profile(&self, scope: ProfileScope, name: &str) -> Option<&RuleProfile> {
        self.profiles
            .get(&(scope, name.to_string()))
            .filter(|p| p.active)
    }

    /// Whether a balance entry type with this name is configured.
    #[must_use]
    pub fn has_entry_type(&self, name: &str) -> bool {
        self.entry_types.contains(name)
    }

    /// All profiles.
    pub fn profiles(&self) -> impl Iterator<Item = &RuleProfile> {
        self.profiles.values()
    }

    /// All balance entry type names.
    pub fn entry_types(&self) -> impl Iterator<Item = &String> {
        self.entry_types.iter()
    }

    /// Whether nothing is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty() && self.entry_types.is_empty()
    }

    /// The standard configuration: one executor profile per workflow step
    /// running the processor of the same name, and one processor profile per
    /// processor listing its two ledger commands.
    #[must_use]
    pub fn standard() -> Self {
        let pipelines: [(&str, [&str; 2]); 6] = [
            (
                "InitiateTopup",
                ["credit_account_current", "credit_account_uncleared"],
            ),
            (
                "ApproveTopupTransaction",
                ["debit_account_uncleared", "credit_account_available"],
            ),
            (
                "RejectTopupTransaction",
                ["debit_account_current", "debit_account_uncleared"],
            ),
            (
                "InitiatePayment",
                ["debit_account_available", "credit_account_reserved"],
            ),
            (
                "ApprovePaymentTransaction",
                ["debit_account_reserved", "debit_account_current"],
            ),
            (
                "RejectPaymentTransaction",
                ["debit_account_reserved", "credit_account_available"],
            ),
        ];

        let mut profiles = Vec::with_capacity(pipelines.len() * 2);
        let mut entry_types = Vec::with_capacity(pipelines.len());
        for (name, commands) in pipelines {
            profiles.push(RuleProfile::new(name, ProfileScope::Executor, &[name]));
            profiles.push(RuleProfile::new(name, ProfileScope::Processor, &commands));
            entry_types.push(name.to_string());
        }
        Self::new(profiles, entry_types)
    }
}
