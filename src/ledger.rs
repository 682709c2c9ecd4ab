//! Ordered record of completed provisioning steps and their compensations.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Provisioning steps, in the only order they are ever executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    CreateStorage,
    CreateDatabase,
    WriteConfig,
    RunAppSetup,
    StartApp,
    InstallProxyEntry,
    RegisterRestartPolicy,
    PersistState,
}

impl Step {
    pub const FORWARD: [Self; 8] = [
        Self::CreateStorage,
        Self::CreateDatabase,
        Self::WriteConfig,
        Self::RunAppSetup,
        Self::StartApp,
        Self::InstallProxyEntry,
        Self::RegisterRestartPolicy,
        Self::PersistState,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::CreateStorage => "create_storage",
            Self::CreateDatabase => "create_database",
            Self::WriteConfig => "write_config",
            Self::RunAppSetup => "run_app_setup",
            Self::StartApp => "start_app",
            Self::InstallProxyEntry => "install_proxy_entry",
            Self::RegisterRestartPolicy => "register_restart_policy",
            Self::PersistState => "persist_state",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// An init script registered with the service manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitScript {
    pub name: String,
    pub path: PathBuf,
}

/// The action that approximately undoes a completed step.
///
/// Each variant carries everything needed to run it later, including from a
/// different process during teardown. Database credentials are supplied at
/// rollback time and never stored here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Compensation {
    /// Nothing of its own to undo; an earlier compensation covers it.
    Nothing,
    RemoveDirectory {
        path: PathBuf,
    },
    DropDatabase {
        name: String,
    },
    StopApp {
        instance_path: PathBuf,
        paster_path: String,
    },
    RestoreProxyFile {
        vh_path: PathBuf,
        backup: Option<PathBuf>,
        dir_name: String,
    },
    RemoveRestartPolicy {
        cron_line: Option<String>,
        init_script: Option<InitScript>,
    },
    ForgetInstance {
        name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub step: Step,
    pub undo: Compensation,
}

/// Append-only sequence of completed steps for one provisioning run.
///
/// Entries are only ever added at the end during a forward run and only ever
/// removed from the end by [`StepLedger::in_reverse`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepLedger {
    entries: Vec<LedgerEntry>,
}

impl StepLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, step: Step, undo: Compensation) {
        log::debug!("ledger: recorded {}", step);
        self.entries.push(LedgerEntry { step, undo });
    }

    pub fn contains(&self, step: Step) -> bool {
        self.entries.iter().any(|entry| entry.step == step)
    }

    pub fn steps(&self) -> Vec<Step> {
        self.entries.iter().map(|entry| entry.step).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drain the ledger most-recent first.
    ///
    /// The returned iterator removes entries as it goes, so a consumed
    /// sequence cannot be replayed. Dropping it early still empties the ledger.
    pub fn in_reverse(&mut self) -> impl Iterator<Item = LedgerEntry> + '_ {
        self.entries.drain(..).rev()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_with(steps: &[Step]) -> StepLedger {
        let mut ledger = StepLedger::new();
        for step in steps {
            ledger.record(*step, Compensation::Nothing);
        }
        ledger
    }

    #[test]
    fn reverse_order_is_most_recent_first() {
        let mut ledger = ledger_with(&[Step::CreateStorage, Step::CreateDatabase, Step::StartApp]);
        assert!(ledger.contains(Step::CreateDatabase));
        assert!(!ledger.contains(Step::PersistState));

        let order: Vec<Step> = ledger.in_reverse().map(|entry| entry.step).collect();
        assert_eq!(
            order,
            vec![Step::StartApp, Step::CreateDatabase, Step::CreateStorage]
        );
        assert!(ledger.is_empty());
        assert_eq!(ledger.in_reverse().count(), 0);
    }

    #[test]
    fn forward_order_matches_labels() {
        let labels: Vec<&str> = Step::FORWARD.iter().map(Step::label).collect();
        assert_eq!(
            labels,
            vec![
                "create_storage",
                "create_database",
                "write_config",
                "run_app_setup",
                "start_app",
                "install_proxy_entry",
                "register_restart_policy",
                "persist_state",
            ]
        );
    }

    #[test]
    fn ledger_serializes_as_tagged_entries() {
        let mut ledger = StepLedger::new();
        ledger.record(
            Step::CreateDatabase,
            Compensation::DropDatabase {
                name: "blaold".to_string(),
            },
        );
        let json = serde_json::to_value(&ledger).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"step": "create_database", "undo": {"action": "drop_database", "name": "blaold"}}
            ])
        );
        let back: StepLedger = serde_json::from_value(json).unwrap();
        assert_eq!(back, ledger);
    }
}
