//! Instance-related type definitions.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{BuildSettings, SystemSettings};
use crate::console::Console;
use crate::ledger::{Step, StepLedger};
use crate::paths::{dir_name_for, InstanceLayout};
use crate::runner::CommandRunner;

/// One provisioned OLD, as recorded in the state store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDescriptor {
    pub name: String,
    pub dir_name: String,
    pub db_name: String,
    pub apps_path: PathBuf,
    pub instance_path: PathBuf,
    pub host: String,
    pub mysql_user: String,
    pub paster_path: String,
    pub vh_path: PathBuf,
    pub port: u16,
    #[serde(default = "default_secure")]
    pub secure: bool,
    #[serde(default)]
    pub build_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub steps: StepLedger,
}

fn default_secure() -> bool {
    true
}

impl InstanceDescriptor {
    /// Derive a fresh descriptor for a build of `settings.name` on `port`.
    pub fn plan(settings: &BuildSettings, port: u16) -> Self {
        let dir_name = dir_name_for(&settings.name);
        let layout = InstanceLayout::new(&settings.apps_path, &dir_name);
        Self {
            name: settings.name.clone(),
            db_name: dir_name.clone(),
            instance_path: layout.root,
            dir_name,
            apps_path: settings.apps_path.clone(),
            host: settings.host.clone(),
            mysql_user: settings.credentials.user.clone(),
            paster_path: settings.paster_path.clone(),
            vh_path: settings.vh_path.clone(),
            port,
            secure: settings.ssl.is_some(),
            build_date: None,
            steps: StepLedger::new(),
        }
    }

    pub fn layout(&self) -> InstanceLayout {
        InstanceLayout {
            root: self.instance_path.clone(),
        }
    }

    pub fn url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}/{}", scheme, self.host, self.dir_name)
    }
}

/// The collaborators every build, rollback and teardown works through.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    pub runner: &'a dyn CommandRunner,
    pub console: Console,
    pub system: &'a SystemSettings,
}

/// Where a provisioning run currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running(Step),
    Aborting(Step),
    Provisioned,
    Aborted,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Provisioned | Self::Aborted)
    }
}

/// One entry of the summary file consumed by Dative as `servers.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub server_code: Option<String>,
    #[serde(rename = "corpusServerURL")]
    pub corpus_server_url: Option<String>,
    pub website: String,
}
