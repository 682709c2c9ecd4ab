//! Undoing completed provisioning steps.

use std::fs;
use std::path::Path;

use super::lifecycle::{restart_apache, stop_app};
use super::predicates::SuccessPredicate;
use super::types::Context;
use crate::config::DbCredentials;
use crate::database::MySql;
use crate::ledger::{Compensation, InitScript, Step, StepLedger};
use crate::proxy::{staging_path, strip_entry};
use crate::runner::CommandSpec;
use crate::schedule::{remove_cron_entry, remove_init_script};
use crate::store::StateStore;

/// Why the ledger is being unwound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackMode {
    /// A build failed part-way; put shared files back as they were.
    Abort,
    /// The operator is destroying a finished instance; other instances
    /// sharing the proxy file must keep working.
    Teardown,
}

/// What a rollback attempted, and which compensations need a human to check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    pub undone: Vec<Step>,
    pub unclean: Vec<Step>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.unclean.is_empty()
    }
}

/// Run the compensation of every recorded step, most recent first.
///
/// Never stops early: a compensation that fails is reported and the next
/// one still runs. The ledger is empty afterwards.
pub fn rollback(
    ctx: &Context<'_>,
    ledger: &mut StepLedger,
    credentials: &DbCredentials,
    mode: RollbackMode,
    store: &mut StateStore,
) -> RollbackReport {
    let mut report = RollbackReport::default();
    for entry in ledger.in_reverse() {
        log::info!("Compensating {} ({:?})", entry.step, mode);
        let clean = compensate(ctx, &entry.undo, credentials, mode, store);
        report.undone.push(entry.step);
        if !clean {
            report.unclean.push(entry.step);
        }
    }

    if !report.is_clean() {
        let steps: Vec<&str> = report.unclean.iter().map(Step::label).collect();
        ctx.console.warn(&format!(
            "Some clean-up actions did not complete ({}). Please verify the server state and clean up manually.",
            steps.join(", ")
        ));
    }
    report
}

fn compensate(
    ctx: &Context<'_>,
    undo: &Compensation,
    credentials: &DbCredentials,
    mode: RollbackMode,
    store: &mut StateStore,
) -> bool {
    match undo {
        Compensation::Nothing => true,
        Compensation::RemoveDirectory { path } => remove_directory(ctx, path),
        Compensation::DropDatabase { name } => drop_database(ctx, credentials, name),
        Compensation::StopApp {
            instance_path,
            paster_path,
        } => stop_app(ctx.runner, &ctx.console, paster_path, instance_path),
        Compensation::RestoreProxyFile {
            vh_path,
            backup,
            dir_name,
        } => match mode {
            RollbackMode::Abort => restore_proxy_file(ctx, vh_path, backup.as_deref(), dir_name),
            RollbackMode::Teardown => strip_proxy_entry(ctx, vh_path, dir_name),
        },
        Compensation::RemoveRestartPolicy {
            cron_line,
            init_script,
        } => remove_restart_policy(ctx, cron_line.as_deref(), init_script.as_ref()),
        Compensation::ForgetInstance { name } => forget_instance(ctx, store, name),
    }
}

fn remove_directory(ctx: &Context<'_>, path: &Path) -> bool {
    ctx.console.say(&format!("Destroying directory {}.", path.display()));
    if !path.is_dir() {
        return true;
    }
    match fs::remove_dir_all(path) {
        Ok(()) => true,
        Err(e) => {
            log::warn!("Failed to remove {}: {}", path.display(), e);
            ctx.console.warn(&format!(
                "Something may have gone wrong when attempting to destroy the directory {}. Check to ensure that it has been destroyed.",
                path.display()
            ));
            false
        }
    }
}

fn drop_database(ctx: &Context<'_>, credentials: &DbCredentials, name: &str) -> bool {
    ctx.console.say(&format!("Dropping MySQL database {}.", name));
    let dropped = MySql::new(ctx.runner, credentials)
        .drop_database(name)
        .unwrap_or_else(|e| {
            log::warn!("Failed to run mysql: {}", e);
            false
        });
    if !dropped {
        ctx.console.warn(&format!(
            "Something may have gone wrong when attempting to drop the MySQL database {}. Please check to ensure that it has been dropped.",
            name
        ));
    }
    dropped
}

fn manual_proxy_cleanup(ctx: &Context<'_>, vh_path: &Path, dir_name: &str) {
    ctx.console.warn(&format!(
        "Unable to restore the virtual hosts file. You should manually remove any lines that contain ProxyPass /{dir}/ or ProxyPassReverse /{dir}/ from the file {vh} and then run `sudo {apache} restart`.",
        dir = dir_name,
        vh = vh_path.display(),
        apache = ctx.system.apache_init.display(),
    ));
}

fn move_into_place(ctx: &Context<'_>, from: &Path, to: &Path) -> bool {
    let spec = CommandSpec::privileged(ctx.system.use_sudo, "mv")
        .path_arg(from)
        .path_arg(to);
    match ctx.runner.run(&spec) {
        Ok(out) => SuccessPredicate::Empty.accepts(&out) && out.success(),
        Err(e) => {
            log::warn!("Failed to run `{}`: {}", spec, e);
            false
        }
    }
}

/// Put the pre-build virtual-hosts file back. Without a backup the file is
/// left untouched.
fn restore_proxy_file(ctx: &Context<'_>, vh_path: &Path, backup: Option<&Path>, dir_name: &str) -> bool {
    ctx.console.say("Restoring Apache virtual hosts file.");
    let Some(backup) = backup.filter(|bk| bk.is_file()) else {
        manual_proxy_cleanup(ctx, vh_path, dir_name);
        return false;
    };
    if !move_into_place(ctx, backup, vh_path) {
        manual_proxy_cleanup(ctx, vh_path, dir_name);
        return false;
    }
    restart_apache(ctx.runner, ctx.system, &ctx.console)
}

/// Remove this instance's routes, keeping everyone else's.
fn strip_proxy_entry(ctx: &Context<'_>, vh_path: &Path, dir_name: &str) -> bool {
    ctx.console.say(&format!(
        "Removing the proxy entries for /{}/ from {}.",
        dir_name,
        vh_path.display()
    ));
    let content = match fs::read_to_string(vh_path) {
        Ok(content) => content,
        Err(e) => {
            log::warn!("Failed to read {}: {}", vh_path.display(), e);
            manual_proxy_cleanup(ctx, vh_path, dir_name);
            return false;
        }
    };

    let staged = staging_path(&ctx.system.tmp_dir);
    if let Err(e) = fs::write(&staged, strip_entry(&content, dir_name)) {
        log::warn!("Failed to write {}: {}", staged.display(), e);
        manual_proxy_cleanup(ctx, vh_path, dir_name);
        return false;
    }
    if !move_into_place(ctx, &staged, vh_path) {
        manual_proxy_cleanup(ctx, vh_path, dir_name);
        return false;
    }
    restart_apache(ctx.runner, ctx.system, &ctx.console)
}

fn remove_restart_policy(ctx: &Context<'_>, cron_line: Option<&str>, init_script: Option<&InitScript>) -> bool {
    let mut clean = true;
    if let Some(script) = init_script {
        ctx.console.say("Removing init script.");
        if let Err(e) = remove_init_script(ctx.runner, ctx.system, script) {
            log::warn!("{}", e);
            ctx.console.warn(&format!(
                "Something may have gone wrong when attempting to remove the init script {}.",
                script.path.display()
            ));
            clean = false;
        }
    }
    if let Some(line) = cron_line {
        ctx.console.say("Destroying cronjob.");
        if let Err(e) = remove_cron_entry(ctx.runner, ctx.system, line) {
            log::warn!("{}", e);
            ctx.console.warn(&format!(
                "Something went wrong when attempting to destroy the cronjob. Remove this line from your crontab yourself: \"{}\".",
                line
            ));
            clean = false;
        }
    }
    clean
}

fn forget_instance(ctx: &Context<'_>, store: &mut StateStore, name: &str) -> bool {
    if store.find(name).is_none() {
        return true;
    }
    match store.remove(name) {
        Ok(_) => true,
        Err(e) => {
            log::warn!("{}", e);
            ctx.console.warn(&format!(
                "Unable to remove {} from the state file {}.",
                name,
                store.path().display()
            ));
            false
        }
    }
}
