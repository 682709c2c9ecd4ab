//! Listing, summarising and destroying recorded instances.

use std::fs;
use std::path::Path;

use super::cleanup::{rollback, RollbackMode, RollbackReport};
use super::types::{Context, InstanceDescriptor, ServerEntry};
use crate::config::DbCredentials;
use crate::console::{Palette, Prompter};
use crate::database::MySql;
use crate::error::{AppError, Result};
use crate::store::StateStore;

const OLD_WEBSITE: &str = "http://www.onlinelinguisticdatabase.org";

/// One line per recorded instance, in store order.
pub fn format_listing(instances: &[InstanceDescriptor], palette: Palette) -> String {
    if instances.is_empty() {
        return palette.header("No OLDs have been built here by this script.");
    }
    let mut out = palette.header("OLDs built here by this script:");
    for inst in instances {
        out.push('\n');
        out.push_str(&format!(
            "{} in {} being served at {}.",
            palette.ok(&inst.name),
            inst.instance_path.display(),
            palette.ok(&inst.url())
        ));
    }
    out
}

/// Entries for a Dative `servers.json`, one per instance.
pub fn server_entries(instances: &[InstanceDescriptor]) -> Vec<ServerEntry> {
    instances
        .iter()
        .map(|inst| ServerEntry {
            name: format!("{} OLD", capitalize(&inst.name)),
            kind: "OLD".to_string(),
            url: inst.url(),
            server_code: None,
            corpus_server_url: None,
            website: OLD_WEBSITE.to_string(),
        })
        .collect()
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Write the Dative servers summary to `path`.
///
/// An existing file is only replaced after the operator confirms.
pub fn write_dative_servers(store: &StateStore, path: &Path, prompter: &dyn Prompter) -> Result<usize> {
    if path.is_file() {
        let overwrite = prompter.confirm(&format!(
            "There is already a file at {}. Do you want to overwrite it?",
            path.display()
        ))?;
        if !overwrite {
            return Err(AppError::declined());
        }
    }

    let entries = server_entries(store.instances());
    let json = serde_json::to_string_pretty(&entries)?;
    fs::write(path, json)
        .map_err(|e| AppError::io(format!("Failed to write {}: {}", path.display(), e)))?;
    Ok(entries.len())
}

/// Tear down a recorded instance.
///
/// Nothing is touched until the operator confirms and the MySQL password
/// checks out. The record is removed from the store before the recorded
/// compensations run in reverse, so a half-finished teardown is never
/// offered for destruction again.
pub fn destroy_instance(
    ctx: &Context<'_>,
    store: &mut StateStore,
    name: &str,
    prompter: &dyn Prompter,
    password: Option<String>,
) -> Result<RollbackReport> {
    ctx.console.header("OLD Destroyer.");

    let descriptor = store
        .find(name)
        .cloned()
        .ok_or_else(|| AppError::instance_not_found(name))?;

    let proceed = prompter.confirm(&format!(
        "Are you sure that you want to destroy the OLD named {}? THIS CANNOT BE UNDONE. \
         Enter 'y' or 'Y' to proceed with the destruction. You may want to backup its \
         database and files, prior to destruction.",
        name
    ))?;
    if !proceed {
        return Err(AppError::declined());
    }

    let password = match password.filter(|pwd| !pwd.is_empty()) {
        Some(password) => password,
        None => prompter.require(
            &format!("Please enter the password for the MySQL user {}:", descriptor.mysql_user),
            "You must provide the MySQL user's password.",
        )?,
    };
    let credentials = DbCredentials {
        user: descriptor.mysql_user.clone(),
        password,
    };
    MySql::new(ctx.runner, &credentials).check_access()?;

    store.remove(name)?;

    let mut ledger = descriptor.steps;
    let report = rollback(ctx, &mut ledger, &credentials, RollbackMode::Teardown, store);
    ctx.console.say("Done.");
    Ok(report)
}
