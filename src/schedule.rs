//! Keeping an instance running: a per-minute cron entry and a boot-time
//! init script.

use std::fs;
use std::path::Path;

use crate::config::SystemSettings;
use crate::error::{AppError, Result};
use crate::instance::{serve_shell_line, SuccessPredicate};
use crate::ledger::InitScript;
use crate::paths::{init_script_name, InstanceLayout};
use crate::runner::{CommandRunner, CommandSpec};

const NO_CRONTAB: &str = "no crontab for";

/// The crontab line that restarts the instance if it has stopped.
pub fn cron_line(paster_path: &str, instance_path: &Path) -> String {
    format!(
        "*/1 * * * * cd {}; {} start >/dev/null 2>&1",
        instance_path.display(),
        serve_shell_line(paster_path, instance_path)
    )
}

fn read_crontab(runner: &dyn CommandRunner, system: &SystemSettings) -> Result<String> {
    let out = runner.run(&CommandSpec::new(system.crontab.as_str()).arg("-l"))?;
    if out.success() {
        Ok(out.output)
    } else if out.output.contains(NO_CRONTAB) {
        Ok(String::new())
    } else {
        Err(AppError::other(format!(
            "crontab -l failed: {}",
            out.trimmed()
        )))
    }
}

fn write_crontab(runner: &dyn CommandRunner, system: &SystemSettings, content: &str) -> Result<()> {
    let staged = system.tmp_dir.join("buildold_crontab");
    fs::write(&staged, content)?;
    let result = runner.run(&CommandSpec::new(system.crontab.as_str()).path_arg(&staged));
    if let Err(e) = fs::remove_file(&staged) {
        log::debug!("Failed to remove {}: {}", staged.display(), e);
    }
    let out = result?;
    if !SuccessPredicate::ExitOk.accepts(&out) {
        return Err(AppError::other(format!(
            "crontab rejected the new table: {}",
            out.trimmed()
        )));
    }
    Ok(())
}

/// Append `line` to the operator's crontab unless it is already there.
pub fn install_cron_entry(runner: &dyn CommandRunner, system: &SystemSettings, line: &str) -> Result<()> {
    let current = read_crontab(runner, system)?;
    if current.lines().any(|existing| existing.trim() == line) {
        return Ok(());
    }
    let mut updated = current;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(line);
    updated.push('\n');
    write_crontab(runner, system, &updated)
}

/// Remove every occurrence of `line` from the operator's crontab.
pub fn remove_cron_entry(runner: &dyn CommandRunner, system: &SystemSettings, line: &str) -> Result<()> {
    let current = read_crontab(runner, system)?;
    if !current.lines().any(|existing| existing.trim() == line) {
        return Ok(());
    }
    let mut updated = String::new();
    for existing in current.lines().filter(|existing| existing.trim() != line) {
        updated.push_str(existing);
        updated.push('\n');
    }
    write_crontab(runner, system, &updated)
}

/// A Debian init script that serves the instance at boot.
pub fn render_init_script(name: &str, paster_path: &str, instance_path: &Path, apache_init: &Path) -> String {
    let serve = serve_shell_line(paster_path, instance_path);
    format!(
        r#"#!/bin/sh -e
### BEGIN INIT INFO
# Provides:          {name}
# Required-Start:    mysql networking
# Required-Stop:     mysql networking
# Default-Start:     2 3 4 5
# Default-Stop:      0 1 6
# Short-Description: Start an OLD web application daemon at boot time
# Description:       Start an OLD web application daemon at boot time
### END INIT INFO

cd {dir}

case "$1" in
start)
    {serve} start
    ;;
stop)
    {serve} stop
    ;;
restart)
    {serve} restart
    ;;
force-reload)
    {serve} restart
    {apache} restart
    ;;
*)
    echo "Usage: $0 {{start|stop|restart|force-reload}}"
    exit 1
esac

exit 0
"#,
        name = name,
        dir = instance_path.display(),
        serve = serve,
        apache = apache_init.display(),
    )
}

/// Install and register `<dir>_init`.
///
/// Returns the script only once it is in place; an error part-way leaves
/// whatever was copied for the caller to report.
pub fn install_init_script(
    runner: &dyn CommandRunner,
    system: &SystemSettings,
    dir_name: &str,
    paster_path: &str,
    layout: &InstanceLayout,
) -> Result<InitScript> {
    let name = init_script_name(dir_name);
    let target = system.init_dir.join(&name);
    let staged = system.tmp_dir.join(&name);
    fs::write(
        &staged,
        render_init_script(&name, paster_path, &layout.root, &system.apache_init),
    )?;

    let steps = [
        (
            CommandSpec::privileged(system.use_sudo, "cp")
                .path_arg(&staged)
                .path_arg(&target),
            SuccessPredicate::Empty,
        ),
        (
            CommandSpec::privileged(system.use_sudo, "chmod")
                .arg("+x")
                .path_arg(&target),
            SuccessPredicate::Empty,
        ),
        (
            CommandSpec::privileged(system.use_sudo, system.update_rc_d.as_str())
                .args(["-f", name.as_str(), "defaults"]),
            SuccessPredicate::exit_ok_or_contains(format!(
                "Adding system startup for {}",
                target.display()
            )),
        ),
    ];

    let result = run_all(runner, &steps);
    if let Err(e) = fs::remove_file(&staged) {
        log::debug!("Failed to remove {}: {}", staged.display(), e);
    }
    result?;

    Ok(InitScript { name, path: target })
}

/// Delete and unregister an init script installed by [`install_init_script`].
pub fn remove_init_script(runner: &dyn CommandRunner, system: &SystemSettings, script: &InitScript) -> Result<()> {
    if !script.path.is_file() {
        log::info!("No init script at {}; nothing to remove", script.path.display());
        return Ok(());
    }
    let steps = [
        (
            CommandSpec::privileged(system.use_sudo, "rm").path_arg(&script.path),
            SuccessPredicate::Empty,
        ),
        (
            CommandSpec::privileged(system.use_sudo, system.update_rc_d.as_str())
                .args(["-f", script.name.as_str(), "remove"]),
            SuccessPredicate::exit_ok_or_contains(format!(
                "Removing any system startup links for {}",
                script.path.display()
            )),
        ),
    ];
    run_all(runner, &steps)
}

fn run_all(runner: &dyn CommandRunner, steps: &[(CommandSpec, SuccessPredicate)]) -> Result<()> {
    for (spec, predicate) in steps {
        let out = runner.run(spec)?;
        if !predicate.accepts(&out) {
            return Err(AppError::other(format!(
                "`{}` failed: {}",
                spec,
                out.trimmed()
            )));
        }
    }
    Ok(())
}
