//! Commands that start, stop and front a running instance.

use std::path::Path;

use super::predicates::SuccessPredicate;
use crate::config::SystemSettings;
use crate::console::Console;
use crate::paths::{enabled_site_path, InstanceLayout};
use crate::runner::{CommandRunner, CommandSpec};

const PACKAGE: &str = "onlinelinguisticdatabase";
const SETUP_BANNER: &str = "Running setup_app() from onlinelinguisticdatabase.websetup";
const APACHE_DONE: &str = "...done.";
const SITE_ENABLED: &str = "Enabling site";

/// `paster serve --daemon ...` for the instance rooted at `instance_path`.
pub fn serve_command(paster_path: &str, instance_path: &Path) -> CommandSpec {
    let layout = InstanceLayout {
        root: instance_path.to_path_buf(),
    };
    CommandSpec::new(paster_path)
        .args(["serve", "--daemon"])
        .arg(format!("--pid-file={}", layout.pid_file().display()))
        .arg(format!("--log-file={}", layout.app_log().display()))
        .path_arg(&layout.config_file())
        .current_dir(instance_path)
}

pub fn stop_command(paster_path: &str, instance_path: &Path) -> CommandSpec {
    serve_command(paster_path, instance_path).arg("stop")
}

/// The serve command as one shell line, for cron and init scripts.
pub fn serve_shell_line(paster_path: &str, instance_path: &Path) -> String {
    let spec = serve_command(paster_path, instance_path);
    let mut line = spec.program.clone();
    for arg in &spec.args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

pub fn make_config_command(paster_path: &str, layout: &InstanceLayout) -> CommandSpec {
    CommandSpec::new(paster_path)
        .args(["make-config", PACKAGE])
        .path_arg(&layout.config_file())
        .current_dir(&layout.root)
}

pub fn make_config_succeeded(layout: &InstanceLayout) -> SuccessPredicate {
    SuccessPredicate::last_line_is(layout.config_file().to_string_lossy())
}

pub fn setup_app_command(paster_path: &str, layout: &InstanceLayout) -> CommandSpec {
    CommandSpec::new(paster_path)
        .arg("setup-app")
        .path_arg(&layout.config_file())
        .current_dir(&layout.root)
}

pub fn setup_app_succeeded() -> SuccessPredicate {
    SuccessPredicate::exactly(SETUP_BANNER)
}

/// Stop the paster daemon. Returns `false` when the stop looked unclean.
pub fn stop_app(
    runner: &dyn CommandRunner,
    console: &Console,
    paster_path: &str,
    instance_path: &Path,
) -> bool {
    console.say("Stopping the paster server.");
    match runner.run(&stop_command(paster_path, instance_path)) {
        Ok(out) if SuccessPredicate::Empty.accepts(&out) => true,
        Ok(out) => {
            console.warn(&format!(
                "The output from stopping the paster server is not empty:\n{}\nSomething may have gone wrong when attempting to stop it.",
                out.trimmed()
            ));
            false
        }
        Err(e) => {
            log::warn!("Failed to stop paster in {}: {}", instance_path.display(), e);
            console.warn("Something may have gone wrong when attempting to stop the paster server.");
            false
        }
    }
}

/// Restart Apache so a changed virtual-hosts file takes effect.
///
/// Failure is only reported: the instance itself is already running.
pub fn restart_apache(runner: &dyn CommandRunner, system: &SystemSettings, console: &Console) -> bool {
    console.say("Restarting the Apache server.");
    let apache = system.apache_init.to_string_lossy().into_owned();
    let spec = CommandSpec::privileged(system.use_sudo, apache.as_str()).arg("restart");
    let restarted = runner
        .run(&spec)
        .map(|out| SuccessPredicate::exit_ok_or_contains(APACHE_DONE).accepts(&out))
        .unwrap_or(false);
    if !restarted {
        console.warn(&format!(
            "Unable to restart Apache. Do it manually by running `sudo {} restart`.",
            apache
        ));
    }
    restarted
}

/// Enable the virtual-hosts file through `a2ensite` unless its
/// `sites-enabled` twin already exists.
pub fn enable_site(
    runner: &dyn CommandRunner,
    system: &SystemSettings,
    console: &Console,
    vh_path: &Path,
) {
    let Some(enabled) = enabled_site_path(vh_path) else {
        log::debug!("{} is not under sites-available; not enabling", vh_path.display());
        return;
    };
    if enabled.is_file() {
        return;
    }
    let Some(site) = vh_path.file_name().map(|name| name.to_string_lossy().into_owned()) else {
        return;
    };

    console.say("Enabling the Apache virtual hosts config file.");
    let spec = CommandSpec::privileged(system.use_sudo, system.a2ensite.as_str()).arg(site);
    let enabled_ok = runner
        .run(&spec)
        .map(|out| SuccessPredicate::contains(SITE_ENABLED).accepts(&out))
        .unwrap_or(false);
    if !enabled_ok {
        console.warn(
            "Unable to enable your Apache virtual hosts config file. Do it manually by running `sudo a2ensite` followed by the name of the file.",
        );
    }
}
