//! Building an instance: precondition checks, then the step state machine.

use std::fs;
use std::path::Path;

use chrono::Utc;

use super::cleanup::{rollback, RollbackMode, RollbackReport};
use super::lifecycle::{
    enable_site, make_config_command, make_config_succeeded, restart_apache, serve_command,
    setup_app_command, setup_app_succeeded, stop_app,
};
use super::predicates::SuccessPredicate;
use super::types::{Context, InstanceDescriptor, RunState};
use crate::appconfig::rewrite_ini;
use crate::config::BuildSettings;
use crate::database::MySql;
use crate::error::{AppError, Result};
use crate::ledger::{Compensation, Step, StepLedger};
use crate::paths::{apps_log_dir, dir_name_for, init_script_name, proxy_backup_path};
use crate::proxy::{next_available_port, staging_path, used_ports, ProxyEntries, VirtualHost};
use crate::runner::{find_executable, CommandSpec};
use crate::schedule::{cron_line, install_cron_entry, install_init_script};
use crate::store::StateStore;
use crate::validation::{existing_instance_dirs, validate_instance_name};

/// Check everything that can be checked before touching the server, and
/// plan the instance.
///
/// Nothing is created or modified here, so a failure needs no rollback.
pub fn preflight(ctx: &Context<'_>, settings: &BuildSettings, store: &StateStore) -> Result<InstanceDescriptor> {
    let name = validate_instance_name(&settings.name)?;
    let dir_name = dir_name_for(&name);

    if existing_instance_dirs(&settings.apps_path)?.contains(&dir_name) {
        return Err(AppError::instance_exists(&name, "directory"));
    }
    if store.contains(&name, &dir_name) {
        return Err(AppError::instance_exists(&name, "store"));
    }

    find_executable(&settings.paster_path)?;

    let mysql = MySql::new(ctx.runner, &settings.credentials);
    mysql.check_access()?;
    if mysql.database_exists(&dir_name)? {
        return Err(AppError::instance_exists(&name, "database"));
    }

    let proxied = match fs::read_to_string(&settings.vh_path) {
        Ok(content) => used_ports(&content),
        Err(_) if !settings.vh_path.exists() => Default::default(),
        Err(e) => {
            return Err(AppError::io(format!(
                "Failed to read {}: {}",
                settings.vh_path.display(),
                e
            )))
        }
    };
    let port = next_available_port(&proxied, settings.ports)?;
    if !portpicker::is_free_tcp(port) {
        ctx.console.warn(&format!(
            "Port {} is not referenced by {} but something on this host is already listening on it.",
            port,
            settings.vh_path.display()
        ));
    }

    let mut planned = settings.clone();
    planned.name = name;
    Ok(InstanceDescriptor::plan(&planned, port))
}

/// Preflight, then provision. On success the instance is in the store.
pub fn build_instance(
    ctx: &Context<'_>,
    settings: &BuildSettings,
    store: &mut StateStore,
) -> Result<InstanceDescriptor> {
    ctx.console.header("OLD Builder.");
    let descriptor = preflight(ctx, settings, store)?;
    ctx.console.say(&format!(
        "Building an OLD called {}.",
        ctx.console.palette().ok(&descriptor.name)
    ));
    let mut run = Provisioning::new(*ctx, settings, descriptor);
    run.run(store)
}

/// One forward run over [`Step::FORWARD`].
///
/// Every completed step is recorded in the ledger with its compensation.
/// The first failing step moves the run to `Aborting`, the ledger is
/// unwound and the run ends `Aborted`.
pub struct Provisioning<'a> {
    ctx: Context<'a>,
    settings: &'a BuildSettings,
    descriptor: InstanceDescriptor,
    ledger: StepLedger,
    state: RunState,
    rollback: Option<RollbackReport>,
}

impl<'a> Provisioning<'a> {
    pub fn new(ctx: Context<'a>, settings: &'a BuildSettings, descriptor: InstanceDescriptor) -> Self {
        Self {
            ctx,
            settings,
            descriptor,
            ledger: StepLedger::new(),
            state: RunState::Pending,
            rollback: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn ledger(&self) -> &StepLedger {
        &self.ledger
    }

    /// Report of the rollback, if the run was aborted.
    pub fn rollback_report(&self) -> Option<&RollbackReport> {
        self.rollback.as_ref()
    }

    pub fn run(&mut self, store: &mut StateStore) -> Result<InstanceDescriptor> {
        if self.state != RunState::Pending {
            return Err(AppError::other("A provisioning run can only be started once"));
        }

        for step in Step::FORWARD {
            self.state = RunState::Running(step);
            log::info!("{}: {}", self.descriptor.name, step);
            match self.execute(step, store) {
                Ok(undo) => self.ledger.record(step, undo),
                Err(err) => {
                    self.state = RunState::Aborting(step);
                    log::warn!("{} failed for {}: {}", step, self.descriptor.name, err);
                    self.ctx.console.fail(&format!("{} Aborting.", err.hint()));
                    let report = rollback(
                        &self.ctx,
                        &mut self.ledger,
                        &self.settings.credentials,
                        RollbackMode::Abort,
                        store,
                    );
                    self.rollback = Some(report);
                    self.state = RunState::Aborted;
                    return Err(err);
                }
            }
        }

        self.state = RunState::Provisioned;
        Ok(self.descriptor.clone())
    }

    fn execute(&mut self, step: Step, store: &mut StateStore) -> Result<Compensation> {
        match step {
            Step::CreateStorage => self.create_storage(),
            Step::CreateDatabase => self.create_database(),
            Step::WriteConfig => self.write_config(),
            Step::RunAppSetup => self.run_app_setup(),
            Step::StartApp => self.start_app(),
            Step::InstallProxyEntry => self.install_proxy_entry(),
            Step::RegisterRestartPolicy => Ok(self.register_restart_policy()),
            Step::PersistState => self.persist_state(store),
        }
    }

    fn create_storage(&self) -> Result<Compensation> {
        self.ctx.console.say("Creating directories.");
        let layout = self.descriptor.layout();
        let apps_path = &self.descriptor.apps_path;
        let dirs = [
            apps_path.clone(),
            apps_log_dir(apps_path),
            layout.root.clone(),
            layout.log_dir(),
        ];
        for dir in &dirs {
            if let Err(e) = create_directory_safely(dir) {
                // The instance directory did not exist before preflight.
                if layout.root.is_dir() {
                    let _ = fs::remove_dir_all(&layout.root);
                }
                return Err(e);
            }
        }
        Ok(Compensation::RemoveDirectory { path: layout.root })
    }

    fn create_database(&self) -> Result<Compensation> {
        let db_name = &self.descriptor.db_name;
        self.ctx
            .console
            .say(&format!("Creating MySQL database {}.", db_name));
        let out = MySql::new(self.ctx.runner, &self.settings.credentials).create_database(db_name)?;

        if SuccessPredicate::Empty.accepts(&out) {
            return Ok(Compensation::DropDatabase {
                name: db_name.clone(),
            });
        }
        if out.output.contains("database exists") {
            // Someone else's database: never drop it.
            return Err(AppError::instance_exists(&self.descriptor.name, "database"));
        }
        Err(AppError::step_failed(Step::CreateDatabase, out.trimmed()))
    }

    fn write_config(&self) -> Result<Compensation> {
        self.ctx.console.say("Creating the OLD config file.");
        let layout = self.descriptor.layout();
        let out = self
            .ctx
            .runner
            .run(&make_config_command(&self.descriptor.paster_path, &layout))?;
        if !make_config_succeeded(&layout).accepts(&out) {
            return Err(AppError::step_failed(
                Step::WriteConfig,
                format!("Unable to create the OLD config file: {}", out.trimmed()),
            ));
        }

        self.ctx
            .console
            .say("Editing the OLD's config file (production.ini).");
        let config_file = layout.config_file();
        let generated = fs::read_to_string(&config_file)
            .map_err(|e| AppError::step_failed(Step::WriteConfig, e.to_string()))?;
        let rewritten = rewrite_ini(
            &generated,
            self.descriptor.port,
            &self.settings.credentials,
            &self.descriptor.db_name,
        );
        fs::write(&config_file, rewritten)
            .map_err(|e| AppError::step_failed(Step::WriteConfig, e.to_string()))?;

        Ok(Compensation::Nothing)
    }

    fn run_app_setup(&self) -> Result<Compensation> {
        self.ctx
            .console
            .say("Running OLD setup: building tables and entering defaults.");
        let layout = self.descriptor.layout();
        let out = self
            .ctx
            .runner
            .run(&setup_app_command(&self.descriptor.paster_path, &layout))?;
        if !setup_app_succeeded().accepts(&out) {
            return Err(AppError::step_failed(Step::RunAppSetup, out.trimmed()));
        }

        self.ctx
            .console
            .say("Setting the tag table's \"name\" column to UTF-8 binary collation.");
        let out = MySql::new(self.ctx.runner, &self.settings.credentials)
            .fix_tag_collation(&self.descriptor.db_name)?;
        if !SuccessPredicate::Empty.accepts(&out) {
            return Err(AppError::step_failed(Step::RunAppSetup, out.trimmed()));
        }

        Ok(Compensation::Nothing)
    }

    fn start_app(&self) -> Result<Compensation> {
        self.ctx.console.say("Starting the paster server.");
        let paster = &self.descriptor.paster_path;
        let instance_path = &self.descriptor.instance_path;
        let out = self.ctx.runner.run(&serve_command(paster, instance_path))?;
        if !SuccessPredicate::Empty.accepts(&out) {
            self.ctx.console.say(out.trimmed());
            // A daemon may have started despite the noise.
            stop_app(self.ctx.runner, &self.ctx.console, paster, instance_path);
            return Err(AppError::step_failed(
                Step::StartApp,
                "Something went wrong when attempting to serve the OLD",
            ));
        }
        Ok(Compensation::StopApp {
            instance_path: instance_path.clone(),
            paster_path: paster.clone(),
        })
    }

    fn install_proxy_entry(&self) -> Result<Compensation> {
        self.ctx.console.say("Modifying Apache virtual hosts file.");
        let vh_path = &self.descriptor.vh_path;
        let system = self.ctx.system;

        let existing = if vh_path.is_file() {
            fs::read_to_string(vh_path)
                .map_err(|e| AppError::step_failed(Step::InstallProxyEntry, e.to_string()))?
        } else {
            String::new()
        };
        let mut entries = ProxyEntries::parse(&existing);
        entries.insert(&self.descriptor.dir_name, self.descriptor.port);
        let content = VirtualHost {
            host: &self.descriptor.host,
            apps_path: &self.descriptor.apps_path,
            tls: self.settings.ssl.as_ref(),
        }
        .render(&entries);

        let staged = staging_path(&system.tmp_dir);
        fs::write(&staged, &content)
            .map_err(|e| AppError::step_failed(Step::InstallProxyEntry, e.to_string()))?;

        let mut backup = None;
        if vh_path.is_file() {
            let bk = proxy_backup_path(vh_path);
            if !self.privileged_move(vh_path, &bk) {
                return Err(self.proxy_failure(&content));
            }
            self.ctx.console.warn(&format!(
                "The virtual hosts file {} already existed; we moved the pre-modified version of it to {}.",
                vh_path.display(),
                bk.display()
            ));
            backup = Some(bk);
        }

        if !self.privileged_move(&staged, vh_path) {
            if let Some(bk) = &backup {
                if !self.privileged_move(bk, vh_path) {
                    log::warn!("Failed to move {} back to {}", bk.display(), vh_path.display());
                }
            }
            return Err(self.proxy_failure(&content));
        }

        enable_site(self.ctx.runner, system, &self.ctx.console, vh_path);
        restart_apache(self.ctx.runner, system, &self.ctx.console);

        Ok(Compensation::RestoreProxyFile {
            vh_path: vh_path.clone(),
            backup,
            dir_name: self.descriptor.dir_name.clone(),
        })
    }

    fn privileged_move(&self, from: &Path, to: &Path) -> bool {
        let spec = CommandSpec::privileged(self.ctx.system.use_sudo, "mv")
            .path_arg(from)
            .path_arg(to);
        self.ctx
            .runner
            .run(&spec)
            .map(|out| out.success() && SuccessPredicate::Empty.accepts(&out))
            .unwrap_or(false)
    }

    fn proxy_failure(&self, content: &str) -> AppError {
        self.ctx.console.fail(&format!(
            "Unable to configure the virtual host. Maybe you can do it manually. The file at {} should look like this:\n",
            self.descriptor.vh_path.display()
        ));
        self.ctx.console.say(content);
        AppError::step_failed(
            Step::InstallProxyEntry,
            "Unable to install the virtual hosts file",
        )
    }

    /// Cron entry and init script. Both are best-effort: a failure prints
    /// the manual remedy and only what was installed is compensated.
    fn register_restart_policy(&self) -> Compensation {
        let runner = self.ctx.runner;
        let system = self.ctx.system;
        let console = &self.ctx.console;
        let paster = &self.descriptor.paster_path;

        console.say("Enabling cronjob to restart your OLD in case it goes down.");
        let line = cron_line(paster, &self.descriptor.instance_path);
        let cron_line = match install_cron_entry(runner, system, &line) {
            Ok(()) => Some(line),
            Err(e) => {
                log::warn!("{}", e);
                console.warn(&format!(
                    "Unable to enable the OLD restart cronjob. We suggest you put the following line in your crontab: \"{}\".",
                    line
                ));
                None
            }
        };

        console.say("Creating an init script.");
        let init_script = match install_init_script(
            runner,
            system,
            &self.descriptor.dir_name,
            paster,
            &self.descriptor.layout(),
        ) {
            Ok(script) => Some(script),
            Err(e) => {
                log::warn!("{}", e);
                console.warn(&format!(
                    "Something went wrong when attempting to install the init script. You can try doing it yourself; also check whether there is a file at {} and whether it contains errors.",
                    system.init_dir.join(init_script_name(&self.descriptor.dir_name)).display()
                ));
                None
            }
        };

        Compensation::RemoveRestartPolicy {
            cron_line,
            init_script,
        }
    }

    fn persist_state(&mut self, store: &mut StateStore) -> Result<Compensation> {
        self.descriptor.build_date = Some(Utc::now());
        self.descriptor.steps = self.ledger.clone();
        store
            .insert(self.descriptor.clone())
            .map_err(|e| AppError::step_failed(Step::PersistState, e.to_string()))?;
        Ok(Compensation::ForgetInstance {
            name: self.descriptor.name.clone(),
        })
    }
}

/// Create `path` (and parents) unless it is already a directory. A regular
/// file in the way is an error.
fn create_directory_safely(path: &Path) -> Result<()> {
    if path.is_file() {
        return Err(AppError::dir_path_is_file(&path.to_string_lossy()));
    }
    if !path.is_dir() {
        fs::create_dir_all(path)
            .map_err(|e| AppError::io(format!("Failed to create {}: {}", path.display(), e)))?;
    }
    Ok(())
}
