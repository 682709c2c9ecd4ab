mod appconfig;
mod cli;
mod config;
mod console;
mod database;
mod error;
mod fetch;
mod instance;
mod ledger;
mod paths;
mod proxy;
mod runner;
mod schedule;
mod store;
mod validation;

pub mod install;
pub mod reset;

use std::process::ExitCode;

use clap::Parser as _;

pub use cli::{run_buildold, BuildCli};
pub use config::{
    load_file_config, resolve_file_config, BuildSettings, DbCredentials, FileConfig, PortRange,
    SslPaths, SystemSettings,
};
pub use console::{Console, Palette, Prompter, StdinPrompter};
pub use error::{AppError, ErrorKind, Result};
pub use instance::{
    build_instance, destroy_instance, format_listing, preflight, rollback, server_entries,
    write_dative_servers, Context, InstanceDescriptor, Provisioning, RollbackMode,
    RollbackReport, RunState, ServerEntry, SuccessPredicate,
};
pub use ledger::{Compensation, InitScript, LedgerEntry, Step, StepLedger};
pub use proxy::{next_available_port, strip_entry, used_ports, ProxyEntries, VirtualHost};
pub use runner::{find_executable, CommandOutput, CommandRunner, CommandSpec, SystemRunner};
pub use store::StateStore;

/// Install the logger for a binary. `RUST_LOG` overrides the `warn` default.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp(None)
        .init();
}

/// Print an error for the operator and turn it into an exit status.
pub fn report_failure(console: Console, err: &AppError) -> ExitCode {
    log::debug!("exiting with {} ({})", err, err.kind().code());
    if err.kind() == ErrorKind::Declined {
        console.warn(&err.hint());
    } else {
        console.fail(&err.hint());
    }
    ExitCode::FAILURE
}

/// Entry point of `buildold`.
pub fn run() -> ExitCode {
    init_logging();

    let cli = BuildCli::parse();
    let palette = Palette::detect(!cli.no_color);
    let console = Console::new(palette);
    let prompter = StdinPrompter::new(palette);

    match run_buildold(&cli, &SystemRunner, &prompter, console) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report_failure(console, &e),
    }
}
