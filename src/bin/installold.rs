//! `installold`: install the OLD and its system dependencies.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use reqwest::Client;

use old_provisioner::install::{Component, Host, InstallReport, Installer};
use old_provisioner::{init_logging, report_failure, AppError, Console, Palette, Result, SystemRunner};

#[derive(Debug, Parser)]
#[command(
    name = "installold",
    version,
    about = "Install the Online Linguistic Database and its dependencies on a Debian/Ubuntu server"
)]
struct Cli {
    /// Install only these components (default: all, in order)
    #[arg(long, value_enum, value_name = "COMPONENT")]
    only: Vec<Component>,

    /// Directory for env/ and source checkouts (default: your home directory)
    #[arg(long)]
    home: Option<PathBuf>,

    /// Prefix under which m4 and bison are built
    #[arg(long, default_value = "/usr/local")]
    prefix_root: PathBuf,

    /// Run apt-get and `make install` without sudo
    #[arg(long)]
    no_sudo: bool,

    /// Print what would be done for missing components, then exit
    #[arg(long)]
    dry_run: bool,

    /// Disable coloured output
    #[arg(long)]
    no_color: bool,
}

fn print_plan(installer: &Installer<'_>, components: &[Component], console: Console) {
    for &component in components {
        if component == Component::SystemPython {
            console.say("check that `python --version` reports 2.6 or 2.7");
            continue;
        }
        if installer.is_present(component) {
            console.say(&format!("{}: already installed", component));
            continue;
        }
        for item in component.prerequisites().iter().copied().chain([component]) {
            if item != component && installer.is_present(item) {
                continue;
            }
            console.header(&item.to_string());
            for action in installer.host().actions(item) {
                console.say(&format!("  {}", action));
            }
        }
    }
}

fn print_report(report: &InstallReport, console: Console) {
    let names = |list: &[Component]| {
        list.iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    };
    if !report.installed.is_empty() {
        console.ok(&format!("Installed: {}.", names(&report.installed)));
    }
    if !report.skipped.is_empty() {
        console.say(&format!("Already present: {}.", names(&report.skipped)));
    }
}

async fn run(cli: Cli, console: Console) -> Result<()> {
    let mut host = Host::detect(!cli.no_sudo)?;
    if let Some(home) = cli.home {
        host.home = home;
    }
    host.prefix_root = cli.prefix_root;

    let client = Client::builder()
        .timeout(Duration::from_secs(300))
        .build()
        .map_err(|e| AppError::network(format!("Failed to create HTTP client: {}", e)))?;
    let runner = SystemRunner;
    let mut installer = Installer::new(&runner, &client, console, host);

    let components = if cli.only.is_empty() {
        Component::all().to_vec()
    } else {
        cli.only
    };

    if cli.dry_run {
        print_plan(&installer, &components, console);
        return Ok(());
    }

    console.header("OLD Installer.");
    let report = installer.install(&components).await?;
    print_report(&report, console);
    console.say("Done.");
    Ok(())
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> ExitCode {
    init_logging();

    let cli = Cli::parse();
    let console = Console::new(Palette::detect(!cli.no_color));

    match run(cli, console).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report_failure(console, &e),
    }
}
