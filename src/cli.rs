//! Command line of `buildold` and the settings it resolves to.

use std::path::{Path, PathBuf};

use clap::Parser;

use crate::config::{
    resolve_file_config, BuildSettings, DbCredentials, FileConfig, SslPaths,
};
use crate::console::{Console, Prompter};
use crate::error::{ErrorKind, Result};
use crate::instance::{build_instance, destroy_instance, format_listing, write_dative_servers, Context};
use crate::runner::CommandRunner;
use crate::store::StateStore;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "buildold",
    version,
    about = "Build, list and destroy Online Linguistic Database instances on this server"
)]
pub struct BuildCli {
    /// Name of the OLD to build or destroy (letters, numbers and underscore)
    pub name: Option<String>,

    /// MySQL user that can create and drop databases
    #[arg(long = "mysql-username", value_name = "MYSQL_USER")]
    pub mysql_user: Option<String>,

    /// Password of the MySQL user
    #[arg(long = "mysql-password", env = "OLD_MYSQL_PASSWORD", hide_env_values = true)]
    pub mysql_password: Option<String>,

    /// TOML (or JSON) file with defaults for any of the path and host options
    #[arg(long)]
    pub config_file: Option<PathBuf>,

    /// Path to the paster executable (default: `paster` on PATH)
    #[arg(long, alias = "paster_path")]
    pub paster_path: Option<String>,

    /// Directory that holds one subdirectory per OLD
    #[arg(long)]
    pub apps_path: Option<PathBuf>,

    /// Apache virtual hosts file (default: /etc/apache2/sites-available/<HOST>)
    #[arg(long = "virtual-hosts-path", value_name = "VH_PATH")]
    pub vh_path: Option<PathBuf>,

    /// Host name the OLDs are served under, e.g. www.myoldurl.com
    #[arg(long)]
    pub host: Option<String>,

    /// Destroy the named OLD instead of building it. USE WITH EXTREME CAUTION.
    #[arg(long, conflicts_with_all = ["list", "dative_servers"])]
    pub destroy: bool,

    /// List the OLDs built here
    #[arg(long)]
    pub list: bool,

    /// Write a Dative servers.json summarising the OLDs built here
    #[arg(long, value_name = "PATH")]
    pub dative_servers: Option<PathBuf>,

    /// SSL certificate
    #[arg(long)]
    pub ssl_crt_path: Option<PathBuf>,

    /// SSL private key
    #[arg(long)]
    pub ssl_key_path: Option<PathBuf>,

    /// Intermediate certificate (Apache's SSLCertificateChainFile)
    #[arg(long)]
    pub ssl_pem_path: Option<PathBuf>,

    /// Serve the virtual host over plain HTTP on port 80
    #[arg(long)]
    pub plain_http: bool,

    /// State file recording the OLDs built here (default: ./.buildold.json)
    #[arg(long)]
    pub state_file: Option<PathBuf>,

    /// Disable coloured output
    #[arg(long)]
    pub no_color: bool,
}

fn ask_path(prompter: &dyn Prompter, question: &str, missing: &str) -> Result<PathBuf> {
    prompter.require(question, missing).map(PathBuf::from)
}

impl BuildCli {
    pub fn store_path(&self, file: &FileConfig) -> PathBuf {
        self.state_file.clone().unwrap_or_else(|| file.store_path())
    }

    /// The instance name, asked for when not given.
    pub fn name_or_prompt(&self, prompter: &dyn Prompter) -> Result<String> {
        if let Some(name) = self.name.as_deref().filter(|n| !n.trim().is_empty()) {
            return Ok(name.to_string());
        }
        if self.destroy {
            prompter.require(
                "Please enter the name of the OLD that you want to destroy:",
                "You must provide the name of the OLD to destroy.",
            )
        } else {
            prompter.require(
                "Please enter a name for the OLD that you want to build (use only letters, numbers and/or the underscore):",
                "You must provide a name for the OLD that you want to build.",
            )
        }
    }

    /// Combine options, the config file and prompts into build settings.
    pub fn resolve_build(&self, file: &FileConfig, prompter: &dyn Prompter) -> Result<BuildSettings> {
        let name = self.name_or_prompt(prompter)?;

        let apps_path = match self.apps_path.clone().or_else(|| file.apps_path.clone()) {
            Some(path) => path,
            None => ask_path(
                prompter,
                "Please enter the path of the directory where you want your OLD's files to be written. This script will create the directory, if needed:",
                "You must specify the directory where the OLD app's directory will be located.",
            )?,
        };

        let user = match self.mysql_user.clone().or_else(|| file.mysql_user.clone()) {
            Some(user) => user,
            None => prompter.require(
                "Please enter the username of a MySQL user with sufficient privileges:",
                "You must provide a MySQL username.",
            )?,
        };
        let password = match self.mysql_password.clone().filter(|p| !p.is_empty()) {
            Some(password) => password,
            None => prompter.require(
                &format!("Please enter the password for the MySQL user {}:", user),
                "You must provide the MySQL user's password.",
            )?,
        };

        let paster_path = match self.paster_path.clone().or_else(|| file.paster_path.clone()) {
            Some(path) => path,
            None => {
                let answer = prompter.ask(
                    "Please tell us where the paster executable is; type nothing if it's in your PATH and can be accessed with 'paster':",
                )?;
                let answer = answer.trim();
                if answer.is_empty() {
                    "paster".to_string()
                } else {
                    answer.to_string()
                }
            }
        };

        let host = match self.host.clone().or_else(|| file.host.clone()) {
            Some(host) => host,
            None => prompter.require(
                "Please enter the host name of the URL where your OLD will be served, e.g., something like \"www.myoldurl.com\":",
                "You must provide a host value.",
            )?,
        };

        let vh_path = match self.vh_path.clone().or_else(|| file.vh_path.clone()) {
            Some(path) => path,
            None => {
                let default = Path::new("/etc/apache2/sites-available").join(&host);
                let answer = prompter.ask(&format!(
                    "Please enter the path for the Apache virtual hosts file for this OLD. We will use {} if you enter nothing:",
                    default.display()
                ))?;
                let answer = answer.trim();
                if answer.is_empty() {
                    default
                } else {
                    PathBuf::from(answer)
                }
            }
        };

        let ssl = if self.plain_http {
            None
        } else {
            Some(self.resolve_ssl(file, prompter)?)
        };

        Ok(BuildSettings {
            name,
            apps_path,
            vh_path,
            host,
            paster_path,
            credentials: DbCredentials { user, password },
            ssl,
            ports: file.port_range()?,
            system: file.system.clone(),
        })
    }

    fn resolve_ssl(&self, file: &FileConfig, prompter: &dyn Prompter) -> Result<SslPaths> {
        let crt = match self.ssl_crt_path.clone().or_else(|| file.ssl_crt_path.clone()) {
            Some(path) => path,
            None => ask_path(
                prompter,
                "Please enter the absolute path to your SSL .crt file:",
                "You must provide a SSL .crt file path",
            )?,
        };
        let key = match self.ssl_key_path.clone().or_else(|| file.ssl_key_path.clone()) {
            Some(path) => path,
            None => ask_path(
                prompter,
                "Please enter the absolute path to your SSL .key file:",
                "You must provide a SSL .key file path",
            )?,
        };
        let pem = match self.ssl_pem_path.clone().or_else(|| file.ssl_pem_path.clone()) {
            Some(path) => path,
            None => ask_path(
                prompter,
                "Please enter the absolute path to your SSL .pem file:",
                "You must provide a SSL .pem file path",
            )?,
        };
        Ok(SslPaths { crt, key, pem })
    }
}

/// Dispatch one `buildold` invocation.
pub fn run_buildold(
    cli: &BuildCli,
    runner: &dyn CommandRunner,
    prompter: &dyn Prompter,
    console: Console,
) -> Result<()> {
    let file = resolve_file_config(cli.config_file.as_deref());
    let mut store = StateStore::load(&cli.store_path(&file));
    let ctx = Context {
        runner,
        console,
        system: &file.system,
    };

    if cli.list {
        console.say(&format_listing(store.instances(), console.palette()));
        return Ok(());
    }

    if let Some(path) = &cli.dative_servers {
        return match write_dative_servers(&store, path, prompter) {
            Ok(count) => {
                console.ok(&format!("Wrote {} server(s) to {}.", count, path.display()));
                Ok(())
            }
            Err(e) => {
                if e.kind() == ErrorKind::Declined {
                    console.warn(&format!("Dative servers file was NOT written at {}.", path.display()));
                }
                Err(e)
            }
        };
    }

    if cli.destroy {
        let name = cli.name_or_prompt(prompter)?;
        destroy_instance(&ctx, &mut store, name.trim(), prompter, cli.mysql_password.clone())?;
        return Ok(());
    }

    let settings = cli.resolve_build(&file, prompter)?;
    let built = build_instance(&ctx, &settings, &mut store)?;
    let palette = console.palette();
    console.say(&format!(
        "The {} OLD is being served at {}.\nIts files are stored at {}.",
        built.name,
        palette.ok(&built.url()),
        palette.ok(&built.instance_path.display().to_string())
    ));
    console.say("Done.");
    Ok(())
}
