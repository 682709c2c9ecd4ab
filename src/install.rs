//! Installation of the OLD and the system packages it depends on.
//!
//! Every [`Component`] is probed first and skipped when already present.
//! Otherwise its [`Action`]s run in order and the first failure aborts the
//! whole run; nothing is rolled back.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use reqwest::Client;

use crate::console::Console;
use crate::error::{AppError, Result};
use crate::fetch::{download_file, unpack_tar_gz};
use crate::runner::{CommandOutput, CommandRunner, CommandSpec};

const M4_VERSION: &str = "m4-1.4.10";
const M4_URL: &str = "https://ftp.gnu.org/gnu/m4/m4-1.4.10.tar.gz";
const BISON_VERSION: &str = "bison-2.3";
const BISON_URL: &str = "https://ftp.gnu.org/gnu/bison/bison-2.3.tar.gz";
const FOMA_SVN: &str = "http://foma.googlecode.com/svn/trunk/foma/";
const MITLM_SVN: &str = "http://mitlm.googlecode.com/svn/trunk/";

const PIL_LIBS: &[&str] = &["libjpeg-dev", "libfreetype6", "libfreetype6-dev", "zlib1g-dev"];
const FFMPEG_LIBS: &[&str] = &[
    "libavcodec-extra-52",
    "libavdevice-extra-52",
    "libavfilter-extra-0",
    "libavformat-extra-52",
    "libavutil-extra-49",
    "libpostproc-extra-51",
    "libswscale-extra-0",
];

/// A piece of software `installold` knows how to install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Component {
    SystemPython,
    EasyInstall,
    Virtualenv,
    Env,
    Old,
    MysqlPython,
    Importlib,
    Pil,
    Ffmpeg,
    M4,
    Bison,
    Flex,
    Subversion,
    Foma,
    Mitlm,
}

impl Component {
    pub fn display_name(self) -> &'static str {
        match self {
            Self::SystemPython => "system Python",
            Self::EasyInstall => "easy_install",
            Self::Virtualenv => "virtualenv",
            Self::Env => "the env/ virtual environment",
            Self::Old => "the Online Linguistic Database",
            Self::MysqlPython => "MySQL-python",
            Self::Importlib => "importlib",
            Self::Pil => "PIL",
            Self::Ffmpeg => "ffmpeg",
            Self::M4 => "m4",
            Self::Bison => "bison",
            Self::Flex => "flex",
            Self::Subversion => "subversion",
            Self::Foma => "foma and flookup",
            Self::Mitlm => "MITLM",
        }
    }

    /// Components in installation order. Build tools only pulled in by
    /// [`Self::prerequisites`] are not listed.
    pub fn all() -> &'static [Self] {
        &[
            Self::SystemPython,
            Self::EasyInstall,
            Self::Virtualenv,
            Self::Env,
            Self::Old,
            Self::MysqlPython,
            Self::Importlib,
            Self::Pil,
            Self::Ffmpeg,
            Self::Foma,
            Self::Mitlm,
        ]
    }

    /// Components installed right before this one, and only when this one
    /// is missing.
    pub fn prerequisites(self) -> &'static [Self] {
        match self {
            Self::Foma => &[Self::M4, Self::Bison, Self::Flex, Self::Subversion],
            Self::Mitlm => &[Self::Subversion],
            _ => &[],
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// One step of installing a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Run a command; success is a zero exit status.
    Run(CommandSpec),
    Download { url: String, dest: PathBuf },
    Unpack { archive: PathBuf, into: PathBuf },
    /// Append a directory to `PATH` for every later command and lookup.
    ExtendPath(PathBuf),
    ExpectDir(PathBuf),
    ExpectPrograms(&'static [&'static str]),
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run(spec) => match &spec.cwd {
                Some(dir) => write!(f, "(cd {}) {}", dir.display(), spec),
                None => write!(f, "{}", spec),
            },
            Self::Download { url, dest } => write!(f, "download {} to {}", url, dest.display()),
            Self::Unpack { archive, into } => {
                write!(f, "unpack {} into {}", archive.display(), into.display())
            }
            Self::ExtendPath(dir) => write!(f, "PATH=$PATH:{}", dir.display()),
            Self::ExpectDir(dir) => write!(f, "check that {} exists", dir.display()),
            Self::ExpectPrograms(programs) => write!(f, "check for {}", programs.join(", ")),
        }
    }
}

/// Where things live on the machine being set up.
#[derive(Debug, Clone)]
pub struct Host {
    /// Directory holding `env/` and the source checkouts.
    pub home: PathBuf,
    /// Prefix of the m4 and bison builds (`/usr/local`).
    pub prefix_root: PathBuf,
    /// `PATH` used for program lookups and commands.
    pub search_path: OsString,
    pub use_sudo: bool,
}

impl Host {
    pub fn detect(use_sudo: bool) -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| AppError::config("Unable to determine the home directory."))?;
        Ok(Self {
            home,
            prefix_root: PathBuf::from("/usr/local"),
            search_path: std::env::var_os("PATH").unwrap_or_default(),
            use_sudo,
        })
    }

    pub fn env_bin(&self, program: &str) -> PathBuf {
        self.home.join("env").join("bin").join(program)
    }

    fn m4_prefix(&self) -> PathBuf {
        self.prefix_root.join("m4")
    }

    fn bison_prefix(&self) -> PathBuf {
        self.prefix_root.join("bison")
    }

    fn apt_get(&self, packages: &[&str]) -> Action {
        Action::Run(
            CommandSpec::privileged(self.use_sudo, "apt-get")
                .args(["install", "-y"])
                .args(packages.iter().copied()),
        )
    }

    fn env_python_imports(&self, module: &str) -> CommandSpec {
        CommandSpec::new(self.env_bin("python").to_string_lossy())
            .arg("-c")
            .arg(format!("import {}", module))
    }

    /// `configure`, `make`, `make install` of an unpacked GNU tarball.
    fn gnu_build(&self, version: &str, url: &str, prefix: &Path) -> Vec<Action> {
        let archive = self.home.join(format!("{}.tar.gz", version));
        let source = self.home.join(version);
        vec![
            Action::Download {
                url: url.to_string(),
                dest: archive.clone(),
            },
            Action::Unpack {
                archive,
                into: self.home.clone(),
            },
            Action::ExpectDir(source.clone()),
            Action::Run(
                CommandSpec::new(source.join("configure").to_string_lossy())
                    .arg(format!("--prefix={}", prefix.display()))
                    .current_dir(&source),
            ),
            Action::Run(CommandSpec::new("make").current_dir(&source)),
            Action::Run(
                CommandSpec::privileged(self.use_sudo, "make")
                    .arg("install")
                    .current_dir(&source),
            ),
        ]
    }

    /// What installing `component` involves.
    pub fn actions(&self, component: Component) -> Vec<Action> {
        let easy_install = self.env_bin("easy_install").to_string_lossy().into_owned();
        match component {
            Component::SystemPython => Vec::new(),
            Component::EasyInstall => vec![self.apt_get(&["python-setuptools"])],
            Component::Virtualenv => vec![Action::Run(
                CommandSpec::new("easy_install").arg("virtualenv"),
            )],
            Component::Env => vec![Action::Run(
                CommandSpec::new("virtualenv")
                    .arg("--no-site-packages")
                    .path_arg(&self.home.join("env")),
            )],
            Component::Old => vec![Action::Run(
                CommandSpec::new(easy_install).arg("onlinelinguisticdatabase"),
            )],
            Component::MysqlPython => {
                vec![Action::Run(CommandSpec::new(easy_install).arg("MySQL-python"))]
            }
            Component::Importlib => {
                vec![Action::Run(CommandSpec::new(easy_install).arg("importlib"))]
            }
            Component::Pil => vec![
                self.apt_get(PIL_LIBS),
                Action::Run(
                    CommandSpec::new(self.env_bin("pip").to_string_lossy())
                        .args(["install", "PIL", "--allow-external", "PIL"])
                        .args(["--allow-unverified", "PIL"]),
                ),
            ],
            Component::Ffmpeg => vec![self.apt_get(FFMPEG_LIBS), self.apt_get(&["ffmpeg"])],
            Component::M4 => self.gnu_build(M4_VERSION, M4_URL, &self.m4_prefix()),
            Component::Bison => {
                let mut actions = vec![Action::ExtendPath(self.m4_prefix().join("bin"))];
                actions.extend(self.gnu_build(BISON_VERSION, BISON_URL, &self.bison_prefix()));
                actions
            }
            Component::Flex => vec![self.apt_get(&["flex"])],
            Component::Subversion => vec![self.apt_get(&["subversion"])],
            Component::Foma => {
                let source = self.home.join("foma");
                let bison_bin = self.bison_prefix().join("bin");
                vec![
                    Action::Run(
                        CommandSpec::new("svn")
                            .args(["co", FOMA_SVN])
                            .current_dir(&self.home),
                    ),
                    Action::ExpectDir(source.clone()),
                    Action::ExpectDir(bison_bin.clone()),
                    Action::ExtendPath(bison_bin),
                    self.apt_get(&["libreadline6", "libreadline6-dev"]),
                    Action::Run(CommandSpec::new("make").current_dir(&source)),
                    Action::Run(
                        CommandSpec::privileged(self.use_sudo, "make")
                            .arg("install")
                            .current_dir(&source),
                    ),
                    Action::ExpectPrograms(&["foma", "flookup"]),
                ]
            }
            Component::Mitlm => {
                let source = self.home.join("mitlm");
                vec![
                    Action::Run(
                        CommandSpec::new("svn")
                            .args(["checkout", MITLM_SVN, "mitlm"])
                            .current_dir(&self.home),
                    ),
                    Action::ExpectDir(source.clone()),
                    Action::Run(CommandSpec::new("make").arg("-j").current_dir(&source)),
                    // make -j leaves the tools in the checkout
                    Action::ExtendPath(source),
                    Action::ExpectPrograms(&["estimate-ngram", "evaluate-ngram"]),
                ]
            }
        }
    }
}

/// Extract `(major, minor)` from `python --version` output.
pub fn parse_python_version(output: &str) -> Option<(u32, u32)> {
    let version = output
        .split_whitespace()
        .skip_while(|word| !word.eq_ignore_ascii_case("python"))
        .nth(1)?;
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts
        .next()?
        .chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .ok()?;
    Some((major, minor))
}

/// Components handled by one run, split by outcome.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub installed: Vec<Component>,
    pub skipped: Vec<Component>,
}

pub struct Installer<'a> {
    runner: &'a dyn CommandRunner,
    client: &'a Client,
    console: Console,
    host: Host,
    extra_path: Vec<PathBuf>,
}

impl<'a> Installer<'a> {
    pub fn new(runner: &'a dyn CommandRunner, client: &'a Client, console: Console, host: Host) -> Self {
        Self {
            runner,
            client,
            console,
            host,
            extra_path: Vec::new(),
        }
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    fn search_path(&self) -> Result<OsString> {
        let base = std::env::split_paths(&self.host.search_path);
        std::env::join_paths(base.chain(self.extra_path.iter().cloned()))
            .map_err(|e| AppError::other(format!("Invalid PATH entry: {}", e)))
    }

    fn has_program(&self, program: &str) -> bool {
        match self.search_path() {
            Ok(paths) => which::which_in(program, Some(paths), &self.host.home).is_ok(),
            Err(_) => false,
        }
    }

    /// Run a command without stalling the async runtime. Builds and
    /// `apt-get` can take minutes.
    fn run_command(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        tokio::task::block_in_place(|| self.runner.run(spec))
    }

    fn succeeds(&self, spec: &CommandSpec) -> bool {
        self.run_command(spec).is_ok_and(|out| out.success())
    }

    /// Check the system Python, which must be 2.6 or 2.7.
    pub fn check_system_python(&self) -> Result<()> {
        let out = self
            .run_command(&CommandSpec::new("python").arg("--version"))
            .map_err(|e| AppError::install(Component::SystemPython.display_name(), e.to_string()))?;
        match parse_python_version(&out.output) {
            Some((2, 6 | 7)) => Ok(()),
            _ => Err(AppError::install(
                Component::SystemPython.display_name(),
                format!(
                    "the OLD was developed on Python 2.6 and 2.7 but the system Python is {:?}; install Python 2.6 or 2.7 (e.g. with pyenv) first",
                    out.trimmed()
                ),
            )),
        }
    }

    /// Whether `component` is already on the machine.
    pub fn is_present(&self, component: Component) -> bool {
        let host = &self.host;
        match component {
            Component::SystemPython => false,
            Component::EasyInstall => self.has_program("easy_install"),
            Component::Virtualenv => self.has_program("virtualenv"),
            Component::Env => host.env_bin("python").is_file(),
            Component::Old => host.env_bin("paster").is_file(),
            Component::MysqlPython => self.succeeds(&host.env_python_imports("MySQLdb")),
            Component::Importlib => self.succeeds(&host.env_python_imports("importlib")),
            Component::Pil => self.succeeds(&host.env_python_imports("Image")),
            Component::Ffmpeg => self.has_program("ffmpeg"),
            Component::M4 => {
                self.has_program("m4") || host.m4_prefix().join("bin").join("m4").is_file()
            }
            Component::Bison => host.bison_prefix().is_dir(),
            Component::Flex => self.has_program("flex"),
            Component::Subversion => self.has_program("svn"),
            Component::Foma => self.has_program("foma"),
            Component::Mitlm => {
                let checkout = host.home.join("mitlm");
                ["estimate-ngram", "evaluate-ngram"]
                    .iter()
                    .all(|tool| self.has_program(tool) || checkout.join(tool).is_file())
            }
        }
    }

    async fn execute(&mut self, component: Component, action: &Action) -> Result<()> {
        let fail = |detail: String| AppError::install(component.display_name(), detail);
        log::info!("{}: {}", component, action);

        match action {
            Action::Run(spec) => {
                let mut spec = spec.clone();
                if !self.extra_path.is_empty() {
                    let path = self.search_path()?;
                    spec = spec.env("PATH", path.to_string_lossy());
                }
                let out = self.run_command(&spec).map_err(|e| fail(e.to_string()))?;
                if !out.success() {
                    log::debug!("{} output:\n{}", spec, out.output);
                    return Err(fail(format!(
                        "`{}` exited with {:?}: {}",
                        spec,
                        out.status,
                        last_lines(&out.output, 5)
                    )));
                }
            }
            Action::Download { url, dest } => {
                download_file(self.client, url, dest)
                    .await
                    .map_err(|e| fail(e.to_string()))?;
            }
            Action::Unpack { archive, into } => {
                let top = unpack_tar_gz(archive, into).map_err(|e| fail(e.to_string()))?;
                log::debug!("unpacked {} to {}", archive.display(), top.display());
                if let Err(e) = std::fs::remove_file(archive) {
                    log::warn!("Failed to remove archive {:?}: {}", archive, e);
                }
            }
            Action::ExtendPath(dir) => {
                if !self.extra_path.contains(dir) {
                    self.extra_path.push(dir.clone());
                }
            }
            Action::ExpectDir(dir) => {
                if !dir.is_dir() {
                    return Err(fail(format!("{} does not exist", dir.display())));
                }
            }
            Action::ExpectPrograms(programs) => {
                let missing: Vec<&str> = programs
                    .iter()
                    .copied()
                    .filter(|program| !self.has_program(program))
                    .collect();
                if !missing.is_empty() {
                    return Err(fail(format!("{} not found after building", missing.join(", "))));
                }
            }
        }
        Ok(())
    }

    fn skip_if_present(&self, component: Component, report: &mut InstallReport) -> bool {
        if report.installed.contains(&component) || report.skipped.contains(&component) {
            return true;
        }
        if !self.is_present(component) {
            return false;
        }
        self.console
            .say(&format!("{} is already installed.", capitalise(component.display_name())));
        report.skipped.push(component);
        true
    }

    async fn install_one(&mut self, component: Component, report: &mut InstallReport) -> Result<()> {
        for action in self.host.actions(component) {
            self.execute(component, &action).await?;
        }
        self.console
            .ok(&format!("Installed {}.", component.display_name()));
        report.installed.push(component);
        Ok(())
    }

    /// Install `components` in order, each after its missing prerequisites.
    pub async fn install(&mut self, components: &[Component]) -> Result<InstallReport> {
        let mut report = InstallReport::default();
        for &component in components {
            if component == Component::SystemPython {
                self.check_system_python()?;
                continue;
            }
            if self.skip_if_present(component, &mut report) {
                continue;
            }
            for &prerequisite in component.prerequisites() {
                if !self.skip_if_present(prerequisite, &mut report) {
                    self.install_one(prerequisite, &mut report).await?;
                }
            }
            self.install_one(component, &mut report).await?;
        }
        Ok(report)
    }
}

fn capitalise(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn last_lines(output: &str, count: usize) -> String {
    let lines: Vec<&str> = output.trim_end().lines().collect();
    lines[lines.len().saturating_sub(count)..].join("\n")
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::fs;

    use super::*;
    use crate::console::Palette;

    struct Recording {
        calls: RefCell<Vec<CommandSpec>>,
        python: &'static str,
    }

    impl Recording {
        fn new(python: &'static str) -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                python,
            }
        }
    }

    impl CommandRunner for Recording {
        fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
            self.calls.borrow_mut().push(spec.clone());
            if spec.program == "python" {
                return Ok(CommandOutput::ok(self.python));
            }
            if spec.args.first().map(String::as_str) == Some("-c") {
                return Ok(CommandOutput::failed(1, "ImportError"));
            }
            Ok(CommandOutput::ok(""))
        }
    }

    fn host(root: &Path) -> Host {
        Host {
            home: root.join("home"),
            prefix_root: root.join("usr-local"),
            search_path: root.join("bin").into_os_string(),
            use_sudo: true,
        }
    }

    #[cfg(unix)]
    fn fake_program(dir: &Path, name: &str) {
        use std::os::unix::fs::PermissionsExt as _;
        fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn python_versions_are_parsed() {
        assert_eq!(parse_python_version("Python 2.7.18\n"), Some((2, 7)));
        assert_eq!(parse_python_version("Python 2.6.9+"), Some((2, 6)));
        assert_eq!(parse_python_version("Python 3.12.1"), Some((3, 12)));
        assert_eq!(parse_python_version("command not found"), None);
    }

    #[test]
    fn foma_pulls_in_its_build_tools() {
        assert_eq!(
            Component::Foma.prerequisites(),
            &[Component::M4, Component::Bison, Component::Flex, Component::Subversion]
        );
        assert!(!Component::all().contains(&Component::Bison));
    }

    #[test]
    fn bison_is_configured_with_m4_on_path() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path());
        let actions = host.actions(Component::Bison);

        assert_eq!(actions[0], Action::ExtendPath(host.prefix_root.join("m4").join("bin")));
        assert!(matches!(&actions[1], Action::Download { url, .. } if url == BISON_URL));
        let configure = actions
            .iter()
            .find_map(|a| match a {
                Action::Run(spec) if spec.program.ends_with("configure") => Some(spec),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            configure.args,
            vec![format!("--prefix={}", host.prefix_root.join("bison").display())]
        );
        assert_eq!(configure.cwd.as_deref(), Some(host.home.join("bison-2.3").as_path()));
        let last = actions.last().unwrap().to_string();
        assert!(last.ends_with("sudo make install"), "{}", last);
    }

    #[test]
    fn apt_packages_are_installed_non_interactively() {
        let dir = tempfile::tempdir().unwrap();
        let host = Host {
            use_sudo: false,
            ..host(dir.path())
        };
        let actions = host.actions(Component::Pil);
        let apt = actions
            .iter()
            .find_map(|a| match a {
                Action::Run(spec) => Some(spec),
                _ => None,
            })
            .unwrap();
        assert_eq!(apt.program, "apt-get");
        assert_eq!(apt.args[..2], ["install".to_string(), "-y".to_string()]);
        assert!(apt.args.contains(&"zlib1g-dev".to_string()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn old_python_aborts_before_anything_runs() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Recording::new("Python 3.8.10");
        let client = Client::new();
        let mut installer =
            Installer::new(&runner, &client, Console::new(Palette::plain()), host(dir.path()));

        let err = installer.install(Component::all()).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Install);
        assert_eq!(runner.calls.borrow().len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn present_components_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path());
        fake_program(&dir.path().join("bin"), "easy_install");
        fake_program(&dir.path().join("bin"), "virtualenv");
        fake_program(&host.home.join("env").join("bin"), "python");

        let runner = Recording::new("Python 2.7.18");
        let client = Client::new();
        let mut installer = Installer::new(&runner, &client, Console::new(Palette::plain()), host);

        let report = installer
            .install(&[
                Component::SystemPython,
                Component::EasyInstall,
                Component::Virtualenv,
                Component::Env,
                Component::Old,
                Component::MysqlPython,
            ])
            .await
            .unwrap();

        assert_eq!(
            report.skipped,
            vec![Component::EasyInstall, Component::Virtualenv, Component::Env]
        );
        assert_eq!(report.installed, vec![Component::Old, Component::MysqlPython]);
        let calls = runner.calls.borrow();
        let installs: Vec<String> = calls
            .iter()
            .filter(|spec| spec.program.ends_with("easy_install"))
            .map(|spec| spec.args.join(" "))
            .collect();
        assert_eq!(installs, ["onlinelinguisticdatabase", "MySQL-python"]);
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn missing_build_output_fails_the_component() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path());
        fake_program(&dir.path().join("bin"), "svn");
        fs::create_dir_all(host.home.join("mitlm")).unwrap();

        let runner = Recording::new("Python 2.7.18");
        let client = Client::new();
        let mut installer = Installer::new(&runner, &client, Console::new(Palette::plain()), host);

        let err = installer.install(&[Component::Mitlm]).await.unwrap_err();
        assert_eq!(err.get("component"), Some("MITLM"));
        let calls = runner.calls.borrow();
        let make = calls.iter().find(|spec| spec.program == "make").unwrap();
        assert_eq!(make.args, ["-j".to_string()]);
        assert_eq!(make.cwd.as_deref(), Some(dir.path().join("home").join("mitlm").as_path()));
    }
}
