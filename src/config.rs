use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

pub const DEFAULT_PORT_START: u16 = 9000;
pub const DEFAULT_PORT_END: u16 = 9100;
pub const DEFAULT_STORE: &str = ".buildold.json";
pub const DEFAULT_CONFIG_FILE: &str = ".buildold.toml";

/// Values read from the operator's config file. Every key is optional;
/// command-line options win over these.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub mysql_user: Option<String>,
    #[serde(default)]
    pub paster_path: Option<String>,
    #[serde(default)]
    pub apps_path: Option<PathBuf>,
    #[serde(default)]
    pub vh_path: Option<PathBuf>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub ssl_crt_path: Option<PathBuf>,
    #[serde(default)]
    pub ssl_key_path: Option<PathBuf>,
    #[serde(default)]
    pub ssl_pem_path: Option<PathBuf>,
    #[serde(default)]
    pub store_path: Option<PathBuf>,
    #[serde(default)]
    pub port_start: Option<u16>,
    #[serde(default)]
    pub port_end: Option<u16>,
    #[serde(default)]
    pub system: SystemSettings,
}

/// Where the server keeps the things this tool touches outside the apps dir.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemSettings {
    #[serde(default = "default_true")]
    pub use_sudo: bool,
    #[serde(default = "default_init_dir")]
    pub init_dir: PathBuf,
    #[serde(default = "default_apache_init")]
    pub apache_init: PathBuf,
    #[serde(default = "default_a2ensite")]
    pub a2ensite: String,
    #[serde(default = "default_update_rc_d")]
    pub update_rc_d: String,
    #[serde(default = "default_crontab")]
    pub crontab: String,
    #[serde(default = "std::env::temp_dir")]
    pub tmp_dir: PathBuf,
}

fn default_true() -> bool {
    true
}

fn default_init_dir() -> PathBuf {
    PathBuf::from("/etc/init.d")
}

fn default_apache_init() -> PathBuf {
    PathBuf::from("/etc/init.d/apache2")
}

fn default_a2ensite() -> String {
    "a2ensite".to_string()
}

fn default_update_rc_d() -> String {
    "/usr/sbin/update-rc.d".to_string()
}

fn default_crontab() -> String {
    "crontab".to_string()
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            use_sudo: true,
            init_dir: default_init_dir(),
            apache_init: default_apache_init(),
            a2ensite: default_a2ensite(),
            update_rc_d: default_update_rc_d(),
            crontab: default_crontab(),
            tmp_dir: std::env::temp_dir(),
        }
    }
}

/// The band of TCP ports instances may be served on, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Result<Self> {
        if start > end {
            return Err(AppError::config(format!(
                "Invalid port range {}-{}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: DEFAULT_PORT_START,
            end: DEFAULT_PORT_END,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SslPaths {
    pub crt: PathBuf,
    pub key: PathBuf,
    pub pem: PathBuf,
}

/// MySQL account used for the run. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct DbCredentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for DbCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbCredentials")
            .field("user", &self.user)
            .field("password", &"****")
            .finish()
    }
}

/// Everything a build run needs, fully resolved.
#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub name: String,
    pub apps_path: PathBuf,
    pub vh_path: PathBuf,
    pub host: String,
    pub paster_path: String,
    pub credentials: DbCredentials,
    /// `None` serves the proxy entries over plain HTTP.
    pub ssl: Option<SslPaths>,
    pub ports: PortRange,
    pub system: SystemSettings,
}

/// Load a config file, TOML unless the name ends in `.json`.
pub fn load_file_config(path: &Path) -> Result<FileConfig> {
    let content = fs::read_to_string(path)
        .map_err(|e| AppError::config(format!("Failed to read {}: {}", path.display(), e)))?;
    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if is_json {
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(toml::from_str(&content)?)
    }
}

/// Load the config file the operator pointed at, or `~/.buildold.toml` if
/// present. A broken file is reported and treated as empty.
pub fn resolve_file_config(explicit: Option<&Path>) -> FileConfig {
    let candidate = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => dirs::home_dir()
            .map(|home| home.join(DEFAULT_CONFIG_FILE))
            .filter(|path| path.is_file()),
    };

    let Some(path) = candidate else {
        return FileConfig::default();
    };

    match load_file_config(&path) {
        Ok(config) => config,
        Err(e) => {
            log::warn!(
                "Ignoring config file {}: {}",
                path.display(),
                e
            );
            FileConfig::default()
        }
    }
}

impl FileConfig {
    pub fn port_range(&self) -> Result<PortRange> {
        PortRange::new(
            self.port_start.unwrap_or(DEFAULT_PORT_START),
            self.port_end.unwrap_or(DEFAULT_PORT_END),
        )
    }

    pub fn store_path(&self) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE))
    }
}
