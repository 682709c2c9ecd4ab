//! Paths derived from an instance's name and the operator's settings.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Name of the directory (and database) that holds an instance.
pub fn dir_name_for(name: &str) -> String {
    format!("{}old", name.to_lowercase())
}

/// Shared log directory under the apps path.
pub fn apps_log_dir(apps_path: &Path) -> PathBuf {
    apps_path.join("log")
}

/// Where the previous virtual-hosts file is kept while a build is in flight.
pub fn proxy_backup_path(vh_path: &Path) -> PathBuf {
    let mut raw = vh_path.as_os_str().to_owned();
    raw.push("_bk");
    PathBuf::from(raw)
}

/// The `sites-enabled` twin of a `sites-available` file, if the path has one.
pub fn enabled_site_path(vh_path: &Path) -> Option<PathBuf> {
    let raw = vh_path.to_str()?;
    if !raw.contains("sites-available") {
        return None;
    }
    Some(PathBuf::from(raw.replace("sites-available", "sites-enabled")))
}

/// File layout of one instance directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceLayout {
    pub root: PathBuf,
}

impl InstanceLayout {
    pub fn new(apps_path: &Path, dir_name: &str) -> Self {
        Self {
            root: apps_path.join(dir_name),
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("log")
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("production.ini")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.root.join("old.pid")
    }

    pub fn app_log(&self) -> PathBuf {
        self.log_dir().join("paster-old.log")
    }
}

pub fn init_script_name(dir_name: &str) -> String {
    format!("{}_init", dir_name)
}
