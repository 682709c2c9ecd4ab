//! Application error types.

use std::collections::HashMap;
use std::fmt;

use crate::ledger::Step;

/// Application error carrying a kind and a small key/value payload.
#[derive(Debug)]
pub struct AppError {
    payload: HashMap<String, String>,
    kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Instance name contains characters outside `[A-Za-z0-9_]`
    InvalidName,
    /// Instance already exists on disk, in the database or in the state store
    InstanceExists,
    /// No record of the instance in the state store
    InstanceNotFound,
    /// Every port in the reserved range is referenced by the proxy config
    NoPortAvailable,
    /// A required external program is not installed
    MissingExecutable,
    /// MySQL refused the supplied credentials
    DatabaseAccess,
    /// MySQL user lacks global privileges
    InsufficientPrivileges,
    /// A directory was requested where a regular file exists
    DirPathIsFile,
    /// A provisioning step did not report success
    StepFailed,
    /// The operator answered no to a confirmation
    Declined,
    /// Configuration error
    Config,
    /// File system error
    Io,
    /// Network error
    Network,
    /// Dependency installation error
    Install,
    /// General error
    Other,
}

impl ErrorKind {
    pub fn code(&self) -> u32 {
        match self {
            Self::InvalidName => 1001,
            Self::InstanceExists => 1002,
            Self::InstanceNotFound => 1003,
            Self::NoPortAvailable => 1004,
            Self::MissingExecutable => 1005,
            Self::DatabaseAccess => 1006,
            Self::InsufficientPrivileges => 1007,
            Self::DirPathIsFile => 2001,
            Self::StepFailed => 2002,
            Self::Declined => 2003,
            Self::Config => 3001,
            Self::Io => 3002,
            Self::Network => 3003,
            Self::Install => 4001,
            Self::Other => 9999,
        }
    }
}

impl AppError {
    pub fn new(kind: ErrorKind, payload: HashMap<String, String>) -> Self {
        Self { payload, kind }
    }

    /// Create an error with a single "detail" key from a non-empty string,
    /// or an empty payload if the string is empty.
    fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let payload = if detail.is_empty() {
            HashMap::new()
        } else {
            HashMap::from([("detail".to_string(), detail)])
        };
        Self::new(kind, payload)
    }

    pub fn invalid_name(name: &str) -> Self {
        Self::new(
            ErrorKind::InvalidName,
            HashMap::from([("name".to_string(), name.to_string())]),
        )
    }

    /// `location` says where the clash was found: "directory", "database" or "store".
    pub fn instance_exists(name: &str, location: &str) -> Self {
        Self::new(
            ErrorKind::InstanceExists,
            HashMap::from([
                ("name".to_string(), name.to_string()),
                ("location".to_string(), location.to_string()),
            ]),
        )
    }

    pub fn instance_not_found(name: &str) -> Self {
        Self::new(
            ErrorKind::InstanceNotFound,
            HashMap::from([("name".to_string(), name.to_string())]),
        )
    }

    pub fn no_port_available(start: u16, end: u16) -> Self {
        Self::new(
            ErrorKind::NoPortAvailable,
            HashMap::from([
                ("start".to_string(), start.to_string()),
                ("end".to_string(), end.to_string()),
            ]),
        )
    }

    pub fn missing_executable(program: &str) -> Self {
        Self::new(
            ErrorKind::MissingExecutable,
            HashMap::from([("program".to_string(), program.to_string())]),
        )
    }

    pub fn database_access(user: &str) -> Self {
        Self::new(
            ErrorKind::DatabaseAccess,
            HashMap::from([("user".to_string(), user.to_string())]),
        )
    }

    pub fn insufficient_privileges(user: &str) -> Self {
        Self::new(
            ErrorKind::InsufficientPrivileges,
            HashMap::from([("user".to_string(), user.to_string())]),
        )
    }

    pub fn dir_path_is_file(path: &str) -> Self {
        Self::new(
            ErrorKind::DirPathIsFile,
            HashMap::from([("path".to_string(), path.to_string())]),
        )
    }

    pub fn step_failed(step: Step, detail: impl Into<String>) -> Self {
        let mut err = Self::with_detail(ErrorKind::StepFailed, detail);
        err.payload
            .insert("step".to_string(), step.label().to_string());
        err
    }

    pub fn declined() -> Self {
        Self::new(ErrorKind::Declined, HashMap::new())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Config, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Io, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Network, message)
    }

    pub fn network_with_url(url: &str, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Network,
            HashMap::from([
                ("url".to_string(), url.to_string()),
                ("detail".to_string(), detail.into()),
            ]),
        )
    }

    pub fn install(component: &str, detail: impl Into<String>) -> Self {
        let mut err = Self::with_detail(ErrorKind::Install, detail);
        err.payload
            .insert("component".to_string(), component.to_string());
        err
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Other, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.payload.get(key).map(String::as_str)
    }

    /// Human-readable explanation with a remediation hint for the operator.
    pub fn hint(&self) -> String {
        let field = |key: &str| self.get(key).unwrap_or("?").to_string();
        match self.kind {
            ErrorKind::InvalidName => format!(
                "The name {:?} is invalid: use only letters, numbers and/or the underscore.",
                field("name")
            ),
            ErrorKind::InstanceExists => format!(
                "An OLD named {} already exists ({}). Please try again with a different name.",
                field("name"),
                field("location")
            ),
            ErrorKind::InstanceNotFound => format!(
                "There is no record of an OLD named {}. If it exists, you will need to destroy it manually.",
                field("name")
            ),
            ErrorKind::NoPortAvailable => format!(
                "No more ports available; ports {} through {} are already in use.",
                field("start"),
                field("end")
            ),
            ErrorKind::MissingExecutable => format!(
                "There is no executable at {}. Install it and tell us where it is.",
                field("program")
            ),
            ErrorKind::DatabaseAccess => format!(
                "Cannot access MySQL with user {} and the provided password.",
                field("user")
            ),
            ErrorKind::InsufficientPrivileges => format!(
                "MySQL user {} does not have sufficient privileges (GRANT ALL PRIVILEGES ON *.*).",
                field("user")
            ),
            ErrorKind::DirPathIsFile => format!(
                "Attempted to create a directory at {} where a file already exists.",
                field("path")
            ),
            ErrorKind::StepFailed => format!(
                "Step {} failed: {}. Completed steps were rolled back; verify the server state.",
                field("step"),
                field("detail")
            ),
            ErrorKind::Declined => "Aborted, phewf. Nothing was changed.".to_string(),
            ErrorKind::Install => format!(
                "Unable to install {}: {}. Install it manually and run this script again.",
                field("component"),
                field("detail")
            ),
            ErrorKind::Config | ErrorKind::Io | ErrorKind::Network | ErrorKind::Other => {
                self.to_string()
            }
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.payload.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            let mut pairs: Vec<String> = self
                .payload
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            pairs.sort();
            write!(f, "{:?}: {}", self.kind, pairs.join(", "))
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::network(err.to_string())
    }
}

impl From<walkdir::Error> for AppError {
    fn from(err: walkdir::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::config(err.to_string())
    }
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, AppError>;
