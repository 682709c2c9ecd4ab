//! Synchronous execution of external commands.

use std::fmt;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use crate::error::{AppError, Result};

/// An external command to run, described as argv rather than a shell string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub envs: Vec<(String, String)>,
    pub stdin: Option<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            envs: Vec::new(),
            stdin: None,
        }
    }

    /// Build a command that is prefixed with `sudo` when `use_sudo` is set.
    pub fn privileged(use_sudo: bool, program: impl Into<String>) -> Self {
        if use_sudo {
            Self::new("sudo").arg(program.into())
        } else {
            Self::new(program)
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// The program with `sudo` peeled off, if present.
    pub fn effective_program(&self) -> &str {
        if self.program == "sudo" {
            self.args.first().map(String::as_str).unwrap_or("sudo")
        } else {
            &self.program
        }
    }

    /// Arguments of [`Self::effective_program`].
    pub fn effective_args(&self) -> &[String] {
        if self.program == "sudo" && !self.args.is_empty() {
            &self.args[1..]
        } else {
            &self.args
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a command: exit status and stdout followed by stderr.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub output: String,
}

impl CommandOutput {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            output: output.into(),
        }
    }

    pub fn failed(code: i32, output: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            output: output.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    pub fn trimmed(&self) -> &str {
        self.output.trim()
    }
}

/// Runs external commands to completion.
///
/// A non-zero exit is not an error: callers judge the captured output with a
/// [`crate::instance::SuccessPredicate`]. `Err` means the command could not be
/// started at all.
pub trait CommandRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Runs commands on the local machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        log::debug!(
            "run: {} (cwd: {:?})",
            spec,
            spec.cwd.as_deref().unwrap_or_else(|| Path::new("."))
        );

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &spec.envs {
            cmd.env(key, value);
        }
        cmd.stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = cmd
            .spawn()
            .map_err(|e| AppError::io(format!("Failed to run {}: {}", spec.program, e)))?;

        // Stdin is fed while the output pipes drain, so neither side can
        // block on a full pipe.
        let pipe = child.stdin.take();
        let (output, fed) = thread::scope(|scope| {
            let writer = match (pipe, spec.stdin.as_deref()) {
                (Some(mut pipe), Some(input)) => {
                    Some(scope.spawn(move || pipe.write_all(input.as_bytes())))
                }
                _ => None,
            };
            let output = child.wait_with_output();
            let fed = writer.map_or(Ok(()), |handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(io::Error::other("stdin writer panicked")))
            });
            (output, fed)
        });

        let output = output
            .map_err(|e| AppError::io(format!("Failed to wait for {}: {}", spec.program, e)))?;
        match fed {
            // The child exited without reading all of its input.
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                log::debug!("{} closed stdin early", spec.program);
            }
            Err(e) => {
                return Err(AppError::io(format!(
                    "Failed to write stdin of {}: {}",
                    spec.program, e
                )))
            }
            Ok(()) => {}
        }

        let mut merged = String::from_utf8_lossy(&output.stdout).into_owned();
        merged.push_str(&String::from_utf8_lossy(&output.stderr));

        log::debug!("exit: {:?} ({} bytes of output)", output.status.code(), merged.len());

        Ok(CommandOutput {
            status: output.status.code(),
            output: merged,
        })
    }
}

/// Resolve `program` to an executable path, either as given or via `PATH`.
pub fn find_executable(program: &str) -> Result<PathBuf> {
    which::which(program).map_err(|_| AppError::missing_executable(program))
}
