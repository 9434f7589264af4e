// ABOUTME: SSH-specific error types.
// ABOUTME: Covers credential materialization, forked process execution, and tunnel failures.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to materialize credential for {user}: {source}")]
    Materialize {
        user: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Execution(#[from] ExecError),

    #[error("ssh binary not found: {}", .0.display())]
    BinaryNotFound(PathBuf),

    #[error("failed to spawn ssh: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("invalid ssh flag {flag:?}: {reason}")]
    InvalidFlag { flag: String, reason: &'static str },

    #[error("invalid target host {0:?}")]
    InvalidHost(String),

    #[error("failed to allocate a local port: {0}")]
    PortAllocation(#[source] std::io::Error),

    #[error("tunnel limit reached ({0} active)")]
    TunnelLimit(usize),

    #[error("no tokio runtime to run the tunnel on")]
    NoRuntime,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Filesystem or pipe failure; nothing remote was attempted or the
    /// transport broke underneath us.
    Io,
    /// The invocation ran and failed: non-zero exit or forced termination.
    Execution,
    /// Missing binary, bad arguments or an exhausted limit. Retrying will not help.
    Configuration,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Materialize { .. } | Error::PortAllocation(_) | Error::Io(_) => ErrorKind::Io,
            Error::Execution(_) => ErrorKind::Execution,
            Error::BinaryNotFound(_)
            | Error::Spawn(_)
            | Error::InvalidFlag { .. }
            | Error::InvalidHost(_)
            | Error::TunnelLimit(_)
            | Error::NoRuntime => ErrorKind::Configuration,
        }
    }

    /// The failed execution, if this is one.
    pub fn as_exec(&self) -> Option<&ExecError> {
        match self {
            Error::Execution(e) => Some(e),
            _ => None,
        }
    }
}

/// Why an invocation did not complete successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExecFault {
    #[error("exited with status {0}")]
    Exit(i32),

    #[error("terminated by signal {0}")]
    Signal(i32),

    #[error("killed by watchdog after {0:?}")]
    TimedOut(Duration),

    #[error("stopped")]
    Stopped,
}

/// A failed `ssh` invocation together with everything it printed.
#[derive(Debug)]
pub struct ExecError {
    user: String,
    command_line: String,
    remote_commands: String,
    output: String,
    fault: ExecFault,
}

impl ExecError {
    pub(crate) fn new(
        user: impl Into<String>,
        command_line: impl Into<String>,
        remote_commands: impl Into<String>,
        output: impl Into<String>,
        fault: ExecFault,
    ) -> Self {
        Self {
            user: user.into(),
            command_line: command_line.into(),
            remote_commands: remote_commands.into(),
            output: output.into(),
            fault,
        }
    }

    /// Combined stdout and stderr exactly as captured.
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn fault(&self) -> ExecFault {
        self.fault
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn remote_commands(&self) -> &str {
        &self.remote_commands
    }

    /// Single-line rendering for logs: tabs, CRs and LFs become spaces.
    pub fn log_line(&self) -> String {
        collapse_newlines(&self.to_string())
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SSH command failed for user {} ({}): {}; remote commands: {}; remote server said: {}",
            self.user, self.fault, self.command_line, self.remote_commands, self.output
        )
    }
}

impl std::error::Error for ExecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.fault)
    }
}

pub(crate) fn collapse_newlines(s: &str) -> String {
    s.replace(['\t', '\n', '\r'], " ")
}
