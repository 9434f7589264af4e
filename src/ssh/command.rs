// ABOUTME: Argument list construction for forked ssh invocations.
// ABOUTME: Holds the host key policy and the ordered caller-supplied extra flags.

use super::error::{Error, Result};
use crate::types::UserName;
use indexmap::IndexMap;
use serde::Deserialize;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};

/// Remote shell that reads the command text from stdin.
const REMOTE_SHELL: [&str; 3] = ["bash", "-s", "--"];

/// How the forked client treats the target's host key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// Only connect to hosts already present in known_hosts.
    #[default]
    Strict,
    /// Record unknown hosts on first contact, refuse changed keys.
    AcceptNew,
    /// Skip host key verification entirely. Every invocation logs a warning.
    Insecure,
}

impl HostKeyPolicy {
    /// The `StrictHostKeyChecking` option for this policy.
    pub fn flag(&self) -> &'static str {
        match self {
            HostKeyPolicy::Strict => "-oStrictHostKeyChecking=yes",
            HostKeyPolicy::AcceptNew => "-oStrictHostKeyChecking=accept-new",
            HostKeyPolicy::Insecure => "-oStrictHostKeyChecking=no",
        }
    }
}

impl fmt::Display for HostKeyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HostKeyPolicy::Strict => "strict",
            HostKeyPolicy::AcceptNew => "accept-new",
            HostKeyPolicy::Insecure => "insecure",
        };
        f.write_str(name)
    }
}

/// Extra ssh flags, appended in insertion order after the target host.
///
/// Each entry is a flag with an optional value; an empty value is treated
/// like no value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraFlags(IndexMap<String, Option<String>>);

impl ExtraFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a flag. Flags must start with `-` and may not contain NUL bytes.
    pub fn insert(
        &mut self,
        flag: impl Into<String>,
        value: Option<impl Into<String>>,
    ) -> Result<&mut Self> {
        let flag = flag.into();
        if !flag.starts_with('-') || flag.len() < 2 {
            return Err(Error::InvalidFlag {
                flag,
                reason: "flags must start with '-'",
            });
        }
        let value = value.map(Into::into);
        if flag.contains('\0') || value.as_deref().is_some_and(|v| v.contains('\0')) {
            return Err(Error::InvalidFlag {
                flag,
                reason: "flags may not contain NUL bytes",
            });
        }
        self.0.insert(flag, value);
        Ok(self)
    }

    /// Add a flag that takes no value.
    pub fn switch(&mut self, flag: impl Into<String>) -> Result<&mut Self> {
        self.insert(flag, None::<String>)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Flags and values flattened into arguments, skipping empty values.
    pub fn args(&self) -> impl Iterator<Item = &str> {
        self.0.iter().flat_map(|(flag, value)| {
            std::iter::once(flag.as_str()).chain(
                value
                    .as_deref()
                    .filter(|v| !v.is_empty())
                    .into_iter(),
            )
        })
    }
}

/// The `-L` flag forwarding `local_port` to `remote_host:remote_port`.
pub fn local_forward(local_port: u16, remote_host: &str, remote_port: u16) -> String {
    format!("-L{}:{}:{}", local_port, remote_host, remote_port)
}

/// One fully built ssh argument list.
#[derive(Debug, Clone)]
pub struct SshCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl SshCommand {
    /// Start an invocation with the fixed authentication prefix:
    /// quiet, identity, host key policy, batch mode, no keyboard-interactive,
    /// login user, target host.
    pub fn new(
        program: &Path,
        identity: &Path,
        host_keys: HostKeyPolicy,
        known_hosts_file: Option<&Path>,
        user: &UserName,
        host: &str,
    ) -> Self {
        let mut args: Vec<OsString> = vec!["-q".into(), "-i".into(), identity.into()];
        args.push(host_keys.flag().into());
        if let Some(path) = known_hosts_file {
            let mut opt = OsString::from("-oUserKnownHostsFile=");
            opt.push(path);
            args.push(opt);
        }
        args.push("-oBatchMode=yes".into());
        args.push("-oKbdInteractiveAuthentication=no".into());
        args.push("-l".into());
        args.push(user.as_str().into());
        args.push(host.into());

        Self {
            program: program.to_path_buf(),
            args,
        }
    }

    pub fn extra_flags(mut self, flags: &ExtraFlags) -> Self {
        self.args.extend(flags.args().map(OsString::from));
        self
    }

    /// Ask for a remote shell that runs whatever arrives on stdin.
    pub fn remote_shell(mut self) -> Self {
        self.args.extend(REMOTE_SHELL.iter().map(OsString::from));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    pub fn requests_shell(&self) -> bool {
        self.args.len() >= REMOTE_SHELL.len()
            && self.args[self.args.len() - REMOTE_SHELL.len()..]
                .iter()
                .zip(REMOTE_SHELL)
                .all(|(arg, expected)| arg == OsStr::new(expected))
    }

    /// Space-separated rendering for diagnostics.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(OsString::as_os_str))
            .map(|s| s.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub(crate) fn to_command(&self) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&self.program);
        command.args(&self.args);
        command
    }
}
