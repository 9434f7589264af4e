// ABOUTME: Forked ssh client: one short-lived ssh process per request.
// ABOUTME: Materializes credentials, pipes commands via stdin, enforces the watchdog, captures output.

use super::command::{ExtraFlags, HostKeyPolicy, SshCommand};
use super::credential::{Credential, MaterializedCredential};
use super::error::{Error, ExecError, ExecFault, Result};
use super::watchdog::Watchdog;
use futures::future::join_all;
use parking_lot::Mutex;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// How long output pumps may keep draining after the process is gone.
const PUMP_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Configuration shared by every invocation a client makes.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// ssh executable, looked up on `PATH` when not absolute (default: `ssh`).
    pub binary: PathBuf,
    /// Host key verification policy (default: strict).
    pub host_key_policy: HostKeyPolicy,
    /// Optional known_hosts file passed as `UserKnownHostsFile`.
    pub known_hosts_file: Option<PathBuf>,
    /// Timeout used by [`ForkedClient::exec_with_timeout`] when none is given (default: 5 minutes).
    pub command_timeout: Duration,
    /// Where credentials are materialized. `None` uses the OS temp directory.
    pub temp_dir: Option<PathBuf>,
    /// Upper bound on concurrently running `exec` calls. `None` means unbounded.
    pub max_concurrent_execs: Option<usize>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ssh"),
            host_key_policy: HostKeyPolicy::default(),
            known_hosts_file: None,
            command_timeout: Duration::from_secs(300),
            temp_dir: None,
            max_concurrent_execs: None,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }

    pub fn known_hosts_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_file = Some(path.into());
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn temp_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(path.into());
        self
    }

    pub fn max_concurrent_execs(mut self, limit: usize) -> Self {
        self.max_concurrent_execs = Some(limit);
        self
    }
}

/// State shared between clients derived from one another.
#[derive(Debug)]
struct Shared {
    config: ClientConfig,
    exec_permits: Option<Semaphore>,
}

/// An ssh client that forks a fresh `ssh` process for every call.
///
/// Nothing is kept open between calls: each invocation writes the credential
/// to a private temp directory, runs, and removes it again.
#[derive(Debug, Clone)]
pub struct ForkedClient {
    credential: Arc<Credential>,
    shared: Arc<Shared>,
}

/// Output captured from one invocation.
struct Captured {
    output: String,
    fault: Option<ExecFault>,
}

impl ForkedClient {
    pub fn new(credential: Credential, config: ClientConfig) -> Self {
        let exec_permits = config.max_concurrent_execs.map(Semaphore::new);
        Self {
            credential: Arc::new(credential),
            shared: Arc::new(Shared {
                config,
                exec_permits,
            }),
        }
    }

    /// A client for another credential that shares this client's config and exec limit.
    pub fn for_credential(&self, credential: Credential) -> Self {
        Self {
            credential: Arc::new(credential),
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Run `remote_commands` with no extra flags.
    pub async fn exec_simple(&self, remote_commands: &str, watchdog: &Watchdog) -> Result<String> {
        self.exec(remote_commands, None, watchdog).await
    }

    /// Run `remote_commands` bounded by `timeout`, or the configured command timeout.
    pub async fn exec_with_timeout(
        &self,
        remote_commands: &str,
        timeout: Option<Duration>,
    ) -> Result<String> {
        let watchdog = Watchdog::new(timeout.unwrap_or(self.shared.config.command_timeout));
        self.exec(remote_commands, None, &watchdog).await
    }

    /// Execute a remote command and return combined stdout and stderr.
    ///
    /// When `remote_commands` is non-empty the remote side runs `bash -s --`
    /// and the text is written verbatim to its stdin; when empty no shell is
    /// requested and nothing is sent. A non-zero exit or a watchdog kill is
    /// returned as [`Error::Execution`] carrying the captured output.
    pub async fn exec(
        &self,
        remote_commands: &str,
        extra_flags: Option<&ExtraFlags>,
        watchdog: &Watchdog,
    ) -> Result<String> {
        let _permit = match &self.shared.exec_permits {
            Some(permits) => permits.acquire().await.ok(),
            None => None,
        };
        self.run(remote_commands, extra_flags, watchdog).await
    }

    /// One invocation, without taking an exec permit.
    pub(crate) async fn run(
        &self,
        remote_commands: &str,
        extra_flags: Option<&ExtraFlags>,
        watchdog: &Watchdog,
    ) -> Result<String> {
        let _finished = watchdog.finish_guard();
        let config = &self.shared.config;
        let credential = &self.credential;

        let gateway = credential.gateway();
        if gateway.is_empty() || gateway.starts_with('-') {
            return Err(Error::InvalidHost(gateway.to_string()));
        }

        let mut materialized = MaterializedCredential::create(credential, config.temp_dir.as_deref())?;

        let mut command = SshCommand::new(
            &config.binary,
            materialized.private_key_path(),
            config.host_key_policy,
            config.known_hosts_file.as_deref(),
            credential.user_name(),
            gateway,
        );
        if let Some(flags) = extra_flags {
            command = command.extra_flags(flags);
        }
        if !remote_commands.is_empty() {
            command = command.remote_shell();
        }

        if config.host_key_policy == HostKeyPolicy::Insecure {
            tracing::warn!(
                "Host key verification disabled for {}@{}",
                credential.user_name(),
                gateway
            );
        }

        let result = if watchdog.is_stopped() {
            Ok(Captured {
                output: String::new(),
                fault: Some(ExecFault::Stopped),
            })
        } else {
            invoke(&command, remote_commands, watchdog).await
        };

        if let Err(e) = materialized.release() {
            tracing::warn!("Failed to remove materialized credential: {}", e);
        }

        let captured = result?;
        match captured.fault {
            None => Ok(captured.output),
            Some(fault) => {
                let err = ExecError::new(
                    credential.user_name().as_str(),
                    command.command_line(),
                    remote_commands,
                    captured.output,
                    fault,
                );
                if fault == ExecFault::Stopped {
                    tracing::debug!("{}", err.log_line());
                } else {
                    tracing::error!("{}", err.log_line());
                }
                Err(err.into())
            }
        }
    }
}

/// Spawn the process, feed stdin, pump output, and wait for exit or the watchdog.
async fn invoke(command: &SshCommand, stdin_payload: &str, watchdog: &Watchdog) -> Result<Captured> {
    let mut cmd = command.to_command();
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if stdin_payload.is_empty() {
        cmd.stdin(Stdio::null());
    } else {
        cmd.stdin(Stdio::piped());
    }

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::BinaryNotFound(command.program().to_path_buf())
        } else {
            Error::Spawn(e)
        }
    })?;
    tracing::debug!(pid = child.id(), "Spawned {}", command.command_line());

    let buffer = Arc::new(Mutex::new(Vec::new()));
    let mut pumps: Vec<JoinHandle<()>> = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        pumps.push(tokio::spawn(pump(stdout, Arc::clone(&buffer))));
    }
    if let Some(stderr) = child.stderr.take() {
        pumps.push(tokio::spawn(pump(stderr, Arc::clone(&buffer))));
    }

    let feeder = child.stdin.take().map(|mut stdin| {
        let payload = stdin_payload.as_bytes().to_vec();
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&payload).await {
                tracing::debug!("Failed to write remote commands to ssh stdin: {}", e);
            }
            // Dropping stdin closes the pipe so the remote shell sees EOF.
            let _ = stdin.shutdown().await;
        })
    });

    let fault = tokio::select! {
        status = child.wait() => fault_from_status(status?),
        fault = watchdog.expired() => {
            tracing::debug!("Watchdog fired ({}), killing {}", fault, command.program().display());
            if let Err(e) = child.kill().await {
                tracing::warn!("Failed to kill ssh process: {}", e);
            }
            Some(fault)
        }
    };

    if tokio::time::timeout(PUMP_DRAIN_GRACE, join_all(pumps.iter_mut()))
        .await
        .is_err()
    {
        tracing::debug!("Output pipes still open after ssh exited, abandoning them");
    }
    for pump in &pumps {
        pump.abort();
    }
    if let Some(feeder) = feeder {
        feeder.abort();
    }

    let output = String::from_utf8_lossy(&buffer.lock()).into_owned();
    Ok(Captured { output, fault })
}

/// Copy everything from `reader` into the shared buffer until EOF.
async fn pump<R: AsyncRead + Unpin>(mut reader: R, sink: Arc<Mutex<Vec<u8>>>) {
    let mut buf = vec![0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => sink.lock().extend_from_slice(&buf[..n]),
            Err(e) => {
                tracing::debug!("Output pipe read error: {}", e);
                break;
            }
        }
    }
}

fn fault_from_status(status: ExitStatus) -> Option<ExecFault> {
    if status.success() {
        return None;
    }
    match (status.code(), status.signal()) {
        (Some(code), _) => Some(ExecFault::Exit(code)),
        (None, Some(signal)) => Some(ExecFault::Signal(signal)),
        (None, None) => Some(ExecFault::Exit(-1)),
    }
}
