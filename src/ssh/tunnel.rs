// ABOUTME: Local port forwarding through a background ssh process.
// ABOUTME: Allocates a loopback port, starts `ssh -L`, and exposes a handle to stop it.

use super::client::ForkedClient;
use super::command::{ExtraFlags, local_forward};
use super::error::{Error, ExecFault, Result};
use super::watchdog::Watchdog;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::net::{Ipv4Addr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::runtime::Handle;

/// Remote command that keeps the forwarding session open.
const KEEPALIVE_COMMAND: &str = "sleep infinity";

/// Attempts at finding a loopback port no other tunnel in this process holds.
const PORT_ATTEMPTS: usize = 16;

/// Ports handed to tunnels that are still running.
static RESERVED_PORTS: Mutex<BTreeSet<u16>> = Mutex::new(BTreeSet::new());

/// Handle to a running (or finished) tunnel.
///
/// Cloning is cheap; every clone controls the same background process.
#[derive(Debug, Clone)]
pub struct Tunnel {
    local_port: u16,
    remote_host: String,
    remote_port: u16,
    watchdog: Watchdog,
}

impl Tunnel {
    /// Loopback port accepting forwarded connections.
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn remote_host(&self) -> &str {
        &self.remote_host
    }

    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    /// True until the ssh process has exited or the tunnel was stopped.
    pub fn is_running(&self) -> bool {
        self.watchdog.is_watching()
    }

    /// Kill the ssh process. Safe to call repeatedly or after it already ended.
    pub fn stop_tunnel(&self) {
        if self.watchdog.is_watching() {
            tracing::debug!("Stopping tunnel on local port {}", self.local_port);
        }
        self.watchdog.stop();
    }

    /// Wait until the background ssh process has fully ended.
    pub async fn wait_stopped(&self) {
        self.watchdog.finished().await;
    }
}

/// Starts tunnels for one credential.
#[derive(Debug, Clone)]
pub struct TunnelManager {
    client: ForkedClient,
    runtime: Option<Handle>,
    max_tunnels: Option<usize>,
    active: Arc<AtomicUsize>,
}

impl TunnelManager {
    pub fn new(client: ForkedClient) -> Self {
        Self {
            client,
            runtime: None,
            max_tunnels: None,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Run tunnel processes on `runtime` instead of the caller's runtime.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Refuse new tunnels while this many are running.
    pub fn max_tunnels(mut self, limit: Option<usize>) -> Self {
        self.max_tunnels = limit;
        self
    }

    pub fn active_tunnels(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Forward a fresh loopback port to `remote_port` on the credential's
    /// remote host, through its gateway.
    ///
    /// Returns as soon as the background task is spawned; the tunnel reports
    /// running immediately. `max_uptime_secs` of zero or less means the
    /// tunnel lives until stopped. Needs a runtime: the one given to
    /// [`with_runtime`](Self::with_runtime), else the caller's.
    pub fn start_tunnel(&self, remote_port: u16, max_uptime_secs: i64) -> Result<Tunnel> {
        let runtime = match &self.runtime {
            Some(runtime) => runtime.clone(),
            None => Handle::try_current().map_err(|_| Error::NoRuntime)?,
        };
        let slot = self.claim_slot()?;
        let reservation = PortReservation::acquire()?;
        let local_port = reservation.port;
        let remote_host = self.client.credential().remote_host().to_string();

        let mut flags = ExtraFlags::new();
        flags
            .switch(local_forward(local_port, &remote_host, remote_port))?
            .switch("-oExitOnForwardFailure=yes")?;

        let watchdog = Watchdog::from_secs(max_uptime_secs);
        let tunnel = Tunnel {
            local_port,
            remote_host,
            remote_port,
            watchdog: watchdog.clone(),
        };

        tracing::info!(
            "Starting tunnel localhost:{} -> {}:{} via {}",
            local_port,
            tunnel.remote_host,
            remote_port,
            self.client.credential().gateway()
        );

        let client = self.client.clone();
        let task = async move {
            let _slot = slot;
            let _reservation = reservation;
            match client.run(KEEPALIVE_COMMAND, Some(&flags), &watchdog).await {
                Ok(_) => tracing::info!("Tunnel on local port {} closed", local_port),
                Err(e) => match e.as_exec().map(|exec| exec.fault()) {
                    Some(ExecFault::Stopped) => {
                        tracing::debug!("Tunnel on local port {} stopped", local_port)
                    }
                    Some(ExecFault::TimedOut(limit)) => tracing::info!(
                        "Tunnel on local port {} reached its maximum uptime of {:?}",
                        local_port,
                        limit
                    ),
                    _ => tracing::warn!("Tunnel on local port {} failed: {}", local_port, e),
                },
            }
        };
        runtime.spawn(task);

        Ok(tunnel)
    }

    fn claim_slot(&self) -> Result<TunnelSlot> {
        let limit = self.max_tunnels.unwrap_or(usize::MAX);
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < limit).then_some(n + 1)
            })
            .map_err(Error::TunnelLimit)?;
        Ok(TunnelSlot(Arc::clone(&self.active)))
    }
}

/// Counts one running tunnel until dropped.
struct TunnelSlot(Arc<AtomicUsize>);

impl Drop for TunnelSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A loopback port reserved for one tunnel in this process.
struct PortReservation {
    port: u16,
}

impl PortReservation {
    /// Bind port 0 to let the OS pick, release it, and remember the number.
    ///
    /// Another process may still claim the port before ssh binds it; ssh
    /// then exits because of `ExitOnForwardFailure` and the tunnel ends.
    fn acquire() -> Result<Self> {
        for _ in 0..PORT_ATTEMPTS {
            let listener =
                TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).map_err(Error::PortAllocation)?;
            let port = listener.local_addr().map_err(Error::PortAllocation)?.port();
            drop(listener);

            if RESERVED_PORTS.lock().insert(port) {
                return Ok(Self { port });
            }
        }
        Err(Error::PortAllocation(std::io::Error::new(
            std::io::ErrorKind::AddrInUse,
            "no free loopback port after repeated attempts",
        )))
    }
}

impl Drop for PortReservation {
    fn drop(&mut self) {
        RESERVED_PORTS.lock().remove(&self.port);
    }
}
