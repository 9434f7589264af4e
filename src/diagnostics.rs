// ABOUTME: Diagnostics accumulator for non-fatal warnings during session teardown.
// ABOUTME: Each warning names the session and the remote reference or tunnel that resisted release.

use crate::types::{RemoteSessionId, SessionId};
use std::fmt;

/// Collects non-fatal warnings during session teardown.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    /// Record a warning, auto-logging it via tracing.
    pub fn warn(&mut self, warning: Warning) {
        tracing::warn!("{}", warning);
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// A resource that teardown could not release cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub session_id: SessionId,
    pub resource: Resource,
    pub reason: String,
}

/// The session-owned resource a [`Warning`] is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    RemoteSession(RemoteSessionId),
    Tunnel { local_port: u16 },
}

impl Warning {
    pub fn remote_session_close(
        session_id: &SessionId,
        remote: &RemoteSessionId,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.clone(),
            resource: Resource::RemoteSession(remote.clone()),
            reason: reason.into(),
        }
    }

    pub fn tunnel_stop(session_id: &SessionId, local_port: u16, reason: impl Into<String>) -> Self {
        Self {
            session_id: session_id.clone(),
            resource: Resource::Tunnel { local_port },
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> WarningKind {
        match self.resource {
            Resource::RemoteSession(_) => WarningKind::RemoteSessionClose,
            Resource::Tunnel { .. } => WarningKind::TunnelStop,
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource {
            Resource::RemoteSession(remote) => write!(
                f,
                "Session {}: remote session {} was not closed: {}",
                self.session_id, remote, self.reason
            ),
            Resource::Tunnel { local_port } => write!(
                f,
                "Session {}: tunnel on local port {} was not stopped: {}",
                self.session_id, local_port, self.reason
            ),
        }
    }
}

/// Categories of warnings that can occur during teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// The remote session manager failed or timed out closing a reference.
    RemoteSessionClose,
    /// A tunnel process did not exit within the grace period after being stopped.
    TunnelStop,
}
