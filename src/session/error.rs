// ABOUTME: Session error types with SNAFU pattern.
// ABOUTME: Distinguishes unknown sessions, invalidated sessions, and remote close failures.

use crate::types::{RemoteSessionId, SessionId};
use snafu::Snafu;

/// Errors from looking up sessions in the registry.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SessionError {
    #[snafu(display("session {id} not found"))]
    NotFound { id: SessionId },

    #[snafu(display("session {id} has been invalidated"))]
    Invalidated { id: SessionId },
}

impl SessionError {
    /// The session the error refers to.
    pub fn session_id(&self) -> &SessionId {
        match self {
            SessionError::NotFound { id } | SessionError::Invalidated { id } => id,
        }
    }
}

/// A remote session manager failed to close one of a session's references.
#[derive(Debug, Snafu)]
#[snafu(display("failed to close remote session {remote}: {message}"))]
pub struct RemoteSessionError {
    remote: RemoteSessionId,
    message: String,
}

impl RemoteSessionError {
    pub fn new(remote: RemoteSessionId, message: impl Into<String>) -> Self {
        RemoteSessionSnafu {
            remote,
            message: message.into(),
        }
        .build()
    }

    pub fn remote(&self) -> &RemoteSessionId {
        &self.remote
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
