// ABOUTME: Collaborator that closes externally owned remote sessions.
// ABOUTME: The registry asks it to close every reference a session holds on teardown.

use super::error::RemoteSessionError;
use super::record::Session;
use crate::types::RemoteSessionId;
use async_trait::async_trait;

/// Closes remote (e.g. remote desktop) sessions owned by a portal session.
#[async_trait]
pub trait RemoteSessionManager: Send + Sync {
    /// Close `remote` on behalf of `owner`.
    async fn end_session(
        &self,
        remote: &RemoteSessionId,
        owner: &Session,
    ) -> Result<(), RemoteSessionError>;
}

/// A manager for deployments without remote sessions. Closing always succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRemoteSessions;

#[async_trait]
impl RemoteSessionManager for NoRemoteSessions {
    async fn end_session(
        &self,
        remote: &RemoteSessionId,
        _owner: &Session,
    ) -> Result<(), RemoteSessionError> {
        tracing::debug!("No remote session manager configured, ignoring {}", remote);
        Ok(())
    }
}
