// ABOUTME: Per-session state owned by the registry.
// ABOUTME: Typed accessors for the user, credential, OAuth token, remote references, and tunnels.

use crate::ssh::{Credential, Tunnel};
use crate::types::{RemoteSessionId, SessionId};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::{CancellationToken, DropGuard};

/// Server-side state for one authenticated user's portal session.
///
/// Cloning is cheap and every clone refers to the same session. Equality and
/// hashing consider only the session id.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    id: SessionId,
    created_at: DateTime<Utc>,
    invalidated: AtomicBool,
    tearing_down: AtomicBool,
    torn_down: CancellationToken,
    state: RwLock<SessionState>,
}

#[derive(Default)]
struct SessionState {
    user_email: Option<String>,
    credential: Option<Credential>,
    oauth_access_token: Option<String>,
    remote_sessions: HashSet<RemoteSessionId>,
    tunnels: Vec<Tunnel>,
    tunnels_closed: bool,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        Self {
            inner: Arc::new(Inner {
                id,
                created_at: Utc::now(),
                invalidated: AtomicBool::new(false),
                tearing_down: AtomicBool::new(false),
                torn_down: CancellationToken::new(),
                state: RwLock::new(SessionState::default()),
            }),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.inner.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    pub fn user_email(&self) -> Option<String> {
        self.inner.state.read().user_email.clone()
    }

    pub fn set_user_email(&self, email: impl Into<String>) {
        self.inner.state.write().user_email = Some(email.into());
    }

    pub fn has_user_email(&self) -> bool {
        self.inner.state.read().user_email.is_some()
    }

    pub fn credential(&self) -> Option<Credential> {
        self.inner.state.read().credential.clone()
    }

    pub fn set_credential(&self, credential: Credential) {
        self.inner.state.write().credential = Some(credential);
    }

    pub fn has_credential(&self) -> bool {
        self.inner.state.read().credential.is_some()
    }

    pub fn oauth_access_token(&self) -> Option<String> {
        self.inner.state.read().oauth_access_token.clone()
    }

    pub fn set_oauth_access_token(&self, token: impl Into<String>) {
        self.inner.state.write().oauth_access_token = Some(token.into());
    }

    pub fn has_oauth_access_token(&self) -> bool {
        self.inner.state.read().oauth_access_token.is_some()
    }

    pub fn clear_oauth_access_token(&self) {
        self.inner.state.write().oauth_access_token = None;
    }

    /// Snapshot of the remote session references this session owns.
    pub fn remote_sessions(&self) -> HashSet<RemoteSessionId> {
        self.inner.state.read().remote_sessions.clone()
    }

    /// Returns false if the reference was already present.
    pub fn add_remote_session(&self, remote: RemoteSessionId) -> bool {
        self.inner.state.write().remote_sessions.insert(remote)
    }

    /// Returns false if the reference was not present.
    pub fn remove_remote_session(&self, remote: &RemoteSessionId) -> bool {
        self.inner.state.write().remote_sessions.remove(remote)
    }

    /// Tie a tunnel's lifetime to this session. Finished tunnels are pruned.
    ///
    /// An invalidated or torn down session refuses the tunnel and stops it;
    /// returns false in that case.
    pub fn attach_tunnel(&self, tunnel: Tunnel) -> bool {
        let mut state = self.inner.state.write();
        if state.tunnels_closed || self.is_invalidated() {
            drop(state);
            tracing::debug!(
                "Session {} has ended, stopping tunnel on local port {}",
                self.id(),
                tunnel.local_port()
            );
            tunnel.stop_tunnel();
            return false;
        }
        state.tunnels.retain(Tunnel::is_running);
        state.tunnels.push(tunnel);
        true
    }

    pub fn tunnels(&self) -> Vec<Tunnel> {
        self.inner.state.read().tunnels.clone()
    }

    /// Drain the attached tunnels; later attachments are refused.
    pub(crate) fn take_tunnels(&self) -> Vec<Tunnel> {
        let mut state = self.inner.state.write();
        state.tunnels_closed = true;
        std::mem::take(&mut state.tunnels)
    }

    /// Mark the session dead. Returns true only for the call that invalidated it.
    pub fn invalidate(&self) -> bool {
        !self.inner.invalidated.swap(true, Ordering::SeqCst)
    }

    pub fn is_invalidated(&self) -> bool {
        self.inner.invalidated.load(Ordering::SeqCst)
    }

    /// Claim the teardown. Only the first caller gets true.
    pub(crate) fn begin_teardown(&self) -> bool {
        !self.inner.tearing_down.swap(true, Ordering::SeqCst)
    }

    /// Marks the teardown finished when dropped.
    pub(crate) fn teardown_guard(&self) -> DropGuard {
        self.inner.torn_down.clone().drop_guard()
    }

    /// Resolves once the claimed teardown has finished.
    pub(crate) async fn torn_down(&self) {
        self.inner.torn_down.cancelled().await;
    }

    /// Whether both handles refer to the same session instance.
    pub fn ptr_eq(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("created_at", &self.inner.created_at)
            .field("invalidated", &self.is_invalidated())
            .finish_non_exhaustive()
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Session {}

impl Hash for Session {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}
