// ABOUTME: Process-wide registry of portal sessions keyed by session id.
// ABOUTME: Tears sessions down: access log entry, remote references closed, tunnels stopped, entry removed.

use super::access_log::{AccessLog, SessionEnded};
use super::error::{InvalidatedSnafu, NotFoundSnafu, SessionError};
use super::record::Session;
use super::remote::RemoteSessionManager;
use crate::diagnostics::{Diagnostics, Warning};
use crate::types::SessionId;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// How long teardown waits for a stopped tunnel's process to exit.
const TUNNEL_STOP_GRACE: Duration = Duration::from_secs(5);

/// Default bound on one `RemoteSessionManager::end_session` call.
const REMOTE_CLOSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Thread-safe map of live sessions.
///
/// The hosting environment reports lifecycle events through
/// [`session_created`](Self::session_created) and
/// [`session_destroyed`](Self::session_destroyed); request handlers look
/// sessions up and may end them early with [`end_session`](Self::end_session).
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<SessionId, Session>>>,
    remote_sessions: Arc<dyn RemoteSessionManager>,
    access_log: Arc<dyn AccessLog>,
    remote_close_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(
        remote_sessions: Arc<dyn RemoteSessionManager>,
        access_log: Arc<dyn AccessLog>,
    ) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            remote_sessions,
            access_log,
            remote_close_timeout: REMOTE_CLOSE_TIMEOUT,
        }
    }

    /// Give up on a remote reference the manager has not closed within `timeout`.
    pub fn with_remote_close_timeout(mut self, timeout: Duration) -> Self {
        self.remote_close_timeout = timeout;
        self
    }

    /// Register a new session. A live session with the same id is returned as is.
    pub fn session_created(&self, id: SessionId) -> Session {
        let mut sessions = self.sessions.write();
        if let Some(existing) = sessions.get(&id).filter(|s| !s.is_invalidated()).cloned() {
            return existing;
        }
        tracing::debug!("Session {} created", id);
        let session = Session::new(id.clone());
        sessions.insert(id, session.clone());
        session
    }

    /// Tear down the session `id`. Unknown ids produce empty diagnostics.
    pub async fn session_destroyed(&self, id: &SessionId) -> Diagnostics {
        match self.lookup(id) {
            Some(session) => self.tear_down(&session).await,
            None => {
                tracing::debug!("Destroy notification for unknown session {}", id);
                Diagnostics::default()
            }
        }
    }

    /// The registered session, invalidated or not.
    pub fn lookup(&self, id: &SessionId) -> Option<Session> {
        self.sessions.read().get(id).cloned()
    }

    /// The registered session if it is still live.
    pub fn session(&self, id: &SessionId) -> Result<Session, SessionError> {
        let session = self
            .lookup(id)
            .ok_or_else(|| NotFoundSnafu { id: id.clone() }.build())?;
        if session.is_invalidated() {
            return InvalidatedSnafu { id: id.clone() }.fail();
        }
        Ok(session)
    }

    /// Invalidate and tear down the session `id`. Unknown ids are ignored.
    pub async fn end_session(&self, id: &SessionId) -> Diagnostics {
        match self.lookup(id) {
            Some(session) => self.end_session_handle(&session).await,
            None => Diagnostics::default(),
        }
    }

    /// Invalidate and tear down `session`.
    pub async fn end_session_handle(&self, session: &Session) -> Diagnostics {
        self.tear_down(session).await
    }

    /// Snapshot of sessions that have not been invalidated.
    pub fn active_sessions(&self) -> HashSet<Session> {
        self.sessions
            .read()
            .values()
            .filter(|s| !s.is_invalidated())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Claim and run the teardown of `session`.
    ///
    /// The work runs on its own task, so dropping the returned future does
    /// not leave the session half torn down. Callers that lose the claim wait
    /// for the running teardown and get empty diagnostics.
    async fn tear_down(&self, session: &Session) -> Diagnostics {
        if !session.begin_teardown() {
            tracing::debug!("Session {} is already being torn down", session.id());
            session.torn_down().await;
            return Diagnostics::default();
        }
        session.invalidate();

        let finished = session.teardown_guard();
        let registry = self.clone();
        let owned = session.clone();
        let task = tokio::spawn(async move {
            let _finished = finished;
            registry.release(&owned).await
        });

        match task.await {
            Ok(diagnostics) => diagnostics,
            Err(e) => {
                tracing::error!("Teardown of session {} failed: {}", session.id(), e);
                self.remove(session);
                Diagnostics::default()
            }
        }
    }

    async fn release(&self, session: &Session) -> Diagnostics {
        let mut diagnostics = Diagnostics::default();

        if let Some(credential) = session.credential() {
            let entry = SessionEnded {
                user: credential.user_name().clone(),
                session_id: session.id().clone(),
                email: session.user_email(),
                duration: credential.age(),
            };
            self.access_log.session_ended(&entry).await;
        }

        for remote in session.remote_sessions() {
            let closing = self.remote_sessions.end_session(&remote, session);
            match tokio::time::timeout(self.remote_close_timeout, closing).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => diagnostics.warn(Warning::remote_session_close(
                    session.id(),
                    &remote,
                    e.to_string(),
                )),
                Err(_) => diagnostics.warn(Warning::remote_session_close(
                    session.id(),
                    &remote,
                    format!("no answer within {:?}", self.remote_close_timeout),
                )),
            }
        }

        for tunnel in session.take_tunnels() {
            tunnel.stop_tunnel();
            if tokio::time::timeout(TUNNEL_STOP_GRACE, tunnel.wait_stopped())
                .await
                .is_err()
            {
                diagnostics.warn(Warning::tunnel_stop(
                    session.id(),
                    tunnel.local_port(),
                    format!("process did not exit within {:?}", TUNNEL_STOP_GRACE),
                ));
            }
        }

        self.remove(session);
        tracing::debug!("Session {} destroyed", session.id());
        diagnostics
    }

    /// Drop the map entry if it still refers to this session instance.
    fn remove(&self, session: &Session) {
        let mut sessions = self.sessions.write();
        if sessions
            .get(session.id())
            .is_some_and(|current| current.ptr_eq(session))
        {
            sessions.remove(session.id());
        }
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .finish_non_exhaustive()
    }
}
