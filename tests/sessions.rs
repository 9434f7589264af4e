// ABOUTME: Integration tests for the session registry and session teardown.
// ABOUTME: Uses recording collaborators to observe access logging and remote session closing.

mod support;

use async_trait::async_trait;
use gangway::diagnostics::{Resource, WarningKind};
use gangway::session::{
    AccessLog, RemoteSessionError, RemoteSessionManager, Session, SessionEnded, SessionError,
    SessionRegistry,
};
use gangway::ssh::TunnelManager;
use gangway::types::{RemoteSessionId, SessionId};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use support::fake_ssh::{FakeSsh, credential};

#[derive(Default)]
struct RecordingRemote {
    closed: Mutex<Vec<(RemoteSessionId, SessionId)>>,
    failing: Mutex<Vec<RemoteSessionId>>,
}

#[async_trait]
impl RemoteSessionManager for RecordingRemote {
    async fn end_session(
        &self,
        remote: &RemoteSessionId,
        owner: &Session,
    ) -> Result<(), RemoteSessionError> {
        // Yield so concurrent teardowns get a chance to interleave.
        tokio::task::yield_now().await;
        self.closed.lock().push((remote.clone(), owner.id().clone()));
        if self.failing.lock().contains(remote) {
            return Err(RemoteSessionError::new(remote.clone(), "connection refused"));
        }
        Ok(())
    }
}

#[derive(Default)]
struct RecordingAccessLog {
    entries: Mutex<Vec<SessionEnded>>,
}

#[async_trait]
impl AccessLog for RecordingAccessLog {
    async fn session_ended(&self, entry: &SessionEnded) {
        self.entries.lock().push(entry.clone());
    }
}

struct Fixture {
    registry: SessionRegistry,
    remote: Arc<RecordingRemote>,
    access: Arc<RecordingAccessLog>,
}

fn fixture() -> Fixture {
    let remote = Arc::new(RecordingRemote::default());
    let access = Arc::new(RecordingAccessLog::default());
    let registry = SessionRegistry::new(remote.clone(), access.clone());
    Fixture {
        registry,
        remote,
        access,
    }
}

/// Never answers a close request.
struct HangingRemote;

#[async_trait]
impl RemoteSessionManager for HangingRemote {
    async fn end_session(
        &self,
        _remote: &RemoteSessionId,
        _owner: &Session,
    ) -> Result<(), RemoteSessionError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

fn hanging_registry(access: Arc<RecordingAccessLog>) -> SessionRegistry {
    SessionRegistry::new(Arc::new(HangingRemote), access)
        .with_remote_close_timeout(Duration::from_millis(200))
}

/// Test: Destroying a credentialed session.
/// Expected: One access log entry, every remote reference closed, entry removed.
#[tokio::test]
async fn destroy_logs_access_and_closes_remote_sessions() {
    support::init_tracing();
    let f = fixture();
    let id = SessionId::new("web-1");
    let session = f.registry.session_created(id.clone());
    session.set_credential(credential());
    session.set_user_email("alice@example.org");
    session.add_remote_session(RemoteSessionId::new("vnc-1"));
    session.add_remote_session(RemoteSessionId::new("vnc-2"));

    let diagnostics = f.registry.session_destroyed(&id).await;

    assert!(!diagnostics.has_warnings());
    assert!(session.is_invalidated());
    assert!(f.registry.lookup(&id).is_none());

    let entries = f.access.entries.lock().clone();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].user.as_str(), "alice");
    assert_eq!(entries[0].session_id, id);
    assert_eq!(entries[0].email.as_deref(), Some("alice@example.org"));

    let mut closed: Vec<_> = f
        .remote
        .closed
        .lock()
        .iter()
        .map(|(remote, owner)| (remote.as_str().to_string(), owner.as_str().to_string()))
        .collect();
    closed.sort();
    assert_eq!(
        closed,
        vec![
            ("vnc-1".to_string(), "web-1".to_string()),
            ("vnc-2".to_string(), "web-1".to_string()),
        ]
    );
}

/// Test: A session without a credential ends silently.
#[tokio::test]
async fn destroy_without_credential_writes_no_access_entry() {
    let f = fixture();
    let id = SessionId::new("anon");
    f.registry.session_created(id.clone());

    f.registry.session_destroyed(&id).await;

    assert!(f.access.entries.lock().is_empty());
    assert!(f.registry.is_empty());
}

/// Test: Remote close failures become warnings and do not abort teardown.
#[tokio::test]
async fn remote_close_failure_is_a_warning() {
    let f = fixture();
    f.remote.failing.lock().push(RemoteSessionId::new("vnc-bad"));
    let id = SessionId::new("web-2");
    let session = f.registry.session_created(id.clone());
    session.add_remote_session(RemoteSessionId::new("vnc-bad"));
    session.add_remote_session(RemoteSessionId::new("vnc-good"));

    let diagnostics = f.registry.session_destroyed(&id).await;

    assert_eq!(diagnostics.warnings().len(), 1);
    let warning = &diagnostics.warnings()[0];
    assert_eq!(warning.kind(), WarningKind::RemoteSessionClose);
    assert_eq!(warning.session_id, id);
    assert_eq!(
        warning.resource,
        Resource::RemoteSession(RemoteSessionId::new("vnc-bad"))
    );
    assert!(warning.reason.contains("connection refused"));
    assert_eq!(f.remote.closed.lock().len(), 2);
    assert!(f.registry.lookup(&id).is_none());
}

/// Test: Two concurrent destroy notifications tear the session down once.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_destroy_runs_once() {
    let f = fixture();
    let id = SessionId::new("web-3");
    let session = f.registry.session_created(id.clone());
    session.set_credential(credential());
    session.add_remote_session(RemoteSessionId::new("vnc-1"));

    let (a, b) = tokio::join!(
        f.registry.session_destroyed(&id),
        f.registry.session_destroyed(&id)
    );

    assert!(!a.has_warnings() && !b.has_warnings());
    assert_eq!(f.remote.closed.lock().len(), 1);
    assert_eq!(f.access.entries.lock().len(), 1);
    assert!(f.registry.is_empty());
}

/// Test: Ending an unknown session is a no-op.
#[tokio::test]
async fn end_unknown_session_is_noop() {
    let f = fixture();
    f.registry.session_created(SessionId::new("known"));

    let diagnostics = f.registry.end_session(&SessionId::new("unknown")).await;

    assert!(!diagnostics.has_warnings());
    assert_eq!(f.registry.len(), 1);
}

/// Test: Ending a session by handle invalidates and removes it.
#[tokio::test]
async fn end_session_handle_removes_session() {
    let f = fixture();
    let id = SessionId::new("web-4");
    let session = f.registry.session_created(id.clone());

    f.registry.end_session_handle(&session).await;

    assert!(session.is_invalidated());
    assert!(matches!(
        f.registry.session(&id),
        Err(SessionError::NotFound { .. })
    ));
}

/// Test: Active sessions exclude invalidated ones.
#[tokio::test]
async fn active_sessions_exclude_invalidated() {
    let f = fixture();
    let live = f.registry.session_created(SessionId::new("live"));
    let dead = f.registry.session_created(SessionId::new("dead"));
    dead.invalidate();

    let active = f.registry.active_sessions();

    assert_eq!(active.len(), 1);
    assert!(active.contains(&live));
    assert!(!active.contains(&dead));
    assert_eq!(f.registry.len(), 2);
}

/// Test: A session id reused after teardown gets a fresh session.
#[tokio::test]
async fn recreated_session_is_fresh() {
    let f = fixture();
    let id = SessionId::new("web-5");
    let old = f.registry.session_created(id.clone());
    old.set_user_email("old@example.org");
    f.registry.session_destroyed(&id).await;

    let new = f.registry.session_created(id.clone());

    assert!(!new.ptr_eq(&old));
    assert!(!new.has_user_email());
    assert!(f.registry.session(&id).is_ok());
}

/// Test: Tunnels attached to a session are stopped when it ends.
#[tokio::test]
async fn teardown_stops_attached_tunnels() {
    let fake = FakeSsh::new();
    let manager = TunnelManager::new(fake.client());
    let f = fixture();
    let id = SessionId::new("web-6");
    let session = f.registry.session_created(id.clone());

    let tunnel = manager.start_tunnel(5901, 0).unwrap();
    assert!(session.attach_tunnel(tunnel.clone()));
    assert_eq!(session.tunnels().len(), 1);
    fake.wait_for_invocations(1).await;

    let diagnostics = f.registry.session_destroyed(&id).await;

    assert!(!diagnostics.has_warnings());
    assert!(!tunnel.is_running());
    assert!(session.tunnels().is_empty());
    tokio::time::timeout(Duration::from_secs(5), tunnel.wait_stopped())
        .await
        .expect("tunnel already finished");
}

/// Test: A remote manager that never answers.
/// Expected: The close times out into a warning and the session is still removed.
#[tokio::test]
async fn hanging_remote_close_times_out_into_warning() {
    let registry = hanging_registry(Arc::new(RecordingAccessLog::default()));
    let id = SessionId::new("web-7");
    let session = registry.session_created(id.clone());
    session.add_remote_session(RemoteSessionId::new("vnc-stuck"));

    let diagnostics = tokio::time::timeout(Duration::from_secs(5), registry.session_destroyed(&id))
        .await
        .expect("teardown is bounded");

    assert_eq!(diagnostics.warnings().len(), 1);
    assert_eq!(
        diagnostics.warnings()[0].resource,
        Resource::RemoteSession(RemoteSessionId::new("vnc-stuck"))
    );
    assert!(registry.lookup(&id).is_none());
}

/// Test: The caller gives up on a destroy while the remote manager hangs.
/// Expected: Teardown still finishes; a later destroy waits for it and finds the entry gone.
#[tokio::test]
async fn cancelled_destroy_still_completes() {
    let access = Arc::new(RecordingAccessLog::default());
    let registry = hanging_registry(access.clone());
    let id = SessionId::new("web-8");
    let session = registry.session_created(id.clone());
    session.set_credential(credential());
    session.add_remote_session(RemoteSessionId::new("vnc-stuck"));

    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), registry.session_destroyed(&id)).await;
    assert!(abandoned.is_err());
    assert!(session.is_invalidated());

    let retry = tokio::time::timeout(Duration::from_secs(5), registry.session_destroyed(&id))
        .await
        .expect("retry waits for the running teardown");

    assert!(!retry.has_warnings());
    assert!(registry.lookup(&id).is_none());
    assert!(registry.is_empty());
    assert_eq!(access.entries.lock().len(), 1);
    assert!(!registry.end_session(&id).await.has_warnings());
}

/// Test: A tunnel attached after its session was destroyed.
/// Expected: The session refuses it and the tunnel is stopped.
#[tokio::test]
async fn tunnel_attached_after_teardown_is_stopped() {
    let fake = FakeSsh::new();
    let manager = TunnelManager::new(fake.client());
    let f = fixture();
    let id = SessionId::new("web-9");
    let session = f.registry.session_created(id.clone());

    let tunnel = manager.start_tunnel(5901, 0).unwrap();
    f.registry.session_destroyed(&id).await;

    assert!(!session.attach_tunnel(tunnel.clone()));
    assert!(!tunnel.is_running());
    assert!(session.tunnels().is_empty());
    tokio::time::timeout(Duration::from_secs(5), tunnel.wait_stopped())
        .await
        .expect("refused tunnel finishes");
}

/// Test: A tunnel attached to an invalidated session that is not yet torn down.
#[tokio::test]
async fn tunnel_attached_to_invalidated_session_is_stopped() {
    let fake = FakeSsh::new();
    let manager = TunnelManager::new(fake.client());
    let f = fixture();
    let session = f.registry.session_created(SessionId::new("web-10"));
    session.invalidate();

    let tunnel = manager.start_tunnel(5901, 0).unwrap();

    assert!(!session.attach_tunnel(tunnel.clone()));
    assert!(!tunnel.is_running());
    tokio::time::timeout(Duration::from_secs(5), tunnel.wait_stopped())
        .await
        .expect("refused tunnel finishes");
}
