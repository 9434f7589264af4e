// ABOUTME: Portal session state and the registry that owns it.
// ABOUTME: Guarantees credentials, remote references, and tunnels are released when a session ends.

mod access_log;
mod error;
mod record;
mod registry;
mod remote;

pub use access_log::{AccessLog, AccessLogFormat, SessionEnded, TracingAccessLog, format_duration};
pub use error::{RemoteSessionError, SessionError};
pub use record::Session;
pub use registry::SessionRegistry;
pub use remote::{NoRemoteSessions, RemoteSessionManager};
