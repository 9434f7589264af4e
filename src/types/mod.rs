// ABOUTME: Type-safe identifiers and validated domain types.
// ABOUTME: Uses phantom types to prevent ID confusion at compile time.

mod id;
mod user_name;

pub use id::{Id, RemoteSessionId, SessionId};
pub use user_name::{UserName, UserNameError};
