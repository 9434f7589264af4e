// ABOUTME: Forked-process SSH execution with ephemeral certificate credentials.
// ABOUTME: Exposes the client, credential materialization, watchdog, and tunnel manager.

mod client;
mod command;
mod credential;
mod error;
mod tunnel;
mod watchdog;

pub use client::{ClientConfig, ForkedClient};
pub use command::{ExtraFlags, HostKeyPolicy, SshCommand, local_forward};
pub use credential::{CERTIFICATE_FILE, Credential, MaterializedCredential, PRIVATE_KEY_FILE};
pub use error::{Error, ErrorKind, ExecError, ExecFault, Result};
pub use tunnel::{Tunnel, TunnelManager};
pub use watchdog::Watchdog;
