// ABOUTME: Library root for gangway: ephemeral-credential ssh execution, tunnels, and portal sessions.
// ABOUTME: Each remote operation forks a fresh ssh process; nothing is pooled between calls.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod logging;
pub mod session;
pub mod ssh;
pub mod types;
