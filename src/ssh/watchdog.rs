// ABOUTME: Watchdog bounding the lifetime of one forked invocation.
// ABOUTME: Fires on timeout or explicit stop; the invocation is killed when it fires.

use super::error::ExecFault;
use std::time::Duration;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Bounds one invocation's wall-clock runtime and allows stopping it early.
///
/// A watchdog is armed from creation until the invocation it guards ends
/// or [`stop`](Self::stop) is called. Clones share state, so a clone kept by
/// a [`Tunnel`](super::Tunnel) observes and controls the background process.
/// Each watchdog guards a single invocation.
#[derive(Debug, Clone)]
pub struct Watchdog {
    limit: Option<Duration>,
    stop: CancellationToken,
    done: CancellationToken,
}

impl Watchdog {
    /// Kill the invocation after `limit`.
    pub fn new(limit: Duration) -> Self {
        Self::with_limit(Some(limit))
    }

    /// Never time out; only [`stop`](Self::stop) ends the invocation early.
    pub fn infinite() -> Self {
        Self::with_limit(None)
    }

    /// Whole seconds, where zero or negative means no limit.
    pub fn from_secs(secs: i64) -> Self {
        match u64::try_from(secs) {
            Ok(secs) if secs > 0 => Self::new(Duration::from_secs(secs)),
            _ => Self::infinite(),
        }
    }

    fn with_limit(limit: Option<Duration>) -> Self {
        Self {
            limit,
            stop: CancellationToken::new(),
            done: CancellationToken::new(),
        }
    }

    pub fn limit(&self) -> Option<Duration> {
        self.limit
    }

    /// True until the guarded invocation has ended or a stop was requested.
    pub fn is_watching(&self) -> bool {
        !self.stop.is_cancelled() && !self.done.is_cancelled()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Forcibly terminate the guarded invocation. Repeated calls do nothing.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Wait until the guarded invocation has fully ended.
    pub async fn finished(&self) {
        self.done.cancelled().await;
    }

    /// Resolves when the invocation must be killed. The timer starts on first poll.
    pub(crate) async fn expired(&self) -> ExecFault {
        let timer = async {
            match self.limit {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    limit
                }
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.stop.cancelled() => ExecFault::Stopped,
            limit = timer => ExecFault::TimedOut(limit),
        }
    }

    /// Marks the invocation finished when dropped, on every exit path.
    pub(crate) fn finish_guard(&self) -> DropGuard {
        self.done.clone().drop_guard()
    }
}
