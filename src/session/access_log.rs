// ABOUTME: Access log entries written when a credentialed session ends.
// ABOUTME: Supports human-readable text lines and JSON lines on a dedicated tracing target.

use crate::types::{SessionId, UserName};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One ended portal session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEnded {
    pub user: UserName,
    pub session_id: SessionId,
    pub email: Option<String>,
    /// Time since the session's credential was issued.
    pub duration: Duration,
}

/// Receives one entry per ended session that held a credential.
#[async_trait]
pub trait AccessLog: Send + Sync {
    async fn session_ended(&self, entry: &SessionEnded);
}

/// Line format for [`TracingAccessLog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLogFormat {
    /// `User session ended for alice (1h 02m 03s) session=...`
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Writes access log entries at INFO on the `gangway::access` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAccessLog {
    format: AccessLogFormat,
}

impl TracingAccessLog {
    pub fn new(format: AccessLogFormat) -> Self {
        Self { format }
    }

    /// Render an entry in the configured format.
    ///
    /// A JSON entry that fails to serialize falls back to the text line.
    pub fn render(&self, entry: &SessionEnded) -> String {
        if self.format == AccessLogFormat::Json {
            let event = JsonEntry {
                event: "session_ended",
                user: entry.user.as_str(),
                session_id: entry.session_id.as_str(),
                email: entry.email.as_deref(),
                duration: format_duration(entry.duration),
                duration_secs: entry.duration.as_secs(),
            };
            if let Ok(json) = serde_json::to_string(&event) {
                return json;
            }
        }

        let mut line = format!(
            "User session ended for {} ({}) session={}",
            entry.user,
            format_duration(entry.duration),
            entry.session_id
        );
        if let Some(email) = &entry.email {
            line.push_str(" email=");
            line.push_str(email);
        }
        line
    }
}

#[async_trait]
impl AccessLog for TracingAccessLog {
    async fn session_ended(&self, entry: &SessionEnded) {
        tracing::info!(target: "gangway::access", "{}", self.render(entry));
    }
}

#[derive(Serialize)]
struct JsonEntry<'a> {
    event: &'a str,
    user: &'a str,
    session_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    duration: String,
    duration_secs: u64,
}

/// `42s`, `5m 07s`, `1h 02m 03s`, or `2d 03h 00m 00s` for longer sessions.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (days, hours, minutes, seconds) = (
        total / 86_400,
        (total / 3_600) % 24,
        (total / 60) % 60,
        total % 60,
    );
    if days > 0 {
        format!("{days}d {hours:02}h {minutes:02}m {seconds:02}s")
    } else if hours > 0 {
        format!("{hours}h {minutes:02}m {seconds:02}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}
