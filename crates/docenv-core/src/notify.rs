//! User-facing notifications and process output.
//!
//! Notifications are the only channel through which an operation reports its
//! outcome to the user. Output lines are the streamed stdout/stderr of the
//! external commands, tagged with the job that produced them.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stream {
    Stdout,
    Stderr,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, level: Level, message: &str);

    /// One line of output from the external command running as `job`.
    fn output(&self, job: &str, stream: Stream, line: &str) {
        tracing::debug!(job, ?stream, "{line}");
    }
}
