//! Run lifecycle and the server status codes that drive it.

use std::fmt;

use serde::Serialize;

/// Why a run ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureDetail {
    /// The submission response carried no result id for this run.
    MissingResult,
    Transport(String),
    UnexpectedStatus(i32),
}

impl fmt::Display for FailureDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureDetail::MissingResult => write!(f, "server returned no result id"),
            FailureDetail::Transport(message) => write!(f, "{message}"),
            FailureDetail::UnexpectedStatus(code) => write!(f, "unexpected status code {code}"),
        }
    }
}

/// State of one run. `Completed` and `Failed` are absorbing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "failure", rename_all = "snake_case")]
pub enum RunLifecycle {
    Configuring,
    Submitted,
    Running,
    Stopping,
    Saving,
    Completed,
    Failed(FailureDetail),
}

impl RunLifecycle {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunLifecycle::Completed | RunLifecycle::Failed(_))
    }

    /// Submitted and not yet terminal: a poll task belongs to this run.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RunLifecycle::Submitted
                | RunLifecycle::Running
                | RunLifecycle::Stopping
                | RunLifecycle::Saving
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunLifecycle::Configuring => "configuring",
            RunLifecycle::Submitted => "submitted",
            RunLifecycle::Running => "running",
            RunLifecycle::Stopping => "stopping",
            RunLifecycle::Saving => "saving",
            RunLifecycle::Completed => "completed",
            RunLifecycle::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for RunLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunLifecycle::Failed(detail) => write!(f, "failed ({detail})"),
            other => f.write_str(other.label()),
        }
    }
}

/// Status code reported by the progress endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Queued,
    Running,
    Saving,
    Completed,
    Unknown(i32),
}

impl From<i32> for ServerStatus {
    fn from(code: i32) -> Self {
        match code {
            0 => ServerStatus::Queued,
            2 => ServerStatus::Running,
            3 => ServerStatus::Saving,
            5 => ServerStatus::Completed,
            other => ServerStatus::Unknown(other),
        }
    }
}

impl ServerStatus {
    pub fn lifecycle(self) -> RunLifecycle {
        match self {
            ServerStatus::Queued => RunLifecycle::Submitted,
            ServerStatus::Running => RunLifecycle::Running,
            ServerStatus::Saving => RunLifecycle::Saving,
            ServerStatus::Completed => RunLifecycle::Completed,
            ServerStatus::Unknown(code) => {
                RunLifecycle::Failed(FailureDetail::UnexpectedStatus(code))
            }
        }
    }

    /// Polling stops after this status.
    pub fn is_final(self) -> bool {
        self.lifecycle().is_terminal()
    }
}
