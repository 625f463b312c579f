use serde::{Deserialize, Serialize};

use livebuild_client::JobStatus;

/// Where a build session is in its lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Initializing,
    Streaming,
    Completed,
    Error,
}

impl SessionStatus {
    fn rank(self) -> u8 {
        match self {
            SessionStatus::Idle => 0,
            SessionStatus::Initializing => 1,
            SessionStatus::Streaming => 2,
            SessionStatus::Completed | SessionStatus::Error => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Initializing => "initializing",
            SessionStatus::Streaming => "streaming",
            SessionStatus::Completed => "completed",
            SessionStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Error)
    }

    /// Whether moving to `next` keeps the status machine monotonic.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        next.rank() > self.rank()
    }

    /// Session status implied by a job status reported by the backend.
    pub fn from_job(status: JobStatus) -> Self {
        match status {
            JobStatus::Completed => SessionStatus::Completed,
            JobStatus::Failed | JobStatus::Cancelled => SessionStatus::Error,
            JobStatus::Pending | JobStatus::Running | JobStatus::Unknown => {
                SessionStatus::Streaming
            }
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
