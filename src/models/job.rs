// Job state data models
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque server-side identifier for one job. Immutable for the lifetime
/// of a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct JobId(pub String);

impl JobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        JobId(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    NotStarted,
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Stopped | JobStatus::Cancelled
        )
    }

    /// Whether a server-asserted transition from `self` to `next` is
    /// forward-valid. Self-loops are allowed (progress/log updates while
    /// running). A fresh `pending` after a non-completed terminal state is a
    /// restarted job lifecycle, not a regression.
    pub fn accepts_transition_to(self, next: JobStatus) -> bool {
        if self == next {
            return true;
        }
        match (self, next) {
            (JobStatus::NotStarted, _) => true,
            (JobStatus::Pending, JobStatus::Running) => true,
            (JobStatus::Pending, t) | (JobStatus::Running, t) if t.is_terminal() => true,
            (JobStatus::Failed | JobStatus::Stopped | JobStatus::Cancelled, JobStatus::Pending) => {
                true
            }
            _ => false,
        }
    }

    /// Whether moving from `self` to `next` starts a new job lifecycle
    /// (terminal back to pending, i.e. the job was re-run server-side).
    pub fn is_restart_to(self, next: JobStatus) -> bool {
        self.is_terminal() && next == JobStatus::Pending
    }
}

/// The canonical, reconciled view of one job exposed to subscribers.
///
/// Mutated only by the reconciler; everyone else sees immutable clones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobView {
    pub status: JobStatus,
    pub progress_percent: u8, // 0-100
    pub current_step: Option<u64>,
    pub current_epoch: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Server-echoed job configuration; set once, immutable after that.
    pub config: Option<serde_json::Value>,
    pub last_update_sequence: u64,
}

impl JobView {
    pub fn new() -> Self {
        Self {
            status: JobStatus::NotStarted,
            progress_percent: 0,
            current_step: None,
            current_epoch: None,
            started_at: None,
            completed_at: None,
            config: None,
            last_update_sequence: 0,
        }
    }
}

impl Default for JobView {
    fn default() -> Self {
        Self::new()
    }
}
