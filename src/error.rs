// Error taxonomy for the synchronizer
use thiserror::Error;

use crate::models::JobStatus;

/// Failure of one point request against the job service. The client never
/// retries; recovery policy lives with the caller (poll next tick, backoff,
/// or surface to the user).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("authentication rejected (status {0})")]
    Auth(u16),
    #[error("job not found")]
    NotFound,
    #[error("server rejected request ({status}): {detail}")]
    Server { status: u16, detail: String },
}

impl ApiError {
    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Auth(_))
    }
}

/// Conditions that make further synchronization meaningless. Everything
/// else is absorbed and retried internally.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("authentication rejected; synchronization stopped")]
    Auth,
    #[error("job deleted on server")]
    JobDeleted,
    #[error("job state unknown: server lost the job before any state was received")]
    UnknownJobState,
}

/// Failure of an explicit user command (stop, download). Scoped to that
/// command only; the synchronization stream is unaffected.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command not valid while job is {0:?}")]
    InvalidState(JobStatus),
    #[error("session already disposed")]
    Disposed,
    #[error(transparent)]
    Api(#[from] ApiError),
}
