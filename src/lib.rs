//! jobsync - live job-telemetry synchronizer
//!
//! Keeps a client-side view of one long-running server job (training run or
//! generation request) consistent and current. Updates arrive over a push
//! channel when it is healthy, over polling when it is not, and the
//! reconciler merges both into one canonical [`JobView`] with monotonic
//! progress and an append-only log/sample stream.

pub mod channel;
pub mod client;
pub mod error;
pub mod models;
pub mod session;
pub mod sync;

pub use channel::{ChannelManager, ChannelUpdate, ManagerState};
pub use client::{CommandClient, JobApi};
pub use error::{ApiError, CommandError, SessionError};
pub use models::{ChannelMessage, JobId, JobStatus, JobView, StatusSnapshot, SyncMessage};
pub use session::{JobSession, SessionConfig, SessionEvent};
pub use sync::{LogBuffer, SampleList, SampleRef, StateReconciler};
