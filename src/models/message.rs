// Wire message models: push-channel envelope and REST snapshot body
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::job::JobStatus;

/// One push-channel message. The envelope carries a `type` tag; unknown tags
/// deserialize to `Unknown` and are dropped by the receiver, so newer servers
/// can add message kinds without breaking older clients.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelMessage {
    Status {
        status: JobStatus,
        completed_at: Option<DateTime<Utc>>,
        sequence: u64,
    },
    Progress {
        progress: Option<u8>,
        current_step: Option<u64>,
        current_epoch: Option<u64>,
        sequence: u64,
    },
    Log {
        text: String,
        sequence: u64,
    },
    Sample {
        reference: String,
        sequence: u64,
    },
    #[serde(other)]
    Unknown,
}

/// Body of `GET /jobs/{id}/status` — a full point-in-time snapshot of the
/// job's scalar state, used for the initial fetch and for polling catch-up.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusSnapshot {
    pub status: JobStatus,
    #[serde(default)]
    pub progress: u8,
    pub current_step: Option<u64>,
    pub current_epoch: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub config: Option<serde_json::Value>,
    #[serde(default)]
    pub sequence: u64,
}

/// Reconciler input, normalized from either source (channel or poll).
#[derive(Debug, Clone)]
pub enum SyncMessage {
    Snapshot(StatusSnapshot),
    StatusDelta {
        status: JobStatus,
        completed_at: Option<DateTime<Utc>>,
        sequence: u64,
    },
    ProgressDelta {
        progress: Option<u8>,
        current_step: Option<u64>,
        current_epoch: Option<u64>,
        sequence: u64,
    },
    LogLine {
        text: String,
        sequence: u64,
    },
    SampleArtifact {
        reference: String,
        sequence: u64,
    },
}

impl SyncMessage {
    /// Normalize a channel message. Returns `None` for unknown message types.
    pub fn from_channel(msg: ChannelMessage) -> Option<SyncMessage> {
        match msg {
            ChannelMessage::Status {
                status,
                completed_at,
                sequence,
            } => Some(SyncMessage::StatusDelta {
                status,
                completed_at,
                sequence,
            }),
            ChannelMessage::Progress {
                progress,
                current_step,
                current_epoch,
                sequence,
            } => Some(SyncMessage::ProgressDelta {
                progress,
                current_step,
                current_epoch,
                sequence,
            }),
            ChannelMessage::Log { text, sequence } => Some(SyncMessage::LogLine { text, sequence }),
            ChannelMessage::Sample {
                reference,
                sequence,
            } => Some(SyncMessage::SampleArtifact {
                reference,
                sequence,
            }),
            ChannelMessage::Unknown => None,
        }
    }
}
