// State reconciliation: fold snapshots and deltas into one canonical JobView
use std::collections::{HashSet, VecDeque};

use chrono::Utc;
use log::{debug, warn};

use crate::models::{JobStatus, JobView, StatusSnapshot, SyncMessage};
use crate::sync::buffers::{LogBuffer, SampleList, SampleRef};

/// How many recently seen log/sample sequences are remembered for
/// deduplication. Bounded so memory stays flat over a long-lived job;
/// duplicates older than the window would have been evicted from the
/// buffers anyway.
const SEEN_WINDOW: usize = 1024;

/// Sliding window of recently observed sequence numbers.
#[derive(Debug)]
struct SeenWindow {
    order: VecDeque<u64>,
    seen: HashSet<u64>,
}

impl SeenWindow {
    fn new() -> Self {
        Self {
            order: VecDeque::with_capacity(SEEN_WINDOW),
            seen: HashSet::with_capacity(SEEN_WINDOW),
        }
    }

    /// Records `sequence`; returns false if it was already in the window.
    fn insert(&mut self, sequence: u64) -> bool {
        if !self.seen.insert(sequence) {
            return false;
        }
        if self.order.len() == SEEN_WINDOW {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        self.order.push_back(sequence);
        true
    }
}

/// What an accepted message changed. `None` from [`StateReconciler::apply`]
/// means the message was rejected (stale, duplicate, or invalid) and nothing
/// observable changed.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    View(JobView),
    Log(String),
    Sample(SampleRef),
}

/// Folds incoming snapshot and delta messages into one canonical [`JobView`]
/// plus the two telemetry buffers. Scalar ordering across sources is resolved
/// by the message `sequence`; log/sample streams are deduplicated through a
/// bounded seen-sequence window.
pub struct StateReconciler {
    view: JobView,
    logs: LogBuffer,
    samples: SampleList,
    seen_logs: SeenWindow,
    seen_samples: SeenWindow,
    /// Lines already consumed from one-shot log dumps (degraded-mode
    /// polling fallback); dumps are cumulative so only the tail is new.
    dump_lines_consumed: usize,
}

impl StateReconciler {
    pub fn new(log_capacity: usize, sample_capacity: usize) -> Self {
        Self {
            view: JobView::new(),
            logs: LogBuffer::new(log_capacity),
            samples: SampleList::new(sample_capacity),
            seen_logs: SeenWindow::new(),
            seen_samples: SeenWindow::new(),
            dump_lines_consumed: 0,
        }
    }

    pub fn view(&self) -> &JobView {
        &self.view
    }

    pub fn logs(&self) -> &LogBuffer {
        &self.logs
    }

    pub fn samples(&self) -> &SampleList {
        &self.samples
    }

    /// Applies one message; returns what changed, or `None` if the message
    /// was rejected. Rejection is never an error: stale and duplicate
    /// messages are expected whenever channel and poll sources overlap.
    pub fn apply(&mut self, message: SyncMessage) -> Option<Applied> {
        match message {
            SyncMessage::Snapshot(snapshot) => self.apply_snapshot(snapshot),
            SyncMessage::StatusDelta {
                status,
                completed_at,
                sequence,
            } => self.apply_status_delta(status, completed_at, sequence),
            SyncMessage::ProgressDelta {
                progress,
                current_step,
                current_epoch,
                sequence,
            } => self.apply_progress_delta(progress, current_step, current_epoch, sequence),
            SyncMessage::LogLine { text, sequence } => {
                if !self.seen_logs.insert(sequence) {
                    debug!("Duplicate log line (sequence {}) dropped", sequence);
                    return None;
                }
                self.logs.append(text.clone());
                Some(Applied::Log(text))
            }
            SyncMessage::SampleArtifact {
                reference,
                sequence,
            } => {
                if !self.seen_samples.insert(sequence) {
                    debug!("Duplicate sample (sequence {}) dropped", sequence);
                    return None;
                }
                Some(Applied::Sample(self.samples.append(reference)))
            }
        }
    }

    /// Snapshots are authoritative catch-ups: accepted when their sequence is
    /// not behind the view, replacing all scalar fields (subject to the
    /// monotonicity clamps below).
    fn apply_snapshot(&mut self, snapshot: StatusSnapshot) -> Option<Applied> {
        if snapshot.sequence < self.view.last_update_sequence {
            debug!(
                "Stale snapshot (sequence {} < {}) ignored",
                snapshot.sequence, self.view.last_update_sequence
            );
            return None;
        }

        let prev = self.view.clone();
        let restart = prev.status.is_restart_to(snapshot.status);

        if prev.status.is_terminal() && !restart && snapshot.status != prev.status {
            warn!(
                "Snapshot asserts {:?} after terminal {:?}; keeping terminal status",
                snapshot.status, prev.status
            );
            self.view.last_update_sequence = snapshot.sequence;
            return None;
        }

        self.view.status = snapshot.status;
        if restart {
            // New lifecycle: counters and timestamps start over.
            self.view.progress_percent = 0;
            self.view.current_step = None;
            self.view.current_epoch = None;
            self.view.started_at = None;
            self.view.completed_at = None;
            self.dump_lines_consumed = 0;
        }

        let clamp = prev.status == JobStatus::Running && snapshot.status == JobStatus::Running;
        self.view.progress_percent = if clamp && !restart {
            snapshot.progress.min(100).max(prev.progress_percent)
        } else {
            snapshot.progress.min(100)
        };
        self.view.current_step = merge_counter(self.view.current_step, snapshot.current_step, clamp);
        self.view.current_epoch =
            merge_counter(self.view.current_epoch, snapshot.current_epoch, clamp);

        if let Some(started) = snapshot.started_at {
            self.view.started_at = Some(started);
        }
        if self.view.status.is_terminal() && self.view.completed_at.is_none() {
            self.view.completed_at = snapshot.completed_at;
        }
        if self.view.config.is_none() {
            self.view.config = snapshot.config;
        }
        self.view.last_update_sequence = snapshot.sequence;

        if self.view == prev {
            None
        } else {
            Some(Applied::View(self.view.clone()))
        }
    }

    fn apply_status_delta(
        &mut self,
        status: JobStatus,
        completed_at: Option<chrono::DateTime<Utc>>,
        sequence: u64,
    ) -> Option<Applied> {
        if sequence <= self.view.last_update_sequence {
            debug!(
                "Stale status delta (sequence {} <= {}) ignored",
                sequence, self.view.last_update_sequence
            );
            return None;
        }
        if !self.view.status.accepts_transition_to(status) {
            warn!(
                "Invalid status transition {:?} -> {:?} dropped (sequence {})",
                self.view.status, status, sequence
            );
            return None;
        }
        if status == self.view.status {
            self.view.last_update_sequence = sequence;
            return None;
        }

        let restart = self.view.status.is_restart_to(status);
        self.view.status = status;
        if restart {
            self.view.progress_percent = 0;
            self.view.current_step = None;
            self.view.current_epoch = None;
            self.view.started_at = None;
            self.view.completed_at = None;
            self.dump_lines_consumed = 0;
        } else if status.is_terminal() && self.view.completed_at.is_none() {
            self.view.completed_at = completed_at;
        }
        self.view.last_update_sequence = sequence;
        Some(Applied::View(self.view.clone()))
    }

    fn apply_progress_delta(
        &mut self,
        progress: Option<u8>,
        current_step: Option<u64>,
        current_epoch: Option<u64>,
        sequence: u64,
    ) -> Option<Applied> {
        if sequence <= self.view.last_update_sequence {
            debug!(
                "Stale progress delta (sequence {} <= {}) ignored",
                sequence, self.view.last_update_sequence
            );
            return None;
        }
        if self.view.status.is_terminal() {
            debug!(
                "Progress delta after terminal {:?} dropped (sequence {})",
                self.view.status, sequence
            );
            return None;
        }

        let prev = self.view.clone();
        if let Some(p) = progress {
            let p = p.min(100);
            if p < self.view.progress_percent {
                debug!(
                    "Progress regression {} -> {} ignored (sequence {})",
                    self.view.progress_percent, p, sequence
                );
            } else {
                self.view.progress_percent = p;
            }
        }
        self.view.current_step = merge_counter(self.view.current_step, current_step, true);
        self.view.current_epoch = merge_counter(self.view.current_epoch, current_epoch, true);
        self.view.last_update_sequence = sequence;

        if self.view.progress_percent == prev.progress_percent
            && self.view.current_step == prev.current_step
            && self.view.current_epoch == prev.current_epoch
        {
            None
        } else {
            Some(Applied::View(self.view.clone()))
        }
    }

    /// Appends the not-yet-seen tail of a one-shot log dump (`GET
    /// /jobs/{id}/logs`). Dumps are cumulative from the start of the job, so
    /// a position counter tracks how far previous dumps reached. Used only as
    /// a polling fallback while channel log delivery is down.
    pub fn apply_log_dump(&mut self, dump: &str) -> Vec<String> {
        let mut appended = Vec::new();
        for (index, line) in dump.lines().enumerate() {
            if index < self.dump_lines_consumed {
                continue;
            }
            self.logs.append(line.to_string());
            appended.push(line.to_string());
        }
        self.dump_lines_consumed = self.dump_lines_consumed.max(dump.lines().count());
        appended
    }

    /// Forces the view into a terminal status outside the normal message
    /// flow. Used when polling confirms the job no longer exists server-side
    /// (404) and a failure must be inferred client-side.
    pub fn force_terminal(&mut self, status: JobStatus) -> Option<JobView> {
        if self.view.status.is_terminal() {
            return None;
        }
        self.view.status = status;
        if self.view.completed_at.is_none() {
            self.view.completed_at = Some(Utc::now());
        }
        Some(self.view.clone())
    }
}

/// Monotone merge for step/epoch counters: while running, a lower value is a
/// reordering artifact and is ignored.
fn merge_counter(current: Option<u64>, incoming: Option<u64>, clamp: bool) -> Option<u64> {
    match (current, incoming) {
        (cur, None) => cur,
        (None, Some(new)) => Some(new),
        (Some(cur), Some(new)) => {
            if clamp {
                Some(cur.max(new))
            } else {
                Some(new)
            }
        }
    }
}
