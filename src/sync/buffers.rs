// Bounded telemetry buffers fed by the reconciler
use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One generated preview artifact (e.g. a sample image produced mid-training).
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SampleRef {
    pub reference: String,
    pub received_at: DateTime<Utc>,
}

/// Append-only log-line buffer with FIFO eviction once the capacity is
/// exceeded. Eviction never blocks and never errors; readers get an owned
/// snapshot so rendering cannot race mutation.
#[derive(Debug)]
pub struct LogBuffer {
    lines: VecDeque<String>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    pub fn append(&mut self, line: String) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// Oldest-first copy of the retained lines.
    pub fn snapshot(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Bounded list of sample artifacts, newest-first for presentation.
#[derive(Debug)]
pub struct SampleList {
    samples: VecDeque<SampleRef>,
    capacity: usize,
}

impl SampleList {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn append(&mut self, reference: String) -> SampleRef {
        let sample = SampleRef {
            reference,
            received_at: Utc::now(),
        };
        if self.samples.len() == self.capacity {
            self.samples.pop_back();
        }
        self.samples.push_front(sample.clone());
        sample
    }

    /// Newest-first copy of the retained samples.
    pub fn snapshot(&self) -> Vec<SampleRef> {
        self.samples.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_buffer_evicts_oldest_first() {
        let mut buf = LogBuffer::new(3);
        for i in 0..5 {
            buf.append(format!("line {}", i));
        }
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.snapshot(), vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn test_log_buffer_snapshot_is_detached() {
        let mut buf = LogBuffer::new(10);
        buf.append("first".to_string());
        let snap = buf.snapshot();
        buf.append("second".to_string());
        assert_eq!(snap, vec!["first"]);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_sample_list_newest_first() {
        let mut list = SampleList::new(10);
        list.append("a.png".to_string());
        list.append("b.png".to_string());
        let snap = list.snapshot();
        assert_eq!(snap[0].reference, "b.png");
        assert_eq!(snap[1].reference, "a.png");
    }

    #[test]
    fn test_sample_list_caps_and_drops_oldest() {
        let mut list = SampleList::new(2);
        list.append("a.png".to_string());
        list.append("b.png".to_string());
        list.append("c.png".to_string());
        let refs: Vec<_> = list.snapshot().into_iter().map(|s| s.reference).collect();
        assert_eq!(refs, vec!["c.png", "b.png"]);
    }
}
