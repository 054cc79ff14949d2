use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::analysis::pipeline::Stage;

pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub run_id: u64,
    pub stage: Stage,
    pub message: String,
    pub is_failure: bool,
}

/// Bounded record of stage transitions and failures. Oldest entries are
/// dropped once `capacity` is reached.
#[derive(Debug)]
pub struct RunLog {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
}

impl RunLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, run_id: u64, stage: Stage, message: impl Into<String>) {
        self.push(run_id, stage, message.into(), false);
    }

    pub fn record_failure(&self, run_id: u64, stage: Stage, message: impl Into<String>) {
        self.push(run_id, stage, message.into(), true);
    }

    fn push(&self, run_id: u64, stage: Stage, message: String, is_failure: bool) {
        if is_failure {
            tracing::warn!(run_id, stage = %stage, "{}", message);
        } else {
            tracing::info!(run_id, stage = %stage, "{}", message);
        }

        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(LogEntry {
            at: Utc::now(),
            run_id,
            stage,
            message,
            is_failure,
        });
    }

    /// Oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.iter().cloned().collect()
    }

    pub fn failures(&self) -> Vec<LogEntry> {
        self.entries().into_iter().filter(|e| e.is_failure).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RunLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oldest_entries_are_evicted() {
        let log = RunLog::new(3);
        for i in 0..5 {
            log.record(i, Stage::FetchingMetadata, format!("entry {}", i));
        }
        let entries = log.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].run_id, 2);
        assert_eq!(entries[2].message, "entry 4");
    }

    #[test]
    fn test_failures_are_flagged() {
        let log = RunLog::default();
        log.record(1, Stage::FetchingReadme, "fetching readme");
        log.record_failure(1, Stage::FetchingReadme, "readme unavailable");
        assert_eq!(log.len(), 2);
        assert_eq!(log.failures().len(), 1);
        assert!(log.failures()[0].is_failure);
    }
}
