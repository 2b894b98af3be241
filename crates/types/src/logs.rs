//! Log tailing models.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A single log line with its millisecond epoch timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEvent {
    pub timestamp: i64,
    pub message: String,
}

impl LogEvent {
    pub fn new(timestamp: i64, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            message: message.into(),
        }
    }

    /// Returns true when the message mentions an error or exception, ignoring case.
    pub fn signals_failure(&self) -> bool {
        let lowered = self.message.to_lowercase();
        lowered.contains("error") || lowered.contains("exception")
    }
}

/// A resource whose log groups are tailed while executions run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSource {
    pub resource_id: String,
    /// Watermark assigned to groups discovered after the source was created.
    initial_watermark: i64,
    /// Read position per resolved log group, in milliseconds.
    groups: IndexMap<String, i64>,
}

impl LogSource {
    pub fn new(resource_id: impl Into<String>, initial_watermark: i64) -> Self {
        Self {
            resource_id: resource_id.into(),
            initial_watermark,
            groups: IndexMap::new(),
        }
    }

    /// Register a log group; existing groups keep their read position.
    pub fn track_group(&mut self, group_name: &str) {
        if !self.groups.contains_key(group_name) {
            self.groups.insert(group_name.to_string(), self.initial_watermark);
        }
    }

    pub fn group_names(&self) -> Vec<String> {
        self.groups.keys().cloned().collect()
    }

    pub fn watermark(&self, group_name: &str) -> Option<i64> {
        self.groups.get(group_name).copied()
    }

    /// Advance a group's watermark past the last returned event. Never moves backwards.
    pub fn advance(&mut self, group_name: &str, events: &[LogEvent]) {
        let Some(last) = events.last() else {
            return;
        };
        let next = last.timestamp.saturating_add(1);
        let entry = self.groups.entry(group_name.to_string()).or_insert(self.initial_watermark);
        if next > *entry {
            *entry = next;
        }
    }
}
