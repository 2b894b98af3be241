//! Workflow execution models.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status reported by the workflow-execution service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Aborted,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }

    pub fn is_success(self) -> bool {
        matches!(self, ExecutionStatus::Succeeded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Succeeded => "SUCCEEDED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::TimedOut => "TIMED_OUT",
            ExecutionStatus::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution as returned by an execution listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub execution_id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
}

/// Client-side view of a workflow used for the duplicate-start heuristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowHandle {
    pub workflow_id: String,
    /// Start time of the most recent execution, if any.
    pub last_started_at: Option<DateTime<Utc>>,
    pub cooldown: chrono::Duration,
}

impl WorkflowHandle {
    /// Build a handle from the service's recent executions.
    pub fn from_executions(workflow_id: impl Into<String>, executions: &[ExecutionSummary], cooldown: chrono::Duration) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            last_started_at: executions.iter().map(|execution| execution.started_at).max(),
            cooldown,
        }
    }

    /// Returns true while the most recent start is inside the cooldown window.
    pub fn is_cooling_down(&self, now: DateTime<Utc>) -> bool {
        self.last_started_at
            .is_some_and(|started_at| now.signed_duration_since(started_at) < self.cooldown)
    }
}

/// Tracked execution whose terminal status is recorded exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub workflow_id: String,
    status: ExecutionStatus,
    terminal_observed: bool,
}

impl ExecutionRecord {
    pub fn new(execution_id: impl Into<String>, workflow_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            workflow_id: workflow_id.into(),
            status: ExecutionStatus::Running,
            terminal_observed: false,
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal_observed
    }

    /// Apply a polled status. Returns true only for the first terminal observation;
    /// anything polled after that is ignored.
    pub fn observe(&mut self, polled: ExecutionStatus) -> bool {
        if self.terminal_observed {
            return false;
        }
        self.status = polled;
        if polled.is_terminal() {
            self.terminal_observed = true;
            return true;
        }
        false
    }
}
