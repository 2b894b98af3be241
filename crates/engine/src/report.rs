//! Final execution report.

use indexmap::IndexMap;
use pipewatch_types::ExecutionStatus;
use serde::Serialize;
use tracing::{info, warn};

/// Executions split by outcome. Anything other than SUCCEEDED counts as failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, ExecutionStatus)>,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

pub fn summarize(results: &IndexMap<String, ExecutionStatus>) -> ExecutionReport {
    let mut report = ExecutionReport::default();
    for (execution_id, status) in results {
        if status.is_success() {
            report.succeeded.push(execution_id.clone());
        } else {
            report.failed.push((execution_id.clone(), *status));
        }
    }
    report
}

/// Log one line per execution; failures at warn level.
pub fn log_report(report: &ExecutionReport) {
    for execution_id in &report.succeeded {
        info!(execution = %execution_id, status = %ExecutionStatus::Succeeded, "execution result");
    }
    for (execution_id, status) in &report.failed {
        warn!(execution = %execution_id, status = %status, "execution result");
    }
    info!(
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        "run summary"
    );
}
