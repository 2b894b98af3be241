use std::{fmt, time::Duration};

use pipewatch_api::ServiceError;
use thiserror::Error;

use crate::config::ConfigError;

/// A workflow that could not be started, or whose executions could not be listed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchFailure {
    pub workflow_id: String,
    pub source: ServiceError,
}

impl fmt::Display for LaunchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.workflow_id, self.source)
    }
}

/// Errors surfaced by the engine to its caller.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("deployment of stack '{stack}' failed: {source}")]
    Deployment {
        stack: String,
        #[source]
        source: ServiceError,
    },
    #[error("stacks ended in a failed state: {}", .0.join(", "))]
    StacksFailed(Vec<String>),
    #[error("{operation} did not finish within {elapsed:?}")]
    TimeoutExceeded { operation: &'static str, elapsed: Duration },
    #[error("{} workflow(s) could not be launched: {}", .0.len(), join_failures(.0))]
    Launch(Vec<LaunchFailure>),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

fn join_failures(failures: &[LaunchFailure]) -> String {
    failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_error_lists_every_failure() {
        let error = EngineError::Launch(vec![
            LaunchFailure {
                workflow_id: "wf-a".into(),
                source: ServiceError::Transport("reset".into()),
            },
            LaunchFailure {
                workflow_id: "wf-b".into(),
                source: ServiceError::Rejected {
                    status: 400,
                    message: "limit".into(),
                },
            },
        ]);
        let rendered = error.to_string();
        assert!(rendered.starts_with("2 workflow(s) could not be launched"));
        assert!(rendered.contains("wf-a: transport error: reset"));
        assert!(rendered.contains("wf-b: request rejected with status 400: limit"));
    }
}
