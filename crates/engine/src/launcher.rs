//! Deduplicated workflow launching.
//!
//! Before starting a workflow the launcher lists its recent executions. A start inside
//! the cooldown window means somebody (usually a previous run of this tool) already
//! triggered it, so nothing new is started. Executions still RUNNING are tracked either
//! way so the monitor can follow them.

use chrono::Duration;
use indexmap::IndexMap;
use pipewatch_api::{FunctionService, WorkflowService};
use pipewatch_types::{ExecutionRecord, ExecutionStatus, LogSource, WorkflowHandle};
use pipewatch_util::Clock;
use tracing::{debug, info, warn};

use crate::{
    EngineError, LaunchFailure,
    dependencies::{DependencySet, function_identifiers},
};

/// Default window during which a recent start suppresses a new one.
pub const DEFAULT_COOLDOWN_SECS: i64 = 60;

/// Ids the launcher acts on.
#[derive(Debug, Clone, Default)]
pub struct LaunchPlan {
    pub workflow_ids: Vec<String>,
    /// Functions invoked asynchronously before any workflow starts.
    pub invoke_ids: Vec<String>,
    /// Functions never invoked but whose logs are still tailed.
    pub passive_ids: Vec<String>,
    pub cooldown: Duration,
}

/// Result of a launch batch.
#[derive(Debug, Clone, Default)]
pub struct LaunchOutcome {
    /// Tracked executions keyed by execution id, in discovery order.
    pub executions: IndexMap<String, ExecutionRecord>,
    /// Ids of executions started by this batch.
    pub started: Vec<String>,
    /// Functions whose logs should be tailed.
    pub dependencies: DependencySet,
    pub failures: Vec<LaunchFailure>,
}

impl LaunchOutcome {
    /// One log source per dependency, starting at `initial_watermark` (epoch millis).
    pub fn log_sources(&self, initial_watermark: i64) -> Vec<LogSource> {
        self.dependencies
            .iter()
            .map(|resource_id| LogSource::new(resource_id.clone(), initial_watermark))
            .collect()
    }

    /// Fail when any workflow could not be launched.
    pub fn ensure_launched(&self) -> Result<(), EngineError> {
        if self.failures.is_empty() { Ok(()) } else { Err(EngineError::Launch(self.failures.clone())) }
    }

    fn track(&mut self, execution_id: &str, workflow_id: &str) {
        if !self.executions.contains_key(execution_id) {
            self.executions
                .insert(execution_id.to_string(), ExecutionRecord::new(execution_id, workflow_id));
        }
    }
}

pub struct WorkflowLauncher<'a> {
    workflows: &'a dyn WorkflowService,
    functions: &'a dyn FunctionService,
    clock: &'a dyn Clock,
}

impl<'a> WorkflowLauncher<'a> {
    pub fn new(workflows: &'a dyn WorkflowService, functions: &'a dyn FunctionService, clock: &'a dyn Clock) -> Self {
        Self { workflows, functions, clock }
    }

    /// Invoke the immediate functions, start every workflow that is not cooling down
    /// and collect the functions each workflow depends on.
    ///
    /// Failures never abort the batch: invocation and definition failures are logged,
    /// listing and start failures are collected in [`LaunchOutcome::failures`].
    pub fn launch(&self, plan: &LaunchPlan) -> LaunchOutcome {
        let mut outcome = LaunchOutcome::default();

        for function_id in &plan.invoke_ids {
            match self.functions.invoke_async(function_id) {
                Ok(()) => info!(function = %function_id, "function invoked"),
                Err(error) => warn!(function = %function_id, error = %error, "function invocation failed"),
            }
        }

        let now = self.clock.now();
        for workflow_id in &plan.workflow_ids {
            let executions = match self.workflows.list_executions(workflow_id, None) {
                Ok(executions) => executions,
                Err(source) => {
                    warn!(workflow = %workflow_id, error = %source, "could not list executions");
                    outcome.failures.push(LaunchFailure {
                        workflow_id: workflow_id.clone(),
                        source,
                    });
                    continue;
                }
            };

            for running in executions.iter().filter(|execution| execution.status == ExecutionStatus::Running) {
                debug!(workflow = %workflow_id, execution = %running.execution_id, "tracking running execution");
                outcome.track(&running.execution_id, workflow_id);
            }

            let handle = WorkflowHandle::from_executions(workflow_id.as_str(), &executions, plan.cooldown);
            if handle.is_cooling_down(now) {
                info!(
                    workflow = %workflow_id,
                    last_started_at = ?handle.last_started_at,
                    "already started recently, not starting again"
                );
            } else {
                match self.workflows.start_execution(workflow_id) {
                    Ok(started) => {
                        info!(workflow = %workflow_id, execution = %started.execution_id, "execution started");
                        outcome.track(&started.execution_id, workflow_id);
                        outcome.started.push(started.execution_id);
                    }
                    Err(source) => {
                        warn!(workflow = %workflow_id, error = %source, "could not start execution");
                        outcome.failures.push(LaunchFailure {
                            workflow_id: workflow_id.clone(),
                            source,
                        });
                        continue;
                    }
                }
            }

            match self.workflows.get_definition(workflow_id) {
                Ok(definition) => {
                    let found = function_identifiers(&definition);
                    debug!(workflow = %workflow_id, functions = found.len(), "definition dependencies");
                    outcome.dependencies.extend(found);
                }
                Err(error) => warn!(workflow = %workflow_id, error = %error, "could not read workflow definition"),
            }
        }

        outcome
            .dependencies
            .extend(plan.passive_ids.iter().chain(&plan.invoke_ids).cloned());

        info!(
            started = outcome.started.len(),
            tracked = outcome.executions.len(),
            dependencies = outcome.dependencies.len(),
            failures = outcome.failures.len(),
            "launch finished"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use pipewatch_api::InMemoryCloud;
    use pipewatch_types::DefinitionNode;
    use pipewatch_util::ManualClock;
    use serde_json::json;

    use super::*;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 6, 0, 0).unwrap()
    }

    fn definition(function: &str) -> DefinitionNode {
        DefinitionNode::from(json!({
            "StartAt": "Run",
            "States": {"Run": {"Type": "Task", "Resource": function, "End": true}}
        }))
    }

    fn plan(workflows: &[&str]) -> LaunchPlan {
        LaunchPlan {
            workflow_ids: workflows.iter().map(|id| id.to_string()).collect(),
            cooldown: Duration::seconds(DEFAULT_COOLDOWN_SECS),
            ..Default::default()
        }
    }

    #[test]
    fn running_workflow_is_tracked_and_idle_one_started() {
        let clock = ManualClock::new(start());
        let cloud = InMemoryCloud::new(clock.clone());
        cloud.register_workflow("W1", definition("arn:aws:lambda:us-east-1:1:function:one"));
        cloud.register_workflow("W2", definition("arn:aws:lambda:us-east-1:1:function:two"));
        cloud.insert_execution(
            "W1",
            "W1:existing",
            start() - Duration::seconds(10),
            vec![(start() - Duration::seconds(10), ExecutionStatus::Running)],
        );

        let outcome = WorkflowLauncher::new(&cloud, &cloud, &clock).launch(&plan(&["W1", "W2"]));

        assert_eq!(outcome.started.len(), 1);
        assert_eq!(cloud.started_executions(), outcome.started);
        assert!(outcome.started[0].starts_with("W2:"));
        assert_eq!(outcome.executions.len(), 2);
        assert!(outcome.executions.contains_key("W1:existing"));
        assert_eq!(outcome.dependencies.len(), 2);
        assert!(outcome.ensure_launched().is_ok());
    }

    #[test]
    fn second_launch_inside_cooldown_tracks_the_same_execution() {
        let clock = ManualClock::new(start());
        let cloud = InMemoryCloud::new(clock.clone());
        cloud.register_workflow_with("W", DefinitionNode::scalar("noop"), ExecutionStatus::Succeeded, Duration::minutes(5));
        let launcher = WorkflowLauncher::new(&cloud, &cloud, &clock);

        let first = launcher.launch(&plan(&["W"]));
        clock.advance(std::time::Duration::from_secs(30));
        let second = launcher.launch(&plan(&["W"]));

        assert_eq!(cloud.started_executions().len(), 1);
        assert_eq!(
            first.executions.keys().collect::<Vec<_>>(),
            second.executions.keys().collect::<Vec<_>>()
        );
    }

    #[test]
    fn launch_after_cooldown_starts_again() {
        let clock = ManualClock::new(start());
        let cloud = InMemoryCloud::new(clock.clone());
        cloud.register_workflow_with("W", DefinitionNode::scalar("noop"), ExecutionStatus::Succeeded, Duration::minutes(5));
        let launcher = WorkflowLauncher::new(&cloud, &cloud, &clock);

        launcher.launch(&plan(&["W"]));
        clock.advance(std::time::Duration::from_secs(61));
        let second = launcher.launch(&plan(&["W"]));

        assert_eq!(cloud.started_executions().len(), 2);
        assert_eq!(second.executions.len(), 2);
    }

    #[test]
    fn recent_failed_start_still_suppresses_a_new_one() {
        let clock = ManualClock::new(start());
        let cloud = InMemoryCloud::new(clock.clone());
        cloud.register_workflow("W", DefinitionNode::scalar("noop"));
        cloud.insert_execution(
            "W",
            "W:failed",
            start() - Duration::seconds(20),
            vec![(start() - Duration::seconds(15), ExecutionStatus::Failed)],
        );

        let outcome = WorkflowLauncher::new(&cloud, &cloud, &clock).launch(&plan(&["W"]));

        assert!(outcome.started.is_empty());
        assert!(outcome.executions.is_empty());
    }

    #[test]
    fn start_failures_are_collected_without_stopping_the_batch() {
        let clock = ManualClock::new(start());
        let cloud = InMemoryCloud::new(clock.clone());
        cloud.register_workflow("Broken", DefinitionNode::scalar("noop"));
        cloud.register_workflow("Healthy", DefinitionNode::scalar("noop"));
        cloud.fail_starts("Broken");

        let outcome = WorkflowLauncher::new(&cloud, &cloud, &clock).launch(&plan(&["Broken", "Missing", "Healthy"]));

        assert_eq!(outcome.started.len(), 1);
        let failed: Vec<&str> = outcome.failures.iter().map(|failure| failure.workflow_id.as_str()).collect();
        assert_eq!(failed, vec!["Broken", "Missing"]);
        assert!(matches!(outcome.ensure_launched(), Err(EngineError::Launch(failures)) if failures.len() == 2));
    }

    #[test]
    fn immediate_and_passive_functions_join_the_dependency_set() {
        let clock = ManualClock::new(start());
        let cloud = InMemoryCloud::new(clock.clone());
        cloud.fail_invocations("arn:aws:lambda:us-east-1:1:function:flaky");
        let plan = LaunchPlan {
            invoke_ids: vec![
                "arn:aws:lambda:us-east-1:1:function:accounts".into(),
                "arn:aws:lambda:us-east-1:1:function:flaky".into(),
            ],
            passive_ids: vec!["arn:aws:lambda:us-east-1:1:function:passive".into()],
            ..plan(&[])
        };

        let outcome = WorkflowLauncher::new(&cloud, &cloud, &clock).launch(&plan);

        assert_eq!(cloud.invocations(), vec!["arn:aws:lambda:us-east-1:1:function:accounts".to_string()]);
        assert_eq!(outcome.dependencies.len(), 3);
        assert_eq!(outcome.log_sources(42).len(), 3);
        assert!(outcome.ensure_launched().is_ok());
    }
}
