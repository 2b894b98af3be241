//! End-to-end control flow: deploy, watch, trigger, monitor, report and teardown.

use std::time::Duration;

use pipewatch_api::{DeploymentService, FunctionService, LogService, ServiceError, WorkflowService};
use pipewatch_util::{Clock, Sleeper};
use tracing::{info, warn};

use crate::{
    EngineError,
    config::PipelineConfig,
    deployer::StackDeployer,
    launcher::{LaunchOutcome, WorkflowLauncher},
    monitor::ExecutionMonitor,
    report::{ExecutionReport, log_report, summarize},
    watcher::{StackWatcher, WatchReport},
};

/// Capabilities the pipeline runs against.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub deployments: &'a dyn DeploymentService,
    pub workflows: &'a dyn WorkflowService,
    pub functions: &'a dyn FunctionService,
    pub logs: &'a dyn LogService,
    pub clock: &'a dyn Clock,
    pub sleeper: &'a dyn Sleeper,
}

impl<'a> Services<'a> {
    /// Use one provider for every capability.
    pub fn from_provider<P>(provider: &'a P, clock: &'a dyn Clock, sleeper: &'a dyn Sleeper) -> Self
    where
        P: DeploymentService + WorkflowService + FunctionService + LogService,
    {
        Self {
            deployments: provider,
            workflows: provider,
            functions: provider,
            logs: provider,
            clock,
            sleeper,
        }
    }
}

/// What a teardown removed, and what it could not.
#[derive(Debug, Clone, Default)]
pub struct TeardownReport {
    pub deleted_stacks: Vec<String>,
    pub deleted_log_groups: Vec<String>,
    pub failures: Vec<(String, ServiceError)>,
}

pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
    services: Services<'a>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a PipelineConfig, services: Services<'a>) -> Self {
        Self { config, services }
    }

    fn watcher(&self) -> StackWatcher<'a> {
        StackWatcher::new(self.services.deployments, self.services.clock, self.services.sleeper).with_schedule(self.config.watch_schedule())
    }

    /// Deploy every configured stack, then watch until all of them settle.
    ///
    /// Stacks that failed to submit are reported after the others were watched.
    pub fn deploy_and_watch(&self) -> Result<WatchReport, EngineError> {
        let (deployed, mut failures) = StackDeployer::new(self.services.deployments).deploy_all(&self.config.stacks);
        for (stack, outcome) in &deployed {
            info!(stack = %stack, outcome = ?outcome, "stack submitted");
        }

        let report = self.watch(deployed.into_iter().map(|(stack, _)| stack))?;
        if !failures.is_empty() {
            return Err(failures.remove(0));
        }
        Ok(report)
    }

    /// Watch the given stacks and fail when any of them ended in a failed state.
    pub fn watch<I>(&self, stacks: I) -> Result<WatchReport, EngineError>
    where
        I: IntoIterator<Item = String>,
    {
        let report = self.watcher().watch(stacks)?;
        let failed = report.failed_stacks();
        if !failed.is_empty() {
            return Err(EngineError::StacksFailed(failed.into_iter().map(str::to_string).collect()));
        }
        Ok(report)
    }

    /// Launch the configured workflows. With `wait`, monitor them and return the report.
    ///
    /// Launch failures are raised after the executions that did start were observed.
    pub fn trigger(&self, wait: bool) -> Result<Option<ExecutionReport>, EngineError> {
        let monitor_started = self.services.clock.now_millis();
        let mut outcome = WorkflowLauncher::new(self.services.workflows, self.services.functions, self.services.clock)
            .launch(&self.config.launch_plan());

        if !wait {
            outcome.ensure_launched()?;
            return Ok(None);
        }

        let report = self.monitor(&mut outcome, monitor_started)?;
        outcome.ensure_launched()?;
        Ok(Some(report))
    }

    fn monitor(&self, outcome: &mut LaunchOutcome, monitor_started: i64) -> Result<ExecutionReport, EngineError> {
        let mut sources = outcome.log_sources(monitor_started);
        let results = ExecutionMonitor::new(self.services.workflows, self.services.logs, self.services.clock, self.services.sleeper)
            .with_settings(self.config.monitor_settings())
            .observe(&mut outcome.executions, &mut sources)?;
        let report = summarize(&results);
        log_report(&report);
        Ok(report)
    }

    /// Deploy, watch, trigger and monitor.
    pub fn run(&self) -> Result<ExecutionReport, EngineError> {
        self.deploy_and_watch()?;
        Ok(self.trigger(true)?.unwrap_or_default())
    }

    /// Delete every configured stack in reverse order, wait until they are gone and
    /// purge the configured log groups.
    pub fn teardown(&self, skip_grace: bool) -> Result<TeardownReport, EngineError> {
        if !skip_grace {
            self.grace_countdown();
        }

        let mut report = TeardownReport::default();
        let mut deleting = Vec::new();
        for stack in self.config.stacks.iter().rev() {
            match self.services.deployments.delete_stack(&stack.name) {
                Ok(()) => {
                    info!(stack = %stack.name, "stack deletion initiated");
                    deleting.push(stack.name.clone());
                }
                Err(error) if error.is_absent() => info!(stack = %stack.name, "stack already absent"),
                Err(error) => {
                    warn!(stack = %stack.name, error = %error, "could not delete stack");
                    report.failures.push((stack.name.clone(), error));
                }
            }
        }

        let watched = self.watcher().watch(deleting.iter().cloned())?;
        report.deleted_stacks = deleting
            .into_iter()
            .filter(|stack| !watched.working_set.contains(stack))
            .collect();
        // Anything still in the working set settled without disappearing.
        for stack in &watched.working_set {
            let status = watched.status_of(stack).unwrap_or_default();
            warn!(stack = %stack, status = ?status, "stack was not deleted");
            report.failures.push((
                stack.clone(),
                ServiceError::NotDeleted {
                    stack: stack.clone(),
                    status,
                },
            ));
        }

        if let Some(prefix) = &self.config.teardown.log_group_prefix {
            self.purge_log_groups(prefix, &mut report);
        }

        info!(
            stacks = report.deleted_stacks.len(),
            log_groups = report.deleted_log_groups.len(),
            failures = report.failures.len(),
            "teardown finished"
        );
        Ok(report)
    }

    fn grace_countdown(&self) {
        for remaining in (1..=self.config.teardown.grace_secs).rev() {
            warn!(remaining_secs = remaining, "teardown starts soon, interrupt to abort");
            self.services.sleeper.sleep(Duration::from_secs(1));
        }
    }

    fn purge_log_groups(&self, prefix: &str, report: &mut TeardownReport) {
        let groups = match self.services.logs.list_log_groups(prefix) {
            Ok(groups) => groups,
            Err(error) => {
                warn!(prefix = %prefix, error = %error, "could not list log groups");
                report.failures.push((prefix.to_string(), error));
                return;
            }
        };
        for group in groups {
            match self.services.logs.delete_log_group(&group) {
                Ok(()) => {
                    info!(log_group = %group, "log group deleted");
                    report.deleted_log_groups.push(group);
                }
                Err(error) => {
                    warn!(log_group = %group, error = %error, "could not delete log group");
                    report.failures.push((group, error));
                }
            }
        }
    }
}
