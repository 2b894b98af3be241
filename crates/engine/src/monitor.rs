//! Execution monitoring with incremental log tailing.
//!
//! Each iteration polls every execution that has not reached a terminal status yet,
//! then reads new log lines of every dependency. Log groups are resolved by name
//! prefix on every pass because they only appear once a function first runs.

use std::time::Duration;

use indexmap::IndexMap;
use pipewatch_api::{LogService, WorkflowService};
use pipewatch_types::{ExecutionRecord, ExecutionStatus, LogSource, function_name};
use pipewatch_util::{Clock, Sleeper, time_format::epoch_millis};
use tracing::{info, warn};

use crate::{
    EngineError,
    poll::{PollSchedule, PollStep, drive},
};

pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MONITOR_MAX_INTERVAL: Duration = Duration::from_secs(20);
/// Pause before the first poll so freshly started executions and their log groups
/// become visible.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(20);
pub const DEFAULT_LOG_GROUP_PREFIX: &str = "/aws/lambda/";

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub schedule: PollSchedule,
    pub settle: Duration,
    /// Prepended to a function's short name to find its log groups.
    pub log_group_prefix: String,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            schedule: PollSchedule::growing(DEFAULT_MONITOR_INTERVAL, DEFAULT_MONITOR_MAX_INTERVAL),
            settle: DEFAULT_SETTLE_DELAY,
            log_group_prefix: DEFAULT_LOG_GROUP_PREFIX.to_string(),
        }
    }
}

pub struct ExecutionMonitor<'a> {
    workflows: &'a dyn WorkflowService,
    logs: &'a dyn LogService,
    clock: &'a dyn Clock,
    sleeper: &'a dyn Sleeper,
    settings: MonitorSettings,
}

impl<'a> ExecutionMonitor<'a> {
    pub fn new(workflows: &'a dyn WorkflowService, logs: &'a dyn LogService, clock: &'a dyn Clock, sleeper: &'a dyn Sleeper) -> Self {
        Self {
            workflows,
            logs,
            clock,
            sleeper,
            settings: MonitorSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: MonitorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Block until every tracked execution reports a terminal status.
    ///
    /// Returns the final status per execution id, in tracking order.
    pub fn observe(
        &self,
        executions: &mut IndexMap<String, ExecutionRecord>,
        sources: &mut [LogSource],
    ) -> Result<IndexMap<String, ExecutionStatus>, EngineError> {
        if !executions.is_empty() && !self.settings.settle.is_zero() {
            info!(settle_secs = self.settings.settle.as_secs(), "waiting before the first poll");
            self.sleeper.sleep(self.settings.settle);
        }

        info!(executions = executions.len(), log_sources = sources.len(), "monitoring executions");
        drive("monitor executions", &self.settings.schedule, self.clock, self.sleeper, |_| {
            let running = self.poll_executions(executions);
            self.tail_logs(sources);
            Ok(if running { PollStep::Pending } else { PollStep::Ready(()) })
        })?;

        Ok(executions
            .iter()
            .map(|(execution_id, record)| (execution_id.clone(), record.status()))
            .collect())
    }

    /// Poll every non-terminal execution. Returns true while any is still running.
    pub fn poll_executions(&self, executions: &mut IndexMap<String, ExecutionRecord>) -> bool {
        let mut running = false;
        for record in executions.values_mut().filter(|record| !record.is_terminal()) {
            match self.workflows.describe_execution(&record.execution_id) {
                Ok(status) => {
                    if record.observe(status) {
                        if status.is_success() {
                            info!(execution = %record.execution_id, status = %status, "execution finished");
                        } else {
                            warn!(execution = %record.execution_id, status = %status, "execution finished");
                        }
                    } else {
                        running = true;
                    }
                }
                Err(error) => {
                    warn!(execution = %record.execution_id, error = %error, "could not describe execution");
                    running = true;
                }
            }
        }
        running
    }

    /// Read new log lines for every source and surface the ones that look like failures.
    pub fn tail_logs(&self, sources: &mut [LogSource]) {
        for source in sources.iter_mut() {
            let function = function_name(&source.resource_id).to_string();
            let prefix = format!("{}{}", self.settings.log_group_prefix, function);
            match self.logs.list_log_groups(&prefix) {
                Ok(groups) => {
                    for group in groups {
                        source.track_group(&group);
                    }
                }
                Err(error) => warn!(resource = %source.resource_id, error = %error, "could not list log groups"),
            }

            for group in source.group_names() {
                let Some(start_time) = source.watermark(&group) else {
                    continue;
                };
                let events = match self.logs.filter_events(&group, start_time) {
                    Ok(events) => events,
                    Err(error) => {
                        warn!(log_group = %group, error = %error, "could not read log events");
                        continue;
                    }
                };
                for event in events.iter().filter(|event| event.signals_failure()) {
                    warn!(
                        timestamp = %epoch_millis(event.timestamp),
                        resource = %function,
                        "{}",
                        event.message.trim_end()
                    );
                }
                source.advance(&group, &events);
            }
        }
    }
}
