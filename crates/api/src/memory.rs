//! Deterministic in-process provider.
//!
//! [`InMemoryCloud`] implements every capability trait over a timeline driven by a
//! shared [`Clock`]. Scripted events, statuses, resources and log lines become
//! visible once the clock reaches their timestamp, which lets tests and rehearsals
//! reproduce eventual consistency (late nested stacks, delayed log delivery,
//! executions finishing between polls) without real services.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use pipewatch_types::{
    DefinitionNode, ExecutionStatus, ExecutionSummary, LogEvent, NESTED_STACK_RESOURCE_TYPE, StackDescriptor, StackEvent,
    StackResource, StackStatus,
};
use pipewatch_util::Clock;

use crate::{DeploymentService, FunctionService, LogService, ServiceError, WorkflowService};

const DEFAULT_PROVISION_DELAY_SECS: i64 = 10;
const DEFAULT_RUN_DURATION_SECS: i64 = 30;

#[derive(Debug, Default)]
struct MemoryStack {
    descriptor: Option<StackDescriptor>,
    created_at: DateTime<Utc>,
    removed_at: Option<DateTime<Utc>>,
    events: Vec<StackEvent>,
    statuses: Vec<(DateTime<Utc>, String)>,
    resources: Vec<(DateTime<Utc>, StackResource)>,
}

impl MemoryStack {
    fn is_visible(&self, now: DateTime<Utc>) -> bool {
        self.created_at <= now && self.removed_at.is_none_or(|removed_at| now < removed_at)
    }

    fn transition(&mut self, name: &str, at: DateTime<Utc>, status: &str, reason: Option<&str>) {
        self.events.push(StackEvent {
            timestamp: at,
            stack_name: name.to_string(),
            logical_resource_id: name.to_string(),
            resource_status: status.to_string(),
            reason: reason.map(str::to_string),
        });
        self.statuses.push((at, status.to_string()));
    }
}

#[derive(Debug, Clone)]
struct MemoryWorkflow {
    definition: DefinitionNode,
    outcome: ExecutionStatus,
    run_duration: Duration,
}

#[derive(Debug, Clone)]
struct MemoryExecution {
    workflow_id: String,
    started_at: DateTime<Utc>,
    timeline: Vec<(DateTime<Utc>, ExecutionStatus)>,
}

impl MemoryExecution {
    fn status_at(&self, now: DateTime<Utc>) -> ExecutionStatus {
        self.timeline
            .iter()
            .filter(|(at, _)| *at <= now)
            .max_by_key(|(at, _)| *at)
            .map(|(_, status)| *status)
            .unwrap_or(ExecutionStatus::Running)
    }
}

#[derive(Debug, Default)]
struct Failures {
    stack_events: HashSet<String>,
    stack_queries: HashSet<String>,
    deletions: HashSet<String>,
    log_reads: HashSet<String>,
    starts: HashSet<String>,
    invocations: HashSet<String>,
}

#[derive(Debug, Default)]
struct CloudState {
    stacks: IndexMap<String, MemoryStack>,
    workflows: IndexMap<String, MemoryWorkflow>,
    executions: IndexMap<String, MemoryExecution>,
    log_groups: IndexMap<String, Vec<LogEvent>>,
    invocations: Vec<String>,
    started: Vec<String>,
    deleted_log_groups: Vec<String>,
    failures: Failures,
    sequence: u64,
}

/// In-memory implementation of the deployment, workflow, function and log services.
pub struct InMemoryCloud {
    clock: Arc<dyn Clock + Send + Sync>,
    provision_delay: Duration,
    state: Mutex<CloudState>,
}

impl InMemoryCloud {
    pub fn new(clock: impl Clock + Send + Sync + 'static) -> Self {
        Self {
            clock: Arc::new(clock),
            provision_delay: Duration::seconds(DEFAULT_PROVISION_DELAY_SECS),
            state: Mutex::new(CloudState::default()),
        }
    }

    /// Time a create/update/delete takes to reach its terminal status.
    pub fn with_provision_delay(mut self, delay: Duration) -> Self {
        self.provision_delay = delay;
        self
    }

    fn state(&self) -> MutexGuard<'_, CloudState> {
        self.state.lock().expect("in-memory cloud lock poisoned")
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ----- stack scripting -----

    /// Register an existing stack (visible from now on) with the given descriptor.
    pub fn insert_stack(&self, descriptor: StackDescriptor, raw_status: &str) {
        let now = self.now();
        let name = descriptor.name.clone();
        let mut stack = MemoryStack {
            descriptor: Some(descriptor),
            created_at: now,
            ..Default::default()
        };
        stack.statuses.push((now, raw_status.to_string()));
        self.state().stacks.insert(name, stack);
    }

    /// Append an event that becomes visible at its own timestamp.
    pub fn script_stack_event(&self, event: StackEvent) {
        let mut state = self.state();
        let stack = state.stacks.entry(event.stack_name.clone()).or_default();
        stack.events.push(event);
    }

    /// Make the stack report `raw_status` from `at` onwards.
    pub fn script_stack_status(&self, stack_name: &str, at: DateTime<Utc>, raw_status: &str) {
        let mut state = self.state();
        let stack = state.stacks.entry(stack_name.to_string()).or_default();
        stack.statuses.push((at, raw_status.to_string()));
    }

    /// Add a nested stack resource to `parent`, visible from `at` onwards.
    pub fn script_nested_stack(&self, parent: &str, at: DateTime<Utc>, logical_id: &str, physical_id: &str) {
        let mut state = self.state();
        let stack = state.stacks.entry(parent.to_string()).or_default();
        stack.resources.push((
            at,
            StackResource {
                logical_id: logical_id.to_string(),
                physical_id: physical_id.to_string(),
                resource_type: NESTED_STACK_RESOURCE_TYPE.to_string(),
            },
        ));
    }

    /// Make the stack disappear at `at`.
    pub fn remove_stack_at(&self, stack_name: &str, at: DateTime<Utc>) {
        if let Some(stack) = self.state().stacks.get_mut(stack_name) {
            stack.removed_at = Some(at);
        }
    }

    /// Make event listing for a stack fail with a transport error.
    pub fn fail_stack_events(&self, stack_name: &str) {
        self.state().failures.stack_events.insert(stack_name.to_string());
    }

    /// Make status and resource queries for a stack fail with a transport error.
    pub fn fail_stack_queries(&self, stack_name: &str) {
        self.state().failures.stack_queries.insert(stack_name.to_string());
    }

    /// Accept deletions of a stack but end them in `DELETE_FAILED`.
    pub fn fail_deletion(&self, stack_name: &str) {
        self.state().failures.deletions.insert(stack_name.to_string());
    }

    // ----- workflow scripting -----

    /// Register a workflow whose started executions succeed after the default run time.
    pub fn register_workflow(&self, workflow_id: &str, definition: DefinitionNode) {
        self.register_workflow_with(
            workflow_id,
            definition,
            ExecutionStatus::Succeeded,
            Duration::seconds(DEFAULT_RUN_DURATION_SECS),
        );
    }

    /// Register a workflow with an explicit outcome and run time for new executions.
    pub fn register_workflow_with(&self, workflow_id: &str, definition: DefinitionNode, outcome: ExecutionStatus, run_duration: Duration) {
        self.state().workflows.insert(
            workflow_id.to_string(),
            MemoryWorkflow {
                definition,
                outcome,
                run_duration,
            },
        );
    }

    /// Insert an execution with an explicit status timeline.
    pub fn insert_execution(
        &self,
        workflow_id: &str,
        execution_id: &str,
        started_at: DateTime<Utc>,
        timeline: Vec<(DateTime<Utc>, ExecutionStatus)>,
    ) {
        self.state().executions.insert(
            execution_id.to_string(),
            MemoryExecution {
                workflow_id: workflow_id.to_string(),
                started_at,
                timeline,
            },
        );
    }

    /// Make `start_execution` fail for a workflow.
    pub fn fail_starts(&self, workflow_id: &str) {
        self.state().failures.starts.insert(workflow_id.to_string());
    }

    /// Ids of executions created through `start_execution`, in order.
    pub fn started_executions(&self) -> Vec<String> {
        self.state().started.clone()
    }

    // ----- function and log scripting -----

    pub fn fail_invocations(&self, function_id: &str) {
        self.state().failures.invocations.insert(function_id.to_string());
    }

    /// Function ids passed to `invoke_async`, in order.
    pub fn invocations(&self) -> Vec<String> {
        self.state().invocations.clone()
    }

    /// Make reading events of a log group fail with a transport error.
    pub fn fail_log_reads(&self, log_group: &str) {
        self.state().failures.log_reads.insert(log_group.to_string());
    }

    pub fn create_log_group(&self, log_group: &str) {
        self.state().log_groups.entry(log_group.to_string()).or_default();
    }

    /// Append a log line, delivered once the clock reaches its timestamp.
    pub fn push_log_event(&self, log_group: &str, event: LogEvent) {
        self.state().log_groups.entry(log_group.to_string()).or_default().push(event);
    }

    pub fn deleted_log_groups(&self) -> Vec<String> {
        self.state().deleted_log_groups.clone()
    }

    fn visible_stack<'a>(state: &'a mut CloudState, stack_name: &str, now: DateTime<Utc>) -> Result<&'a mut MemoryStack, ServiceError> {
        state
            .stacks
            .get_mut(stack_name)
            .filter(|stack| stack.is_visible(now))
            .ok_or_else(|| ServiceError::StackAbsent(stack_name.to_string()))
    }

    fn check_stack_query(state: &CloudState, stack_name: &str) -> Result<(), ServiceError> {
        if state.failures.stack_queries.contains(stack_name) {
            return Err(ServiceError::Transport(format!("throttled while describing {stack_name}")));
        }
        Ok(())
    }
}

impl DeploymentService for InMemoryCloud {
    fn create_stack(&self, descriptor: &StackDescriptor) -> Result<(), ServiceError> {
        let now = self.now();
        let done = now + self.provision_delay;
        let mut state = self.state();
        if state.stacks.get(&descriptor.name).is_some_and(|stack| stack.is_visible(now)) {
            return Err(ServiceError::AlreadyExists(descriptor.name.clone()));
        }
        let mut stack = MemoryStack {
            descriptor: Some(descriptor.clone()),
            created_at: now,
            ..Default::default()
        };
        stack.transition(&descriptor.name, now, "CREATE_IN_PROGRESS", Some("User Initiated"));
        stack.transition(&descriptor.name, done, "CREATE_COMPLETE", None);
        state.stacks.insert(descriptor.name.clone(), stack);
        Ok(())
    }

    fn update_stack(&self, descriptor: &StackDescriptor) -> Result<(), ServiceError> {
        let now = self.now();
        let done = now + self.provision_delay;
        let mut state = self.state();
        let stack = Self::visible_stack(&mut state, &descriptor.name, now)?;
        if stack.descriptor.as_ref() == Some(descriptor) {
            return Err(ServiceError::NoUpdates(descriptor.name.clone()));
        }
        stack.descriptor = Some(descriptor.clone());
        stack.transition(&descriptor.name, now, "UPDATE_IN_PROGRESS", Some("User Initiated"));
        stack.transition(&descriptor.name, done, "UPDATE_COMPLETE", None);
        Ok(())
    }

    fn describe_events(&self, stack_name: &str, since: Option<DateTime<Utc>>) -> Result<Vec<StackEvent>, ServiceError> {
        let now = self.now();
        let mut state = self.state();
        if state.failures.stack_events.contains(stack_name) {
            return Err(ServiceError::Transport(format!("connection reset while listing events of {stack_name}")));
        }
        let stack = Self::visible_stack(&mut state, stack_name, now)?;
        let mut events: Vec<StackEvent> = stack
            .events
            .iter()
            .filter(|event| event.timestamp <= now && since.is_none_or(|since| event.timestamp > since))
            .cloned()
            .collect();
        // Newest first, like the real service.
        events.sort_by(|left, right| right.timestamp.cmp(&left.timestamp));
        Ok(events)
    }

    fn describe_status(&self, stack_name: &str) -> Result<StackStatus, ServiceError> {
        let now = self.now();
        let mut state = self.state();
        Self::check_stack_query(&state, stack_name)?;
        let stack = Self::visible_stack(&mut state, stack_name, now)?;
        let raw = stack
            .statuses
            .iter()
            .filter(|(at, _)| *at <= now)
            .max_by_key(|(at, _)| *at)
            .or_else(|| stack.statuses.first())
            .map(|(_, raw)| raw.as_str())
            .unwrap_or("REVIEW_IN_PROGRESS");
        Ok(StackStatus::from_raw(raw))
    }

    fn list_resources(&self, stack_name: &str) -> Result<Vec<StackResource>, ServiceError> {
        let now = self.now();
        let mut state = self.state();
        Self::check_stack_query(&state, stack_name)?;
        let stack = Self::visible_stack(&mut state, stack_name, now)?;
        Ok(stack
            .resources
            .iter()
            .filter(|(at, _)| *at <= now)
            .map(|(_, resource)| resource.clone())
            .collect())
    }

    fn delete_stack(&self, stack_name: &str) -> Result<(), ServiceError> {
        let now = self.now();
        let done = now + self.provision_delay;
        let mut state = self.state();
        let fails = state.failures.deletions.contains(stack_name);
        let stack = Self::visible_stack(&mut state, stack_name, now)?;
        stack.transition(stack_name, now, "DELETE_IN_PROGRESS", Some("User Initiated"));
        if fails {
            stack.transition(stack_name, done, "DELETE_FAILED", Some("resource is still in use"));
        } else {
            stack.removed_at = Some(done);
        }
        Ok(())
    }
}

impl WorkflowService for InMemoryCloud {
    fn list_executions(&self, workflow_id: &str, status: Option<ExecutionStatus>) -> Result<Vec<ExecutionSummary>, ServiceError> {
        let now = self.now();
        let state = self.state();
        if !state.workflows.contains_key(workflow_id) {
            return Err(ServiceError::NotFound {
                kind: "workflow",
                id: workflow_id.to_string(),
            });
        }
        let mut executions: Vec<ExecutionSummary> = state
            .executions
            .iter()
            .filter(|(_, execution)| execution.workflow_id == workflow_id && execution.started_at <= now)
            .map(|(execution_id, execution)| ExecutionSummary {
                execution_id: execution_id.clone(),
                workflow_id: workflow_id.to_string(),
                status: execution.status_at(now),
                started_at: execution.started_at,
            })
            .filter(|summary| status.is_none_or(|wanted| summary.status == wanted))
            .collect();
        executions.sort_by(|left, right| right.started_at.cmp(&left.started_at));
        Ok(executions)
    }

    fn start_execution(&self, workflow_id: &str) -> Result<ExecutionSummary, ServiceError> {
        let now = self.now();
        let mut state = self.state();
        if state.failures.starts.contains(workflow_id) {
            return Err(ServiceError::Rejected {
                status: 400,
                message: format!("execution limit exceeded for {workflow_id}"),
            });
        }
        let workflow = state.workflows.get(workflow_id).cloned().ok_or_else(|| ServiceError::NotFound {
            kind: "workflow",
            id: workflow_id.to_string(),
        })?;
        state.sequence += 1;
        let execution_id = format!("{}:run-{}", workflow_id, state.sequence);
        state.executions.insert(
            execution_id.clone(),
            MemoryExecution {
                workflow_id: workflow_id.to_string(),
                started_at: now,
                timeline: vec![(now, ExecutionStatus::Running), (now + workflow.run_duration, workflow.outcome)],
            },
        );
        state.started.push(execution_id.clone());
        Ok(ExecutionSummary {
            execution_id,
            workflow_id: workflow_id.to_string(),
            status: ExecutionStatus::Running,
            started_at: now,
        })
    }

    fn describe_execution(&self, execution_id: &str) -> Result<ExecutionStatus, ServiceError> {
        let now = self.now();
        self.state()
            .executions
            .get(execution_id)
            .map(|execution| execution.status_at(now))
            .ok_or_else(|| ServiceError::NotFound {
                kind: "execution",
                id: execution_id.to_string(),
            })
    }

    fn get_definition(&self, workflow_id: &str) -> Result<DefinitionNode, ServiceError> {
        self.state()
            .workflows
            .get(workflow_id)
            .map(|workflow| workflow.definition.clone())
            .ok_or_else(|| ServiceError::NotFound {
                kind: "workflow",
                id: workflow_id.to_string(),
            })
    }
}

impl FunctionService for InMemoryCloud {
    fn invoke_async(&self, function_id: &str) -> Result<(), ServiceError> {
        let mut state = self.state();
        if state.failures.invocations.contains(function_id) {
            return Err(ServiceError::Rejected {
                status: 429,
                message: format!("rate exceeded for {function_id}"),
            });
        }
        state.invocations.push(function_id.to_string());
        Ok(())
    }
}

impl LogService for InMemoryCloud {
    fn list_log_groups(&self, name_prefix: &str) -> Result<Vec<String>, ServiceError> {
        Ok(self
            .state()
            .log_groups
            .keys()
            .filter(|name| name.starts_with(name_prefix))
            .cloned()
            .collect())
    }

    fn filter_events(&self, log_group: &str, start_time: i64) -> Result<Vec<LogEvent>, ServiceError> {
        let now = self.clock.now_millis();
        let state = self.state();
        if state.failures.log_reads.contains(log_group) {
            return Err(ServiceError::Transport(format!("connection reset while reading {log_group}")));
        }
        let events = state.log_groups.get(log_group).ok_or_else(|| ServiceError::NotFound {
            kind: "log group",
            id: log_group.to_string(),
        })?;
        let mut visible: Vec<LogEvent> = events
            .iter()
            .filter(|event| event.timestamp >= start_time && event.timestamp <= now)
            .cloned()
            .collect();
        visible.sort_by_key(|event| event.timestamp);
        Ok(visible)
    }

    fn delete_log_group(&self, log_group: &str) -> Result<(), ServiceError> {
        let mut state = self.state();
        if state.log_groups.shift_remove(log_group).is_none() {
            return Err(ServiceError::NotFound {
                kind: "log group",
                id: log_group.to_string(),
            });
        }
        state.deleted_log_groups.push(log_group.to_string());
        Ok(())
    }
}
