//! Capability interfaces consumed by the engine.
//!
//! Each trait mirrors one remote system. Calls are synchronous from the caller's
//! point of view and safe to retry, except [`WorkflowService::start_execution`]
//! (guarded by the launcher's cooldown heuristic) and
//! [`FunctionService::invoke_async`] (fire-and-forget).

use chrono::{DateTime, Utc};
use pipewatch_types::{DefinitionNode, ExecutionStatus, ExecutionSummary, LogEvent, StackDescriptor, StackEvent, StackResource, StackStatus};

use crate::ServiceError;

/// Infrastructure deployment service.
pub trait DeploymentService {
    /// Start creating a stack. Fails with [`ServiceError::AlreadyExists`] when it exists.
    fn create_stack(&self, descriptor: &StackDescriptor) -> Result<(), ServiceError>;

    /// Start updating a stack. Fails with [`ServiceError::NoUpdates`] when nothing changed.
    fn update_stack(&self, descriptor: &StackDescriptor) -> Result<(), ServiceError>;

    /// Events newer than `since` (all events when `None`), in any order.
    ///
    /// Fails with [`ServiceError::StackAbsent`] once the stack no longer exists.
    fn describe_events(&self, stack_name: &str, since: Option<DateTime<Utc>>) -> Result<Vec<StackEvent>, ServiceError>;

    fn describe_status(&self, stack_name: &str) -> Result<StackStatus, ServiceError>;

    fn list_resources(&self, stack_name: &str) -> Result<Vec<StackResource>, ServiceError>;

    fn delete_stack(&self, stack_name: &str) -> Result<(), ServiceError>;
}

/// Workflow-execution service.
pub trait WorkflowService {
    /// Recent executions of a workflow, optionally filtered by status.
    fn list_executions(&self, workflow_id: &str, status: Option<ExecutionStatus>) -> Result<Vec<ExecutionSummary>, ServiceError>;

    fn start_execution(&self, workflow_id: &str) -> Result<ExecutionSummary, ServiceError>;

    fn describe_execution(&self, execution_id: &str) -> Result<ExecutionStatus, ServiceError>;

    fn get_definition(&self, workflow_id: &str) -> Result<DefinitionNode, ServiceError>;
}

/// Serverless function invocation service.
pub trait FunctionService {
    /// Queue an asynchronous invocation; the result is never awaited.
    fn invoke_async(&self, function_id: &str) -> Result<(), ServiceError>;
}

/// Log storage service.
pub trait LogService {
    fn list_log_groups(&self, name_prefix: &str) -> Result<Vec<String>, ServiceError>;

    /// Events at or after `start_time` (epoch milliseconds), ordered by time.
    fn filter_events(&self, log_group: &str, start_time: i64) -> Result<Vec<LogEvent>, ServiceError>;

    fn delete_log_group(&self, log_group: &str) -> Result<(), ServiceError>;
}
