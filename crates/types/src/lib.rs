//! Shared data model for pipewatch: stacks, executions, log sources and workflow
//! definitions. Providers and the engine exchange these types; none of them perform I/O.

pub mod definition;
pub mod execution;
pub mod identifiers;
pub mod logs;
pub mod stack;

pub use definition::DefinitionNode;
pub use execution::{ExecutionRecord, ExecutionStatus, ExecutionSummary, WorkflowHandle};
pub use identifiers::{ArnContext, function_name, is_function_identifier};
pub use logs::{LogEvent, LogSource};
pub use stack::{
    CreationPolicy, DeployOutcome, NESTED_STACK_RESOURCE_TYPE, OnFailure, StackCapability, StackDescriptor, StackEvent,
    StackResource, StackState, StackStatus, nested_stack_name,
};
