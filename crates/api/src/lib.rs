//! Capability providers for pipewatch.
//!
//! The engine talks to four remote systems through the traits in [`services`]:
//!
//! - [`DeploymentService`] creates, updates, describes and deletes stacks
//! - [`WorkflowService`] lists, starts and describes workflow executions
//! - [`FunctionService`] queues asynchronous function invocations
//! - [`LogService`] lists, reads and deletes log groups
//!
//! Two providers implement all of them: [`GatewayClient`], an HTTP client for a
//! gateway that fronts the cloud APIs, and [`InMemoryCloud`], a deterministic
//! timeline used by tests and dry runs.
//!
//! # Example
//!
//! ```ignore
//! use pipewatch_api::{DeploymentService, GatewayClient, GatewaySettings};
//!
//! let client = GatewayClient::new(&GatewaySettings::default())?;
//! let status = client.describe_status("CID-DC-Pipeline")?;
//! println!("{status:?}");
//! # Ok::<(), anyhow::Error>(())
//! ```

mod error;
pub mod gateway;
pub mod memory;
pub mod services;

pub use error::ServiceError;
pub use gateway::{GatewayClient, GatewaySettings};
pub use memory::InMemoryCloud;
pub use services::{DeploymentService, FunctionService, LogService, WorkflowService};
