//! Idempotent create-or-update of stacks.

use pipewatch_api::{DeploymentService, ServiceError};
use pipewatch_types::{DeployOutcome, StackDescriptor};
use pipewatch_util::redact_parameter;
use tracing::{debug, info, warn};

use crate::EngineError;

/// Submits stack descriptors to the deployment service. Never waits for completion;
/// pair with [`crate::StackWatcher`] for that.
pub struct StackDeployer<'a> {
    service: &'a dyn DeploymentService,
}

impl<'a> StackDeployer<'a> {
    pub fn new(service: &'a dyn DeploymentService) -> Self {
        Self { service }
    }

    /// Create the stack, or update it with the same parameters when it already exists.
    pub fn deploy(&self, descriptor: &StackDescriptor) -> Result<DeployOutcome, EngineError> {
        for (key, value) in &descriptor.parameters {
            debug!(stack = %descriptor.name, parameter = %key, value = %redact_parameter(key, value), "stack parameter");
        }

        match self.service.create_stack(descriptor) {
            Ok(()) => {
                info!(stack = %descriptor.name, "stack creation initiated");
                return Ok(DeployOutcome::Created);
            }
            Err(ServiceError::AlreadyExists(_)) => {
                info!(stack = %descriptor.name, "stack exists, updating");
            }
            Err(source) => return Err(deployment_error(descriptor, source)),
        }

        match self.service.update_stack(descriptor) {
            Ok(()) => {
                info!(stack = %descriptor.name, "stack update initiated");
                Ok(DeployOutcome::Updated)
            }
            Err(ServiceError::NoUpdates(_)) => {
                info!(stack = %descriptor.name, "no updates are to be performed");
                Ok(DeployOutcome::NoOpNoUpdates)
            }
            Err(source) => Err(deployment_error(descriptor, source)),
        }
    }

    /// Deploy every descriptor in order. Failures are logged and collected; the batch
    /// always runs to the end.
    pub fn deploy_all(&self, descriptors: &[StackDescriptor]) -> (Vec<(String, DeployOutcome)>, Vec<EngineError>) {
        let mut deployed = Vec::new();
        let mut failures = Vec::new();
        for descriptor in descriptors {
            match self.deploy(descriptor) {
                Ok(outcome) => deployed.push((descriptor.name.clone(), outcome)),
                Err(error) => {
                    warn!(stack = %descriptor.name, error = %error, "stack deployment failed");
                    failures.push(error);
                }
            }
        }
        (deployed, failures)
    }
}

fn deployment_error(descriptor: &StackDescriptor, source: ServiceError) -> EngineError {
    EngineError::Deployment {
        stack: descriptor.name.clone(),
        source,
    }
}
