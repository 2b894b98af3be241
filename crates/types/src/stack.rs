//! Deployment-unit (stack) models shared by the providers and the engine.
//!
//! Descriptors are authored in the pipeline configuration and passed unchanged to
//! the deployment service. Parameters keep authoring order via `IndexMap` so the
//! request a provider sends matches what the operator wrote.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Resource type that marks a stack resource as a nested stack.
pub const NESTED_STACK_RESOURCE_TYPE: &str = "AWS::CloudFormation::Stack";

/// Everything the deployment service needs to create or update one stack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StackDescriptor {
    /// Unique stack name.
    pub name: String,
    /// Location of the infrastructure template (usually an object-store URL).
    pub template_url: String,
    /// Template parameters in authoring order.
    #[serde(default)]
    pub parameters: IndexMap<String, String>,
    /// Capabilities acknowledged on behalf of the template.
    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<StackCapability>,
    /// Tags applied to the stack and its resources.
    #[serde(default)]
    pub tags: IndexMap<String, String>,
    /// Notification topics that receive stack events.
    #[serde(default)]
    pub notification_targets: Vec<String>,
    /// Settings that only apply when the stack is first created.
    #[serde(default)]
    pub creation_policy: CreationPolicy,
}

impl StackDescriptor {
    /// Build a descriptor with default capabilities and creation policy.
    pub fn new(name: impl Into<String>, template_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template_url: template_url.into(),
            parameters: IndexMap::new(),
            capabilities: default_capabilities(),
            tags: IndexMap::new(),
            notification_targets: Vec::new(),
            creation_policy: CreationPolicy::default(),
        }
    }

    /// Append or replace a template parameter, keeping its original position.
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

fn default_capabilities() -> Vec<StackCapability> {
    vec![StackCapability::Iam, StackCapability::NamedIam, StackCapability::AutoExpand]
}

/// Capability acknowledgements accepted by the deployment service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum StackCapability {
    #[serde(rename = "CAPABILITY_IAM")]
    Iam,
    #[serde(rename = "CAPABILITY_NAMED_IAM")]
    NamedIam,
    #[serde(rename = "CAPABILITY_AUTO_EXPAND")]
    AutoExpand,
}

/// Creation-time policy: timeout, termination protection and failure handling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreationPolicy {
    /// Minutes the service allows creation to run before failing it.
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u32,
    /// Whether deletion must be explicitly unlocked.
    #[serde(default)]
    pub termination_protection: bool,
    /// What the service does with a stack whose creation failed.
    #[serde(default)]
    pub on_failure: OnFailure,
}

fn default_timeout_minutes() -> u32 {
    60
}

impl Default for CreationPolicy {
    fn default() -> Self {
        Self {
            timeout_minutes: default_timeout_minutes(),
            termination_protection: false,
            on_failure: OnFailure::default(),
        }
    }
}

/// Action applied when stack creation fails.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnFailure {
    DoNothing,
    Rollback,
    #[default]
    Delete,
}

/// Result of an idempotent create-or-update.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeployOutcome {
    /// A new stack creation was initiated.
    Created,
    /// The stack existed and an update was initiated.
    Updated,
    /// The stack existed and already matched the descriptor.
    NoOpNoUpdates,
}

/// Coarse lifecycle of a stack as tracked by the watcher.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StackStatus {
    Creating,
    Updating,
    /// Any other in-progress lifecycle (delete, rollback, import, ...).
    InProgress,
    Complete,
    Failed,
    /// Not known to the service, or not observed yet.
    #[default]
    Absent,
}

impl StackStatus {
    /// Map a raw provider status such as `UPDATE_COMPLETE_CLEANUP_IN_PROGRESS`.
    pub fn from_raw(raw: &str) -> Self {
        let raw = raw.trim().to_ascii_uppercase();
        if raw.is_empty() {
            return StackStatus::Absent;
        }
        if raw.contains("IN_PROGRESS") {
            if raw.starts_with("CREATE_") {
                return StackStatus::Creating;
            }
            if raw.starts_with("UPDATE_") && !raw.contains("ROLLBACK") {
                return StackStatus::Updating;
            }
            return StackStatus::InProgress;
        }
        if raw.contains("FAILED") || raw.contains("ROLLBACK_COMPLETE") {
            return StackStatus::Failed;
        }
        if raw == "DELETE_COMPLETE" {
            return StackStatus::Absent;
        }
        if raw.ends_with("_COMPLETE") {
            return StackStatus::Complete;
        }
        StackStatus::InProgress
    }

    /// Returns true while the service is still working on the stack.
    pub fn is_in_progress(self) -> bool {
        matches!(self, StackStatus::Creating | StackStatus::Updating | StackStatus::InProgress)
    }
}

/// One entry from a stack's event history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StackEvent {
    pub timestamp: DateTime<Utc>,
    pub stack_name: String,
    pub logical_resource_id: String,
    pub resource_status: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Summary of a resource owned by a stack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StackResource {
    pub logical_id: String,
    #[serde(default)]
    pub physical_id: String,
    pub resource_type: String,
}

impl StackResource {
    /// Name of the child stack when this resource is a nested stack with a physical id.
    pub fn nested_stack_name(&self) -> Option<String> {
        if self.resource_type != NESTED_STACK_RESOURCE_TYPE {
            return None;
        }
        nested_stack_name(&self.physical_id)
    }
}

/// Derive a stack name from a nested stack physical id.
///
/// Physical ids look like `arn:aws:cloudformation:<region>:<account>:stack/<name>/<guid>`;
/// the name is the second-to-last path segment. Ids without a `/` are taken as names.
pub fn nested_stack_name(physical_id: &str) -> Option<String> {
    let trimmed = physical_id.trim();
    if trimmed.is_empty() {
        return None;
    }
    let segments: Vec<&str> = trimmed.split('/').collect();
    let name = match segments.len() {
        1 => segments[0],
        len => segments[len - 2],
    };
    if name.is_empty() { None } else { Some(name.to_string()) }
}

/// Watcher-owned view of a single stack.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StackState {
    pub name: String,
    pub status: StackStatus,
    /// Timestamp of the newest processed event.
    pub watermark: Option<DateTime<Utc>>,
    /// Nested stacks discovered under this stack.
    pub children: BTreeSet<String>,
}

impl StackState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Move the watermark forward; older timestamps are ignored.
    pub fn advance_watermark(&mut self, timestamp: DateTime<Utc>) {
        if self.watermark.is_none_or(|current| timestamp > current) {
            self.watermark = Some(timestamp);
        }
    }

    /// Returns true when the event has not been processed yet.
    pub fn is_unseen(&self, event: &StackEvent) -> bool {
        self.watermark.is_none_or(|current| event.timestamp > current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn raw_statuses_map_to_lifecycle() {
        assert_eq!(StackStatus::from_raw("CREATE_IN_PROGRESS"), StackStatus::Creating);
        assert_eq!(StackStatus::from_raw("UPDATE_COMPLETE_CLEANUP_IN_PROGRESS"), StackStatus::Updating);
        assert_eq!(StackStatus::from_raw("UPDATE_ROLLBACK_IN_PROGRESS"), StackStatus::InProgress);
        assert_eq!(StackStatus::from_raw("DELETE_IN_PROGRESS"), StackStatus::InProgress);
        assert_eq!(StackStatus::from_raw("CREATE_COMPLETE"), StackStatus::Complete);
        assert_eq!(StackStatus::from_raw("UPDATE_COMPLETE"), StackStatus::Complete);
        assert_eq!(StackStatus::from_raw("ROLLBACK_COMPLETE"), StackStatus::Failed);
        assert_eq!(StackStatus::from_raw("UPDATE_ROLLBACK_COMPLETE"), StackStatus::Failed);
        assert_eq!(StackStatus::from_raw("CREATE_FAILED"), StackStatus::Failed);
        assert_eq!(StackStatus::from_raw("DELETE_COMPLETE"), StackStatus::Absent);
        assert!(StackStatus::from_raw("review_in_progress").is_in_progress());
    }

    #[test]
    fn nested_stack_name_uses_second_to_last_segment() {
        let physical = "arn:aws:cloudformation:us-east-1:123456789012:stack/Parent-Budgets-1ABC/5f0e-11ee";
        assert_eq!(nested_stack_name(physical).as_deref(), Some("Parent-Budgets-1ABC"));
        assert_eq!(nested_stack_name("plain-name").as_deref(), Some("plain-name"));
        assert_eq!(nested_stack_name("  "), None);
    }

    #[test]
    fn only_nested_stack_resources_yield_names() {
        let bucket = StackResource {
            logical_id: "Bucket".into(),
            physical_id: "cid-data-bucket".into(),
            resource_type: "AWS::S3::Bucket".into(),
        };
        assert_eq!(bucket.nested_stack_name(), None);

        let pending = StackResource {
            logical_id: "Module".into(),
            physical_id: String::new(),
            resource_type: NESTED_STACK_RESOURCE_TYPE.into(),
        };
        assert_eq!(pending.nested_stack_name(), None);
    }

    #[test]
    fn watermark_never_moves_backwards() {
        let mut state = StackState::new("stack");
        let later = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 10).unwrap();
        let earlier = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        state.advance_watermark(later);
        state.advance_watermark(earlier);
        assert_eq!(state.watermark, Some(later));
    }

    #[test]
    fn descriptor_defaults_from_yaml() {
        let yaml = r#"
name: CID-DC-DataCollectionStack
template_url: https://bucket.s3.amazonaws.com/cfn/deploy-data-collection.yaml
parameters:
  ResourcePrefix: CID-DC-
  IncludeBudgetsModule: "yes"
"#;
        let descriptor: StackDescriptor = serde_yaml::from_str(yaml).expect("parse descriptor");
        assert_eq!(descriptor.capabilities.len(), 3);
        assert_eq!(descriptor.creation_policy.timeout_minutes, 60);
        assert_eq!(descriptor.creation_policy.on_failure, OnFailure::Delete);
        let keys: Vec<_> = descriptor.parameters.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["ResourcePrefix", "IncludeBudgetsModule"]);
    }
}
