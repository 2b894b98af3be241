//! Pipeline configuration.
//!
//! One YAML (or JSON) document describes the stacks to deploy, the workflows to
//! trigger, the functions to invoke or tail, and the timing of every poll loop.
//! The file is found through `--config`, then `PIPEWATCH_CONFIG_PATH`, then
//! `<config dir>/pipewatch/pipeline.yaml`.

use std::{
    collections::HashSet,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use dirs_next::config_dir;
use pipewatch_api::GatewaySettings;
use pipewatch_types::{ArnContext, StackDescriptor, is_function_identifier};
use pipewatch_util::expand_tilde;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{
    launcher::{DEFAULT_COOLDOWN_SECS, LaunchPlan},
    monitor::{DEFAULT_LOG_GROUP_PREFIX, MonitorSettings},
    poll::PollSchedule,
};

pub const CONFIG_PATH_ENV: &str = "PIPEWATCH_CONFIG_PATH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read configuration at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse configuration from {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("stack names must not be empty")]
    EmptyStackName,
    #[error("stack '{0}' is declared more than once")]
    DuplicateStack(String),
    #[error("stack '{0}' has no template url")]
    MissingTemplate(String),
    #[error("short workflow or function names need an arn context with a region and an account id")]
    MissingArnContext,
    #[error("{0} contains an empty identifier")]
    EmptyIdentifier(&'static str),
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// Fully qualified workflow identifiers.
    #[serde(default)]
    pub ids: Vec<String>,
    /// Short names expanded through `arn`.
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub arn: Option<ArnContext>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSettings {
    /// Invoked asynchronously before workflows start. Entries that are not full
    /// function identifiers are expanded through `workflows.arn`.
    #[serde(default)]
    pub invoke: Vec<String>,
    /// Never invoked; only their logs are tailed.
    #[serde(default)]
    pub passive: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchSettings {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_max_interval_secs")]
    pub max_interval_secs: u64,
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_log_group_prefix")]
    pub log_group_prefix: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_interval_secs: default_max_interval_secs(),
            settle_secs: default_settle_secs(),
            timeout_secs: None,
            log_group_prefix: default_log_group_prefix(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownSettings {
    /// Countdown before anything is deleted; `--yes` skips it.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    /// Log groups starting with this prefix are deleted after the stacks are gone.
    #[serde(default)]
    pub log_group_prefix: Option<String>,
}

impl Default for TeardownSettings {
    fn default() -> Self {
        Self {
            grace_secs: default_grace_secs(),
            log_group_prefix: None,
        }
    }
}

fn default_interval_secs() -> u64 {
    5
}

fn default_max_interval_secs() -> u64 {
    20
}

fn default_settle_secs() -> u64 {
    20
}

fn default_grace_secs() -> u64 {
    10
}

fn default_cooldown_secs() -> u64 {
    DEFAULT_COOLDOWN_SECS as u64
}

fn default_log_group_prefix() -> String {
    DEFAULT_LOG_GROUP_PREFIX.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub gateway: GatewaySettings,
    /// Stacks in deployment order; teardown walks them backwards.
    #[serde(default)]
    pub stacks: Vec<StackDescriptor>,
    #[serde(default)]
    pub workflows: WorkflowSettings,
    #[serde(default)]
    pub functions: FunctionSettings,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default)]
    pub watch: WatchSettings,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub teardown: TeardownSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            gateway: GatewaySettings::default(),
            stacks: Vec::new(),
            workflows: WorkflowSettings::default(),
            functions: FunctionSettings::default(),
            cooldown_secs: default_cooldown_secs(),
            watch: WatchSettings::default(),
            monitor: MonitorConfig::default(),
            teardown: TeardownSettings::default(),
        }
    }
}

impl PipelineConfig {
    /// Read, parse and validate the configuration file.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = resolve_config_path(explicit);
        debug!(path = %path.display(), "loading pipeline configuration");
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read { path: path.clone(), source })?;
        Self::parse(&content, &path.display().to_string())
    }

    /// Parse and validate a YAML or JSON document. `origin` only labels errors.
    pub fn parse(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
            origin: origin.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for stack in &self.stacks {
            if stack.name.trim().is_empty() {
                return Err(ConfigError::EmptyStackName);
            }
            if !seen.insert(stack.name.as_str()) {
                return Err(ConfigError::DuplicateStack(stack.name.clone()));
            }
            if stack.template_url.trim().is_empty() {
                return Err(ConfigError::MissingTemplate(stack.name.clone()));
            }
        }

        let lists: [(&'static str, &Vec<String>); 4] = [
            ("workflows.ids", &self.workflows.ids),
            ("workflows.names", &self.workflows.names),
            ("functions.invoke", &self.functions.invoke),
            ("functions.passive", &self.functions.passive),
        ];
        for (field, values) in lists {
            if values.iter().any(|value| value.trim().is_empty()) {
                return Err(ConfigError::EmptyIdentifier(field));
            }
        }

        let short_function_names = self
            .functions
            .invoke
            .iter()
            .chain(&self.functions.passive)
            .any(|id| !is_function_identifier(id));
        if !self.workflows.names.is_empty() || short_function_names {
            let complete = self
                .workflows
                .arn
                .as_ref()
                .is_some_and(|arn| !arn.region.trim().is_empty() && !arn.account_id.trim().is_empty());
            if !complete {
                return Err(ConfigError::MissingArnContext);
            }
        }

        let intervals = [
            ("watch.interval_secs", self.watch.interval_secs),
            ("monitor.interval_secs", self.monitor.interval_secs),
            ("monitor.max_interval_secs", self.monitor.max_interval_secs),
        ];
        for (field, value) in intervals {
            if value == 0 {
                return Err(ConfigError::ZeroInterval(field));
            }
        }
        Ok(())
    }

    /// Explicit ids followed by names expanded through the arn context.
    pub fn workflow_ids(&self) -> Vec<String> {
        let mut ids = self.workflows.ids.clone();
        if let Some(arn) = &self.workflows.arn {
            ids.extend(self.workflows.names.iter().map(|name| arn.workflow_id(name)));
        }
        ids
    }

    fn function_ids(&self, entries: &[String]) -> Vec<String> {
        entries
            .iter()
            .map(|entry| match &self.workflows.arn {
                Some(arn) if !is_function_identifier(entry) => arn.function_id(entry),
                _ => entry.clone(),
            })
            .collect()
    }

    pub fn launch_plan(&self) -> LaunchPlan {
        LaunchPlan {
            workflow_ids: self.workflow_ids(),
            invoke_ids: self.function_ids(&self.functions.invoke),
            passive_ids: self.function_ids(&self.functions.passive),
            cooldown: chrono::Duration::seconds(i64::try_from(self.cooldown_secs).unwrap_or(i64::MAX)),
        }
    }

    pub fn watch_schedule(&self) -> PollSchedule {
        PollSchedule::fixed(Duration::from_secs(self.watch.interval_secs)).with_deadline(self.watch.timeout_secs.map(Duration::from_secs))
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            schedule: PollSchedule::growing(
                Duration::from_secs(self.monitor.interval_secs),
                Duration::from_secs(self.monitor.max_interval_secs),
            )
            .with_deadline(self.monitor.timeout_secs.map(Duration::from_secs)),
            settle: Duration::from_secs(self.monitor.settle_secs),
            log_group_prefix: self.monitor.log_group_prefix.clone(),
        }
    }

    pub fn stack_names(&self) -> Vec<String> {
        self.stacks.iter().map(|stack| stack.name.clone()).collect()
    }
}

/// Path used when no `--config` flag is given.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pipewatch")
        .join("pipeline.yaml")
}

pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(path) => expand_tilde(&path.to_string_lossy()),
        None => default_config_path(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
gateway:
  base_url: https://gateway.example.com
stacks:
  - name: CID-DC-ReadPermissions
    template_url: https://bucket.s3.amazonaws.com/read-permissions.yaml
    parameters:
      DataCollectionAccountID: "123456789012"
      IncludeBudgetsModule: "yes"
  - name: CID-DC-Collection
    template_url: https://bucket.s3.amazonaws.com/collection.yaml
    tags:
      branch: main
workflows:
  names: [budgets-StateMachine, inventory-EBS-StateMachine]
  arn:
    region: us-east-1
    account_id: "123456789012"
    resource_prefix: CID-DC-
functions:
  invoke: ["arn:aws:lambda:us-east-1:123456789012:function:CID-DC-account-collector"]
monitor:
  settle_secs: 0
"#;

    #[test]
    fn sample_config_parses_with_defaults() {
        let config = PipelineConfig::parse(SAMPLE, "sample").expect("parse");

        assert_eq!(config.stacks.len(), 2);
        assert_eq!(config.stacks[0].parameters.keys().collect::<Vec<_>>(), vec!["DataCollectionAccountID", "IncludeBudgetsModule"]);
        assert_eq!(config.cooldown_secs, 60);
        assert_eq!(config.watch.interval_secs, 5);
        assert_eq!(config.monitor.max_interval_secs, 20);
        assert_eq!(config.monitor.settle_secs, 0);
        assert_eq!(config.gateway.token_env, "PIPEWATCH_API_TOKEN");
        assert_eq!(
            config.workflow_ids(),
            vec![
                "arn:aws:states:us-east-1:123456789012:stateMachine:CID-DC-budgets-StateMachine".to_string(),
                "arn:aws:states:us-east-1:123456789012:stateMachine:CID-DC-inventory-EBS-StateMachine".to_string(),
            ]
        );
        assert_eq!(config.launch_plan().cooldown, chrono::Duration::seconds(60));
    }

    #[test]
    fn json_documents_are_accepted() {
        let config = PipelineConfig::parse(r#"{"workflows": {"ids": ["wf-1"]}, "cooldown_secs": 30}"#, "inline").expect("parse");
        assert_eq!(config.workflow_ids(), vec!["wf-1".to_string()]);
        assert_eq!(config.cooldown_secs, 30);
    }

    #[test]
    fn duplicate_stacks_are_rejected() {
        let content = r#"
stacks:
  - {name: A, template_url: https://bucket/a.yaml}
  - {name: A, template_url: https://bucket/b.yaml}
"#;
        assert!(matches!(PipelineConfig::parse(content, "inline"), Err(ConfigError::DuplicateStack(name)) if name == "A"));
    }

    #[test]
    fn names_without_arn_context_are_rejected() {
        let content = "workflows:\n  names: [budgets-StateMachine]\n";
        assert!(matches!(PipelineConfig::parse(content, "inline"), Err(ConfigError::MissingArnContext)));

        let short_function = "functions:\n  invoke: [account-collector]\n";
        assert!(matches!(PipelineConfig::parse(short_function, "inline"), Err(ConfigError::MissingArnContext)));
    }

    #[test]
    fn short_function_names_expand_through_the_arn_context() {
        let content = r#"
workflows:
  arn:
    region: eu-west-1
    account_id: "123456789012"
    resource_prefix: CID-DC-
functions:
  invoke: [account-collector]
  passive: ["arn:aws:lambda:eu-west-1:123456789012:function:shared-logger"]
"#;
        let plan = PipelineConfig::parse(content, "inline").expect("parse").launch_plan();

        assert_eq!(
            plan.invoke_ids,
            vec!["arn:aws:lambda:eu-west-1:123456789012:function:CID-DC-account-collector".to_string()]
        );
        assert_eq!(
            plan.passive_ids,
            vec!["arn:aws:lambda:eu-west-1:123456789012:function:shared-logger".to_string()]
        );
    }

    #[test]
    fn empty_template_and_zero_interval_are_rejected() {
        let missing_template = "stacks:\n  - {name: A, template_url: ' '}\n";
        assert!(matches!(PipelineConfig::parse(missing_template, "inline"), Err(ConfigError::MissingTemplate(_))));

        let zero_interval = "watch:\n  interval_secs: 0\n";
        assert!(matches!(
            PipelineConfig::parse(zero_interval, "inline"),
            Err(ConfigError::ZeroInterval("watch.interval_secs"))
        ));

        let empty_id = "functions:\n  passive: ['']\n";
        assert!(matches!(
            PipelineConfig::parse(empty_id, "inline"),
            Err(ConfigError::EmptyIdentifier("functions.passive"))
        ));
    }

    #[test]
    fn load_reads_from_env_override() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipeline.yaml");
        fs::write(&path, SAMPLE).unwrap();

        temp_env::with_var(CONFIG_PATH_ENV, Some(path.to_str().unwrap()), || {
            assert_eq!(default_config_path(), path);
            let config = PipelineConfig::load(None).expect("load");
            assert_eq!(config.stacks.len(), 2);
        });
    }

    #[test]
    fn explicit_path_wins_and_missing_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.yaml");
        temp_env::with_var(CONFIG_PATH_ENV, Some("/nowhere/pipeline.yaml"), || {
            assert_eq!(resolve_config_path(Some(path.as_path())), path);
            assert!(matches!(PipelineConfig::load(Some(path.as_path())), Err(ConfigError::Read { .. })));
        });
    }
}
