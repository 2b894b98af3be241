//! # Pipewatch Engine
//!
//! Deploys a multi-stack pipeline, triggers its workflows and follows them to
//! completion. The engine never talks to a network directly; it drives the
//! capability traits from `pipewatch-api` and takes time from an injected
//! [`pipewatch_util::Clock`].
//!
//! ## Flow
//!
//! [`StackDeployer`] → [`StackWatcher`] → [`WorkflowLauncher`] → [`ExecutionMonitor`]
//! → [`summarize`]. [`Pipeline`] strings them together from a [`PipelineConfig`] and
//! adds teardown.
//!
//! ## Usage
//!
//! ```rust
//! use chrono::Utc;
//! use pipewatch_api::InMemoryCloud;
//! use pipewatch_engine::{Pipeline, PipelineConfig, Services};
//! use pipewatch_util::ManualClock;
//!
//! let clock = ManualClock::new(Utc::now());
//! let cloud = InMemoryCloud::new(clock.clone());
//! let config = PipelineConfig::parse("stacks: []\n", "inline")?;
//!
//! let pipeline = Pipeline::new(&config, Services::from_provider(&cloud, &clock, &clock));
//! let report = pipeline.run()?;
//! assert!(report.is_success());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod dependencies;
pub mod deployer;
mod error;
pub mod launcher;
pub mod monitor;
pub mod pipeline;
pub mod poll;
pub mod report;
pub mod watcher;

#[cfg(test)]
mod test_support;

pub use config::{ConfigError, PipelineConfig};
pub use dependencies::{DependencySet, extract, function_identifiers};
pub use deployer::StackDeployer;
pub use error::{EngineError, LaunchFailure};
pub use launcher::{LaunchOutcome, LaunchPlan, WorkflowLauncher};
pub use monitor::{ExecutionMonitor, MonitorSettings};
pub use pipeline::{Pipeline, Services, TeardownReport};
pub use poll::{PollSchedule, PollStep};
pub use report::{ExecutionReport, log_report, summarize};
pub use watcher::{StackWatcher, WatchReport};
