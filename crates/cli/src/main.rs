use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use pipewatch_api::GatewayClient;
use pipewatch_engine::{ExecutionReport, Pipeline, PipelineConfig, Services, function_identifiers};
use pipewatch_types::DefinitionNode;
use pipewatch_util::{SystemClock, ThreadSleeper};
use tracing::{error, info};

/// Deploy a multi-stack data pipeline, trigger its workflows and watch them finish.
#[derive(Debug, Parser)]
#[command(name = "pipewatch", version, about)]
struct Cli {
    /// Pipeline configuration file (defaults to $PIPEWATCH_CONFIG_PATH, then the user config dir).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Deploy every configured stack and wait until they settle.
    Deploy,
    /// Wait until the named stacks (and their nested stacks) settle.
    Watch {
        #[arg(required = true, value_name = "STACK")]
        stacks: Vec<String>,
    },
    /// Start the configured workflows and follow them to completion.
    Trigger {
        /// Return once the workflows are started.
        #[arg(long)]
        no_wait: bool,
    },
    /// Deploy, trigger and report in one go.
    Run,
    /// Delete every configured stack and purge its log groups.
    Teardown {
        /// Skip the countdown before deleting.
        #[arg(long)]
        yes: bool,
    },
    /// Print the function identifiers referenced by a workflow definition file.
    Deps {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            error!(error = %format!("{err:#}"), "pipewatch failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = if verbose > 0 { "debug" } else { "info" };
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.into());
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).try_init();
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Deps { file } => print_dependencies(&file),
        command => {
            let config = PipelineConfig::load(cli.config.as_deref()).context("failed to load pipeline configuration")?;
            run_pipeline(&config, command)
        }
    }
}

fn run_pipeline(config: &PipelineConfig, command: Command) -> Result<ExitCode> {
    // Provider calls are bridged onto this runtime from the synchronous engine.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let _guard = runtime.enter();

    let client = GatewayClient::new(&config.gateway)?;
    let (clock, sleeper) = (SystemClock, ThreadSleeper);
    let pipeline = Pipeline::new(config, Services::from_provider(&client, &clock, &sleeper));

    match command {
        Command::Deploy => {
            pipeline.deploy_and_watch()?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Watch { stacks } => {
            pipeline.watch(stacks)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Trigger { no_wait } => match pipeline.trigger(!no_wait)? {
            Some(report) => print_report(&report),
            None => {
                info!("workflows triggered");
                Ok(ExitCode::SUCCESS)
            }
        },
        Command::Run => print_report(&pipeline.run()?),
        Command::Teardown { yes } => {
            let report = pipeline.teardown(yes)?;
            if report.failures.is_empty() {
                Ok(ExitCode::SUCCESS)
            } else {
                for (resource, failure) in &report.failures {
                    error!(resource = %resource, error = %failure, "teardown left a resource behind");
                }
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Deps { file } => print_dependencies(&file),
    }
}

fn print_report(report: &ExecutionReport) -> Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(if report.is_success() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn print_dependencies(file: &Path) -> Result<ExitCode> {
    let content = fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))?;
    let document: serde_json::Value =
        serde_yaml::from_str(&content).with_context(|| format!("failed to parse workflow definition {}", file.display()))?;
    for identifier in function_identifiers(&DefinitionNode::from_document(document)) {
        println!("{identifier}");
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::try_parse_from(["pipewatch", "trigger", "--no-wait", "--config", "pipeline.yaml", "-vv"]).expect("parse");
        assert_eq!(cli.config.as_deref(), Some(Path::new("pipeline.yaml")));
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Command::Trigger { no_wait: true }));
    }

    #[test]
    fn watch_requires_a_stack() {
        assert!(Cli::try_parse_from(["pipewatch", "watch"]).is_err());
    }

    #[test]
    fn deps_reads_yaml_definitions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("definition.yaml");
        fs::write(
            &path,
            "States:\n  Collect:\n    Resource: arn:aws:lambda:us-east-1:1:function:collector\n",
        )
        .unwrap();
        assert!(print_dependencies(&path).is_ok());
    }
}
