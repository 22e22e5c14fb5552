//! Anvil CLI entry point.
//!
//! `anvil [TARGET]` plans and runs a goal from the build file. `--plan` and
//! `--list` inspect the graph without running anything.
//!
//! Exit codes: 0 when every target succeeded or was skipped, 1 when a target
//! failed, 2 for configuration or graph errors.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use anvil::config::{self, AnvilConfig};
use anvil::executor::{RunError, RunReport};
use anvil::{logging, pipeline};

const EXIT_TARGET_FAILED: u8 = 1;
const EXIT_USAGE: u8 = 2;

/// Anvil: target-graph build runner.
#[derive(Parser)]
#[command(name = "anvil", version, about)]
struct Cli {
    /// Target to build; defaults to `build.default_goal`.
    target: Option<String>,

    /// Build file path (default: `$ANVIL_CONFIG` or `./anvil.toml`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the build configuration name.
    #[arg(long)]
    configuration: Option<String>,

    /// Four-part build version used by stamp steps.
    #[arg(long)]
    build_version: Option<String>,

    /// Treat this as a CI build.
    #[arg(long)]
    ci: bool,

    /// Print the execution plan and exit.
    #[arg(long)]
    plan: bool,

    /// List declared targets and exit.
    #[arg(long)]
    list: bool,

    /// Print the run report as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Also write JSON logs to `DIR/anvil.log`.
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _logging_guard = match &cli.log_dir {
        Some(dir) => match logging::init_with_file(dir) {
            Ok(guard) => Some(guard),
            Err(e) => {
                eprintln!("error: {e:#}");
                return ExitCode::from(EXIT_USAGE);
            }
        },
        None => {
            logging::init_console();
            None
        }
    };

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_USAGE)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config_path = config::resolve_path(cli.config.as_deref());
    let mut config = AnvilConfig::load(Some(&config_path))?;
    apply_flags(&mut config, &cli);
    config.validate()?;

    let graph = pipeline::assemble(&config, |key| std::env::var(key).ok())?;

    if cli.list {
        graph.validate()?;
        for target in graph.targets() {
            if target.dependencies().is_empty() {
                println!("{}", target.name());
            } else {
                println!("{} <- {}", target.name(), target.dependencies().join(", "));
            }
        }
        return Ok(ExitCode::SUCCESS);
    }

    let goal = cli
        .target
        .clone()
        .or_else(|| config.build.default_goal.clone())
        .context("no target given and build.default_goal is not set")?;

    let executor = pipeline::executor(&config);
    let plan = executor.plan(&graph, &goal)?;

    if cli.plan {
        for (index, name) in plan.targets().iter().enumerate() {
            let action = graph
                .get(name)
                .map(|t| t.action().describe())
                .unwrap_or_default();
            println!("{:>2}. {name}  [{action}]", index.saturating_add(1));
        }
        return Ok(ExitCode::SUCCESS);
    }

    let root = build_root(&config_path);
    let ctx = pipeline::context(&config, &root);
    let report = executor.run(&graph, &plan, &ctx).await;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("failed to serialize run report")?
        );
    } else {
        print_summary(&report);
    }

    match report.failure() {
        None => Ok(ExitCode::SUCCESS),
        Some(failure) => {
            eprintln!("error: {}", describe_failure(failure));
            Ok(ExitCode::from(EXIT_TARGET_FAILED))
        }
    }
}

/// Command-line flags take precedence over env and file values.
fn apply_flags(config: &mut AnvilConfig, cli: &Cli) {
    if let Some(configuration) = &cli.configuration {
        config.build.configuration = configuration.clone();
        config.build.ci_configuration = Some(configuration.clone());
    }
    if let Some(version) = &cli.build_version {
        config.build.version = Some(version.clone());
    }
    if cli.ci {
        config.build.ci = true;
    }
}

/// Paths in the build file are relative to the directory that holds it.
fn build_root(config_path: &Path) -> PathBuf {
    let dir = match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::canonicalize(&dir).unwrap_or(dir)
}

fn print_summary(report: &RunReport) {
    for outcome in &report.outcomes {
        match &outcome.message {
            Some(message) => println!(
                "{:>10}  {}  ({} ms): {message}",
                outcome.status.to_string(),
                outcome.name,
                outcome.duration_ms
            ),
            None => println!(
                "{:>10}  {}  ({} ms)",
                outcome.status.to_string(),
                outcome.name,
                outcome.duration_ms
            ),
        }
    }
}

fn describe_failure(failure: &RunError) -> String {
    let detail = match failure {
        RunError::ActionFailed { source, .. } => source.to_string(),
        other => other.to_string(),
    };
    format!(
        "target '{}' failed [{}]: {detail}",
        failure.target(),
        failure.kind()
    )
}
