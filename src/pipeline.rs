//! Turn a loaded build file into a target graph and a build context.
//!
//! Each target record is built once here and never mutated afterwards.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::actions::{Action, CleanAction, CopyAction, ExecAction, Sequence, StampAction, VersionAttributes};
use crate::config::{AnvilConfig, StepConfig, TargetConfig, When};
use crate::context::BuildContext;
use crate::executor::Executor;
use crate::graph::{Condition, GraphError, Target, TargetGraph};

/// Build the target graph for a configuration.
///
/// `env` resolves `{ env = "VAR" }` conditions; the driver passes the process
/// environment, tests pass a map.
///
/// # Errors
///
/// Returns [`GraphError::DuplicateTarget`] when two targets share a name.
/// Dependencies are not resolved here; see [`TargetGraph::validate`].
pub fn assemble(config: &AnvilConfig, env: impl Fn(&str) -> Option<String>) -> Result<TargetGraph, GraphError> {
    let attributes = config.version.attributes();
    let mut graph = TargetGraph::new();
    for declared in &config.targets {
        let target = Target::new(declared.name.clone(), action_for(declared, &attributes))
            .with_dependencies(declared.depends_on.iter().cloned())
            .with_condition(condition_for(&declared.when, &env));
        debug!(target_name = %declared.name, steps = declared.steps.len(), "declared target");
        graph.add_target(target)?;
    }
    Ok(graph)
}

/// Build the context for a run rooted at `root`.
pub fn context(config: &AnvilConfig, root: &Path) -> BuildContext {
    BuildContext::new(root)
        .with_artifacts_dir(&config.build.artifacts_dir)
        .with_configuration(config.effective_configuration())
        .with_platforms(config.build.platforms.iter().cloned())
        .with_build_version(config.build.version.clone())
        .with_local(!config.build.ci)
        .with_variables(config.effective_variables())
}

/// Build the executor with the configured skip policy.
pub fn executor(config: &AnvilConfig) -> Executor {
    Executor::new().with_skip_policy(config.build.skip_policy)
}

fn action_for(target: &TargetConfig, attributes: &VersionAttributes) -> Arc<dyn Action> {
    let steps = target
        .steps
        .iter()
        .map(|step| step_action(step, attributes))
        .collect();
    Arc::new(Sequence::new(steps))
}

fn step_action(step: &StepConfig, attributes: &VersionAttributes) -> Arc<dyn Action> {
    match step {
        StepConfig::Clean { dirs } => Arc::new(CleanAction::new(dirs.clone())),
        StepConfig::Exec {
            program,
            args,
            cwd,
            env,
            per_platform,
        } => Arc::new(
            ExecAction::new(program.clone(), args.clone())
                .with_cwd(cwd.clone())
                .with_env(env.clone())
                .per_platform(*per_platform),
        ),
        StepConfig::Copy {
            from,
            to,
            per_platform,
        } => Arc::new(CopyAction::new(from.clone(), to.clone()).per_platform(*per_platform)),
        StepConfig::Stamp {
            files,
            per_platform,
        } => Arc::new(StampAction::new(files.clone(), attributes.clone()).per_platform(*per_platform)),
    }
}

fn condition_for(when: &When, env: &impl Fn(&str) -> Option<String>) -> Condition {
    match when {
        When::Always => Condition::Always,
        When::Never => Condition::Never,
        When::Local => Condition::when(BuildContext::is_local),
        When::Ci => Condition::when(|ctx| !ctx.is_local()),
        When::Env(var) => {
            if env(var).is_some_and(|v| !v.trim().is_empty()) {
                Condition::Always
            } else {
                Condition::Never
            }
        }
    }
}
