//! Planning and running a goal against a target graph.
//!
//! Targets run strictly one after another in plan order. A false condition
//! marks a target skipped and the run continues ("skip != abort"); a failing
//! action stops the run and every later target is reported not run.

use std::collections::HashMap;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::actions::ActionError;
use crate::context::BuildContext;
use crate::graph::{GraphError, TargetGraph};

mod plan;
mod report;

pub use plan::ExecutionPlan;
pub use report::{RunReport, TargetOutcome, TargetStatus};

/// How a skipped target affects its dependents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipPolicy {
    /// Dependents of a skipped target still run.
    #[default]
    Passthrough,
    /// A target with a skipped dependency is skipped too.
    Propagate,
}

/// Error that stopped a run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// A target's action failed.
    #[error("target '{target}' failed: {source}")]
    ActionFailed {
        /// Failing target.
        target: String,
        /// The action's own error.
        #[source]
        source: ActionError,
    },
    /// The plan names a target the graph does not contain.
    #[error("target '{0}' is not in the graph")]
    UnknownTarget(String),
}

impl RunError {
    /// Name of the target that failed.
    pub fn target(&self) -> &str {
        match self {
            Self::ActionFailed { target, .. } | Self::UnknownTarget(target) => target,
        }
    }

    /// Short stable label for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ActionFailed { source, .. } => source.kind(),
            Self::UnknownTarget(_) => "unknown_target",
        }
    }
}

/// Plans and runs goals.
#[derive(Debug, Clone, Copy, Default)]
pub struct Executor {
    skip_policy: SkipPolicy,
}

impl Executor {
    /// Create an executor with the default (passthrough) skip policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how skipped targets affect their dependents.
    #[must_use]
    pub fn with_skip_policy(mut self, skip_policy: SkipPolicy) -> Self {
        self.skip_policy = skip_policy;
        self
    }

    /// Active skip policy.
    pub fn skip_policy(&self) -> SkipPolicy {
        self.skip_policy
    }

    /// Compute the execution order for `goal`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownTarget`] if `goal` is not declared, or any
    /// structural error found by [`TargetGraph::validate`].
    pub fn plan(&self, graph: &TargetGraph, goal: &str) -> Result<ExecutionPlan, GraphError> {
        plan::build(graph, goal)
    }

    /// Run a plan. Never returns early: the report covers every planned target.
    pub async fn run(&self, graph: &TargetGraph, plan: &ExecutionPlan, ctx: &BuildContext) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, goal = plan.goal(), targets = plan.len(), "run started");

        let mut statuses: HashMap<&str, TargetStatus> = HashMap::new();
        let mut outcomes = Vec::with_capacity(plan.len());
        let mut failure: Option<RunError> = None;

        for name in plan.targets() {
            if failure.is_some() {
                outcomes.push(outcome(name, TargetStatus::NotRun, 0, None));
                continue;
            }

            let Some(target) = graph.get(name) else {
                error!(target_name = %name, "planned target missing from graph");
                failure = Some(RunError::UnknownTarget(name.clone()));
                outcomes.push(outcome(name, TargetStatus::Failed, 0, Some("not in graph".to_owned())));
                continue;
            };

            if self.skip_policy == SkipPolicy::Propagate {
                if let Some(dep) = target
                    .dependencies()
                    .iter()
                    .find(|d| statuses.get(d.as_str()) == Some(&TargetStatus::Skipped))
                {
                    let reason = format!("dependency '{dep}' was skipped");
                    info!(target_name = %name, reason = %reason, "target skipped");
                    statuses.insert(name, TargetStatus::Skipped);
                    outcomes.push(outcome(name, TargetStatus::Skipped, 0, Some(reason)));
                    continue;
                }
            }

            if !target.condition().evaluate(ctx) {
                info!(target_name = %name, "target skipped: condition is false");
                statuses.insert(name, TargetStatus::Skipped);
                outcomes.push(outcome(
                    name,
                    TargetStatus::Skipped,
                    0,
                    Some("condition is false".to_owned()),
                ));
                continue;
            }

            info!(target_name = %name, action = %target.action().describe(), "target started");
            let started = Instant::now();
            let result = target.action().execute(ctx).await;
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match result {
                Ok(()) => {
                    info!(target_name = %name, duration_ms, "target succeeded");
                    statuses.insert(name, TargetStatus::Succeeded);
                    outcomes.push(outcome(name, TargetStatus::Succeeded, duration_ms, None));
                }
                Err(source) => {
                    error!(
                        target_name = %name,
                        kind = source.kind(),
                        error = %source,
                        duration_ms,
                        "target failed"
                    );
                    statuses.insert(name, TargetStatus::Failed);
                    outcomes.push(outcome(
                        name,
                        TargetStatus::Failed,
                        duration_ms,
                        Some(source.to_string()),
                    ));
                    failure = Some(RunError::ActionFailed {
                        target: name.clone(),
                        source,
                    });
                }
            }
        }

        let report = RunReport {
            run_id,
            goal: plan.goal().to_owned(),
            started_at,
            finished_at: Utc::now(),
            outcomes,
            failure,
        };
        if report.succeeded() {
            info!(
                %run_id,
                succeeded = report.count(TargetStatus::Succeeded),
                skipped = report.count(TargetStatus::Skipped),
                "run finished"
            );
        } else {
            warn!(
                %run_id,
                not_run = report.count(TargetStatus::NotRun),
                "run aborted"
            );
        }
        report
    }
}

fn outcome(name: &str, status: TargetStatus, duration_ms: u64, message: Option<String>) -> TargetOutcome {
    TargetOutcome {
        name: name.to_owned(),
        status,
        duration_ms,
        message,
    }
}
