//! Outcome of one run.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::RunError;

/// Terminal state of a planned target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    /// The action completed.
    Succeeded,
    /// The condition was false (or a dependency was skipped under the propagate policy).
    Skipped,
    /// The action returned an error; the run stopped here.
    Failed,
    /// The run stopped before reaching this target.
    NotRun,
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Succeeded => "succeeded",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::NotRun => "not run",
        })
    }
}

/// What happened to one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetOutcome {
    /// Target name.
    pub name: String,
    /// Terminal state.
    pub status: TargetStatus,
    /// Wall-clock time spent in the action.
    pub duration_ms: u64,
    /// Skip reason or error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Per-target results of a run, in plan order.
#[derive(Debug, Serialize)]
pub struct RunReport {
    /// Unique id for correlating logs.
    pub run_id: Uuid,
    /// Requested goal.
    pub goal: String,
    /// When the run began.
    pub started_at: DateTime<Utc>,
    /// When the run ended.
    pub finished_at: DateTime<Utc>,
    /// One entry per planned target.
    pub outcomes: Vec<TargetOutcome>,
    /// The error that stopped the run, if any.
    #[serde(skip)]
    pub failure: Option<RunError>,
}

impl RunReport {
    /// `true` when every target succeeded or was skipped.
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    /// Status of a target, if it was planned.
    pub fn status_of(&self, name: &str) -> Option<TargetStatus> {
        self.outcomes
            .iter()
            .find(|o| o.name == name)
            .map(|o| o.status)
    }

    /// `(name, status)` pairs in plan order.
    pub fn statuses(&self) -> Vec<(&str, TargetStatus)> {
        self.outcomes
            .iter()
            .map(|o| (o.name.as_str(), o.status))
            .collect()
    }

    /// The first failure.
    pub fn failure(&self) -> Option<&RunError> {
        self.failure.as_ref()
    }

    /// Number of targets in a given state.
    pub fn count(&self, status: TargetStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}
