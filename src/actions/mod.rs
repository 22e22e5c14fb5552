//! Units of work performed by targets.
//!
//! The executor only sees the [`Action`] trait. Built-in kinds cover what a
//! build file can express (`clean`, `exec`, `copy`, `stamp`); anything else
//! plugs in through [`from_fn`] or a custom implementation.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;

use crate::context::BuildContext;

pub mod clean;
pub mod copy;
pub mod exec;
pub mod stamp;
pub mod template;

pub use clean::CleanAction;
pub use copy::CopyAction;
pub use exec::ExecAction;
pub use stamp::{StampAction, VersionAttributes};

/// Errors produced by actions.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// The external program could not be started.
    #[error("failed to start '{program}': {source}")]
    Spawn {
        /// Program that was launched.
        program: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
    /// The external program exited unsuccessfully.
    #[error("'{program}' failed with {status}")]
    ProcessFailed {
        /// Program that was launched.
        program: String,
        /// Exit status as reported by the OS.
        status: String,
    },
    /// A filesystem operation failed.
    #[error("{context}: {source}")]
    Io {
        /// What was being done.
        context: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Stamping a binary failed.
    #[error(transparent)]
    Stamp(#[from] verstamp::StampError),
    /// A templated field could not be rendered.
    #[error("cannot render '{template}': {reason}")]
    Template {
        /// The template text.
        template: String,
        /// Why rendering failed.
        reason: String,
    },
    /// A stamp step ran without a resolved build version.
    #[error("no build version set; pass --build-version or set build.version")]
    MissingVersion,
    /// A spawned task panicked or was cancelled.
    #[error("task failed: {0}")]
    Join(String),
    /// Any other failure reported by a custom action.
    #[error("{0}")]
    Failed(String),
}

impl ActionError {
    /// Short stable label for the error kind, used in CLI diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Spawn { .. } => "spawn",
            Self::ProcessFailed { .. } => "process_failed",
            Self::Io { .. } => "io",
            Self::Stamp(e) => e.kind(),
            Self::Template { .. } => "template",
            Self::MissingVersion => "missing_version",
            Self::Join(_) => "join",
            Self::Failed(_) => "action_failed",
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Work performed when a target is due.
#[async_trait]
pub trait Action: Send + Sync {
    /// Perform the work.
    async fn execute(&self, ctx: &BuildContext) -> Result<(), ActionError>;

    /// One-line description for logs and `--plan` output.
    fn describe(&self) -> String;
}

/// Adapter turning a closure into an [`Action`].
pub struct FnAction<F> {
    label: String,
    func: F,
}

/// Wrap a synchronous closure as an action.
pub fn from_fn<F>(label: impl Into<String>, func: F) -> Arc<dyn Action>
where
    F: Fn(&BuildContext) -> Result<(), ActionError> + Send + Sync + 'static,
{
    Arc::new(FnAction {
        label: label.into(),
        func,
    })
}

#[async_trait]
impl<F> Action for FnAction<F>
where
    F: Fn(&BuildContext) -> Result<(), ActionError> + Send + Sync,
{
    async fn execute(&self, ctx: &BuildContext) -> Result<(), ActionError> {
        (self.func)(ctx)
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

/// Runs several actions one after another, stopping at the first error.
#[derive(Clone, Default)]
pub struct Sequence {
    steps: Vec<Arc<dyn Action>>,
}

impl Sequence {
    /// Create a sequence from steps in execution order.
    pub fn new(steps: Vec<Arc<dyn Action>>) -> Self {
        Self { steps }
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the sequence does nothing.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[async_trait]
impl Action for Sequence {
    async fn execute(&self, ctx: &BuildContext) -> Result<(), ActionError> {
        for (index, step) in self.steps.iter().enumerate() {
            tracing::debug!(step = index, action = %step.describe(), "running step");
            step.execute(ctx).await?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        if self.steps.is_empty() {
            return "no-op".to_owned();
        }
        self.steps
            .iter()
            .map(|s| s.describe())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Platforms a step expands over: every configured platform when
/// `per_platform` is set, otherwise a single pass with no platform.
pub(crate) fn expansion(ctx: &BuildContext, per_platform: bool) -> Result<Vec<Option<String>>, ActionError> {
    if !per_platform {
        return Ok(vec![None]);
    }
    if ctx.platforms().is_empty() {
        return Err(ActionError::Failed(
            "per-platform step but no platforms are configured".to_owned(),
        ));
    }
    Ok(ctx.platforms().iter().cloned().map(Some).collect())
}

/// Run tasks concurrently and wait for all of them.
///
/// Returns the error of the first failing task in input order, regardless of
/// completion order.
pub(crate) async fn join_all<T>(tasks: Vec<T>) -> Result<(), ActionError>
where
    T: Future<Output = Result<(), ActionError>> + Send + 'static,
{
    let mut results: Vec<Option<Result<(), ActionError>>> = tasks.iter().map(|_| None).collect();
    let mut set = JoinSet::new();
    for (index, task) in tasks.into_iter().enumerate() {
        set.spawn(async move { (index, task.await) });
    }

    let mut join_error = None;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, result)) => {
                if let Some(slot) = results.get_mut(index) {
                    *slot = Some(result);
                }
            }
            Err(e) => {
                join_error.get_or_insert(ActionError::Join(e.to_string()));
            }
        }
    }

    if let Some(err) = results.into_iter().flatten().find_map(Result::err) {
        return Err(err);
    }
    join_error.map_or(Ok(()), Err)
}
