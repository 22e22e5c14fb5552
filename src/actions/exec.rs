//! Launch an external program and judge it by its exit status only.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{expansion, join_all, template, Action, ActionError};
use crate::context::BuildContext;

/// Runs a program with templated arguments, once or once per platform.
///
/// Output is inherited from the parent process. Per-platform invocations run
/// concurrently and all of them finish before the step reports.
#[derive(Debug, Clone)]
pub struct ExecAction {
    program: String,
    args: Vec<String>,
    cwd: Option<String>,
    env: BTreeMap<String, String>,
    per_platform: bool,
}

/// A fully rendered invocation.
#[derive(Debug, Clone)]
struct Invocation {
    program: String,
    args: Vec<String>,
    cwd: PathBuf,
    env: BTreeMap<String, String>,
    platform: Option<String>,
}

impl ExecAction {
    /// Create an exec step.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: None,
            env: BTreeMap::new(),
            per_platform: false,
        }
    }

    /// Working directory, relative to the root. Defaults to the root.
    #[must_use]
    pub fn with_cwd(mut self, cwd: Option<String>) -> Self {
        self.cwd = cwd;
        self
    }

    /// Extra environment variables for the child.
    #[must_use]
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Run once per configured platform.
    #[must_use]
    pub fn per_platform(mut self, per_platform: bool) -> Self {
        self.per_platform = per_platform;
        self
    }

    fn invocation(&self, ctx: &BuildContext, platform: Option<String>) -> Result<Invocation, ActionError> {
        let p = platform.as_deref();
        let args = self
            .args
            .iter()
            .map(|a| template::render(a, ctx, p))
            .collect::<Result<Vec<_>, _>>()?;
        let cwd = match &self.cwd {
            Some(cwd) => ctx.resolve(template::render(cwd, ctx, p)?),
            None => ctx.root().to_path_buf(),
        };
        let env = self
            .env
            .iter()
            .map(|(k, v)| template::render(v, ctx, p).map(|v| (k.clone(), v)))
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        Ok(Invocation {
            program: template::render(&self.program, ctx, p)?,
            args,
            cwd,
            env,
            platform,
        })
    }
}

#[async_trait]
impl Action for ExecAction {
    async fn execute(&self, ctx: &BuildContext) -> Result<(), ActionError> {
        let invocations = expansion(ctx, self.per_platform)?
            .into_iter()
            .map(|platform| self.invocation(ctx, platform))
            .collect::<Result<Vec<_>, _>>()?;

        join_all(invocations.into_iter().map(run).collect()).await
    }

    fn describe(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        if self.per_platform {
            line.push_str(" (per platform)");
        }
        line
    }
}

async fn run(invocation: Invocation) -> Result<(), ActionError> {
    let started = Instant::now();
    debug!(
        program = %invocation.program,
        args = ?invocation.args,
        cwd = %invocation.cwd.display(),
        platform = invocation.platform.as_deref().unwrap_or("-"),
        "spawning process"
    );

    let status = tokio::process::Command::new(&invocation.program)
        .args(&invocation.args)
        .current_dir(&invocation.cwd)
        .envs(&invocation.env)
        .kill_on_drop(true)
        .status()
        .await
        .map_err(|source| ActionError::Spawn {
            program: invocation.program.clone(),
            source,
        })?;

    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    if !status.success() {
        return Err(ActionError::ProcessFailed {
            program: invocation.program,
            status: status.to_string(),
        });
    }

    info!(
        program = %invocation.program,
        platform = invocation.platform.as_deref().unwrap_or("-"),
        duration_ms,
        "process finished"
    );
    Ok(())
}
