//! `{placeholder}` substitution for step fields.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::ActionError;
use crate::context::BuildContext;

static PLACEHOLDER: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}"));

/// Render `template` against the context.
///
/// Built-in names are `root`, `artifacts`, `configuration`, `version` and,
/// inside per-platform steps, `platform`. Any key of the build variables is
/// also available. Built-ins shadow variables of the same name.
///
/// # Errors
///
/// Returns [`ActionError::Template`] for unknown placeholders, `{platform}`
/// outside a per-platform step, or `{version}` without a build version.
pub fn render(template: &str, ctx: &BuildContext, platform: Option<&str>) -> Result<String, ActionError> {
    let pattern = PLACEHOLDER.as_ref().map_err(|e| ActionError::Template {
        template: template.to_owned(),
        reason: e.to_string(),
    })?;

    let mut missing: Option<String> = None;
    let rendered = pattern.replace_all(template, |caps: &Captures<'_>| {
        let name = &caps[1];
        match lookup(name, ctx, platform) {
            Ok(value) => value,
            Err(reason) => {
                missing.get_or_insert(reason);
                String::new()
            }
        }
    });

    match missing {
        Some(reason) => Err(ActionError::Template {
            template: template.to_owned(),
            reason,
        }),
        None => Ok(rendered.into_owned()),
    }
}

fn lookup(name: &str, ctx: &BuildContext, platform: Option<&str>) -> Result<String, String> {
    match name {
        "root" => Ok(ctx.root().display().to_string()),
        "artifacts" => Ok(ctx.artifacts_dir().display().to_string()),
        "configuration" => Ok(ctx.configuration().to_owned()),
        "platform" => platform
            .map(str::to_owned)
            .ok_or_else(|| "{platform} is only available in per-platform steps".to_owned()),
        "version" => ctx
            .build_version()
            .map(str::to_owned)
            .ok_or_else(|| "{version} used but no build version is set".to_owned()),
        other => ctx
            .variables()
            .get(other)
            .cloned()
            .ok_or_else(|| format!("unknown placeholder {{{other}}}")),
    }
}
