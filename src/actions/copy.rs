//! Copy build outputs between directories.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use super::{expansion, join_all, template, Action, ActionError};
use crate::context::BuildContext;

/// Copies a file or a directory tree. Relative paths resolve against the root.
///
/// When the source is a file and the destination is an existing directory,
/// the file is copied into it under its own name.
#[derive(Debug, Clone)]
pub struct CopyAction {
    from: String,
    to: String,
    per_platform: bool,
}

impl CopyAction {
    /// Create a copy step from templated source and destination paths.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            per_platform: false,
        }
    }

    /// Copy once per configured platform.
    #[must_use]
    pub fn per_platform(mut self, per_platform: bool) -> Self {
        self.per_platform = per_platform;
        self
    }
}

#[async_trait]
impl Action for CopyAction {
    async fn execute(&self, ctx: &BuildContext) -> Result<(), ActionError> {
        let mut tasks = Vec::new();
        for platform in expansion(ctx, self.per_platform)? {
            let p = platform.as_deref();
            let from = ctx.resolve(template::render(&self.from, ctx, p)?);
            let to = ctx.resolve(template::render(&self.to, ctx, p)?);
            tasks.push(copy_path(from, to));
        }
        join_all(tasks).await
    }

    fn describe(&self) -> String {
        format!("copy {} -> {}", self.from, self.to)
    }
}

async fn copy_path(from: PathBuf, to: PathBuf) -> Result<(), ActionError> {
    let (src, dst) = (from.clone(), to.clone());
    let bytes = tokio::task::spawn_blocking(move || copy_sync(&src, &dst))
        .await
        .map_err(|e| ActionError::Join(e.to_string()))??;
    info!(from = %from.display(), to = %to.display(), size_bytes = bytes, "copied");
    Ok(())
}

fn copy_sync(src: &Path, dst: &Path) -> Result<u64, ActionError> {
    let metadata = std::fs::metadata(src)
        .map_err(|e| ActionError::io(format!("cannot read {}", src.display()), e))?;
    if metadata.is_dir() {
        return copy_dir_recursive(src, dst);
    }

    let target = match src.file_name() {
        Some(name) if dst.is_dir() => dst.join(name),
        _ => dst.to_path_buf(),
    };
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ActionError::io(format!("failed to create {}", parent.display()), e))?;
    }
    std::fs::copy(src, &target).map_err(|e| {
        ActionError::io(
            format!("failed to copy {} to {}", src.display(), target.display()),
            e,
        )
    })
}

/// Recursive directory copy. Returns the total bytes copied.
fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<u64, ActionError> {
    std::fs::create_dir_all(dst)
        .map_err(|e| ActionError::io(format!("failed to create directory {}", dst.display()), e))?;

    let mut total_bytes = 0u64;
    let entries = std::fs::read_dir(src)
        .map_err(|e| ActionError::io(format!("failed to read directory {}", src.display()), e))?;
    for entry in entries {
        let entry = entry.map_err(|e| ActionError::io("failed to read directory entry", e))?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let file_type = entry
            .file_type()
            .map_err(|e| ActionError::io("failed to get file type", e))?;

        if file_type.is_dir() {
            total_bytes = total_bytes.saturating_add(copy_dir_recursive(&src_path, &dst_path)?);
        } else if file_type.is_file() {
            let bytes = std::fs::copy(&src_path, &dst_path).map_err(|e| {
                ActionError::io(
                    format!(
                        "failed to copy {} to {}",
                        src_path.display(),
                        dst_path.display()
                    ),
                    e,
                )
            })?;
            total_bytes = total_bytes.saturating_add(bytes);
        } else {
            debug!(path = %src_path.display(), "skipping special file");
        }
    }

    Ok(total_bytes)
}
