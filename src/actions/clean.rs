//! Remove build output directories.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use super::{template, Action, ActionError};
use crate::context::BuildContext;

/// Deletes directories (recursively) under the repository root.
#[derive(Debug, Clone)]
pub struct CleanAction {
    dirs: Vec<String>,
}

impl CleanAction {
    /// Create a clean step for templated directory paths.
    pub fn new(dirs: Vec<String>) -> Self {
        Self { dirs }
    }
}

#[async_trait]
impl Action for CleanAction {
    async fn execute(&self, ctx: &BuildContext) -> Result<(), ActionError> {
        for dir in &self.dirs {
            let rendered = template::render(dir, ctx, None)?;
            let path = guarded_path(ctx.root(), Path::new(&rendered))?;

            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => info!(path = %path.display(), "removed directory"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "directory already absent");
                }
                Err(e) => {
                    return Err(ActionError::io(
                        format!("failed to remove {}", path.display()),
                        e,
                    ))
                }
            }
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("clean {}", self.dirs.join(", "))
    }
}

/// Resolve `requested` against `root` and refuse anything that is not
/// strictly below it.
fn guarded_path(root: &Path, requested: &Path) -> Result<PathBuf, ActionError> {
    let normalized = normalize_path(&root.join(requested));
    let root = normalize_path(root);
    if normalized == root || !normalized.starts_with(&root) {
        return Err(ActionError::Failed(format!(
            "refusing to clean '{}': not inside '{}'",
            requested.display(),
            root.display()
        )));
    }
    Ok(normalized)
}

/// Normalize a path by resolving `.` and `..` components without filesystem access.
fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                components.pop();
            }
            Component::CurDir => {}
            other => components.push(other),
        }
    }
    components.iter().collect()
}
