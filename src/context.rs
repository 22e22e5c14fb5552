//! Explicit per-run build context threaded through every action.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Everything an action may know about the current build.
///
/// Actions never read the working directory or environment directly; the
/// driver resolves those once and hands this value to the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildContext {
    root: PathBuf,
    artifacts_dir: PathBuf,
    configuration: String,
    platforms: Vec<String>,
    build_version: Option<String>,
    is_local: bool,
    variables: BTreeMap<String, String>,
}

impl BuildContext {
    /// Create a local-build context rooted at `root` with `bin` as the artifacts directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            artifacts_dir: root.join("bin"),
            root,
            configuration: "Debug".to_owned(),
            platforms: Vec::new(),
            build_version: None,
            is_local: true,
            variables: BTreeMap::new(),
        }
    }

    /// Set the artifacts directory. Relative paths resolve against the root.
    #[must_use]
    pub fn with_artifacts_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.artifacts_dir = self.root.join(dir);
        self
    }

    /// Set the build configuration name.
    #[must_use]
    pub fn with_configuration(mut self, configuration: impl Into<String>) -> Self {
        self.configuration = configuration.into();
        self
    }

    /// Set the platform list.
    #[must_use]
    pub fn with_platforms<I, S>(mut self, platforms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.platforms = platforms.into_iter().map(Into::into).collect();
        self
    }

    /// Set the resolved four-part build version.
    #[must_use]
    pub fn with_build_version(mut self, version: Option<String>) -> Self {
        self.build_version = version;
        self
    }

    /// Mark the build as a local (`true`) or CI (`false`) build.
    #[must_use]
    pub fn with_local(mut self, is_local: bool) -> Self {
        self.is_local = is_local;
        self
    }

    /// Set the template variables.
    #[must_use]
    pub fn with_variables(mut self, variables: BTreeMap<String, String>) -> Self {
        self.variables = variables;
        self
    }

    /// Repository root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory that receives build outputs.
    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }

    /// Build configuration name, e.g. `Release_DLL`.
    pub fn configuration(&self) -> &str {
        &self.configuration
    }

    /// Target platforms, e.g. `x64`, `x86`.
    pub fn platforms(&self) -> &[String] {
        &self.platforms
    }

    /// Resolved build version, if any.
    pub fn build_version(&self) -> Option<&str> {
        self.build_version.as_deref()
    }

    /// Whether this is a local developer build rather than CI.
    pub fn is_local(&self) -> bool {
        self.is_local
    }

    /// User-defined template variables.
    pub fn variables(&self) -> &BTreeMap<String, String> {
        &self.variables
    }

    /// Resolve a path against the root unless it is already absolute.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        self.root.join(path)
    }
}
