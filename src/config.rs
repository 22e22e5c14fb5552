//! Build file loading and validation.
//!
//! Loads `anvil.toml` (or `$ANVIL_CONFIG`, or an explicit `--config` path).
//! Environment variables override file values; file values override defaults.
//!
//! Precedence: env vars > config file > defaults. Command-line flags are
//! applied by the driver on top of all three.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;

use crate::actions::VersionAttributes;
use crate::executor::SkipPolicy;

static TARGET_NAME: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_.-]*$"));

// ── Top-level config ────────────────────────────────────────────

/// Top-level build file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AnvilConfig {
    /// Build-wide settings (`[build]`).
    pub build: BuildConfig,
    /// Version resource attributes (`[version]`).
    pub version: VersionConfig,
    /// Declared targets (`[[targets]]`), in declaration order.
    pub targets: Vec<TargetConfig>,
}

impl AnvilConfig {
    /// Load, apply env overrides and validate.
    ///
    /// Path: `explicit`, else `$ANVIL_CONFIG`, else `./anvil.toml`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unparsable or invalid.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::load_with(explicit, |key| std::env::var(key).ok())
    }

    /// Same as [`Self::load`] with a custom env resolver (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unparsable or invalid.
    pub fn load_with(explicit: Option<&Path>, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let path = resolve_path_with(explicit, &env);
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read build file {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded build file");

        let mut config = Self::from_toml(&contents)
            .with_context(|| format!("invalid build file {}", path.display()))?;
        config.apply_overrides(env);
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML string without overrides or validation.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML does not match the schema.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AnvilConfig = toml::from_str(toml_str).context("failed to parse build TOML")?;
        Ok(config)
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability. Invalid values are ignored
    /// with a warning.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("ANVIL_CONFIGURATION") {
            // Forces the configuration for local and CI builds alike.
            self.build.ci_configuration = Some(v.clone());
            self.build.configuration = v;
        }
        if let Some(v) = env("ANVIL_BUILD_VERSION") {
            self.build.version = Some(v);
        }
        if let Some(v) = env("ANVIL_CI") {
            match parse_bool(&v) {
                Some(ci) => self.build.ci = ci,
                None => tracing::warn!(var = "ANVIL_CI", value = %v, "ignoring invalid env override"),
            }
        }
        if let Some(v) = env("ANVIL_PLATFORMS") {
            let platforms: Vec<String> = v
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_owned)
                .collect();
            if platforms.is_empty() {
                tracing::warn!(var = "ANVIL_PLATFORMS", value = %v, "ignoring invalid env override");
            } else {
                self.build.platforms = platforms;
            }
        }
        if let Some(v) = env("ANVIL_ARTIFACTS_DIR") {
            self.build.artifacts_dir = PathBuf::from(v);
        }
    }

    /// Check the invariants the graph cannot express.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first violation found.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.targets.is_empty(), "build file declares no targets");

        let pattern = TARGET_NAME
            .as_ref()
            .map_err(|e| anyhow::anyhow!("target name pattern: {e}"))?;
        for target in &self.targets {
            anyhow::ensure!(
                pattern.is_match(&target.name),
                "invalid target name '{}': must start with a letter and contain only letters, digits, '_', '-' or '.'",
                target.name
            );
        }

        if let Some(goal) = &self.build.default_goal {
            anyhow::ensure!(
                self.targets.iter().any(|t| &t.name == goal),
                "default_goal '{goal}' is not a declared target"
            );
        }

        if self.has_stamp_steps() {
            let missing = self.version.attributes().missing();
            anyhow::ensure!(
                missing.is_empty(),
                "stamp steps require [version] attributes: missing {}",
                missing.join(", ")
            );
            if let Some(version) = &self.build.version {
                version
                    .parse::<verstamp::FourPartVersion>()
                    .map_err(|e| anyhow::anyhow!("build version: {e}"))?;
            }
        }

        Ok(())
    }

    /// Whether any target contains a `stamp` step.
    pub fn has_stamp_steps(&self) -> bool {
        self.targets
            .iter()
            .flat_map(|t| &t.steps)
            .any(|s| matches!(s, StepConfig::Stamp { .. }))
    }

    /// Configuration name for this build: the CI one for CI builds when set.
    pub fn effective_configuration(&self) -> &str {
        match (&self.build.ci_configuration, self.build.ci) {
            (Some(ci_configuration), true) => ci_configuration,
            _ => &self.build.configuration,
        }
    }

    /// Placeholder values for this build, with `ci_variables` layered over
    /// `variables` for CI builds.
    pub fn effective_variables(&self) -> BTreeMap<String, String> {
        let mut variables = self.build.variables.clone();
        if self.build.ci {
            variables.extend(self.build.ci_variables.clone());
        }
        variables
    }
}

/// Path of the build file: `explicit`, else `$ANVIL_CONFIG`, else `./anvil.toml`.
pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
    resolve_path_with(explicit, |key| std::env::var(key).ok())
}

fn resolve_path_with(explicit: Option<&Path>, env: impl Fn(&str) -> Option<String>) -> PathBuf {
    explicit.map_or_else(|| config_path_with(env), Path::to_path_buf)
}

/// Resolve the build file path using a custom env resolver.
fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
    env("ANVIL_CONFIG").map_or_else(|| PathBuf::from("anvil.toml"), PathBuf::from)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

// ── Build config ────────────────────────────────────────────────

/// Build-wide settings (`[build]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Target run when none is given on the command line.
    pub default_goal: Option<String>,
    /// Configuration name for local builds.
    pub configuration: String,
    /// Configuration name for CI builds; falls back to `configuration`.
    pub ci_configuration: Option<String>,
    /// Target platforms for per-platform steps.
    pub platforms: Vec<String>,
    /// Build output directory, relative to the root.
    pub artifacts_dir: PathBuf,
    /// Whether a skipped target also skips its dependents.
    pub skip_policy: SkipPolicy,
    /// Four-part build version used by stamp steps.
    pub version: Option<String>,
    /// Whether this is a CI build.
    pub ci: bool,
    /// Extra `{placeholder}` values for step fields.
    pub variables: BTreeMap<String, String>,
    /// Values that replace entries of `variables` in CI builds.
    pub ci_variables: BTreeMap<String, String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            default_goal: None,
            configuration: "Debug".to_owned(),
            ci_configuration: None,
            platforms: Vec::new(),
            artifacts_dir: PathBuf::from("bin"),
            skip_policy: SkipPolicy::Passthrough,
            version: None,
            ci: false,
            variables: BTreeMap::new(),
            ci_variables: BTreeMap::new(),
        }
    }
}

// ── Version config ──────────────────────────────────────────────

/// Text attributes written by stamp steps (`[version]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VersionConfig {
    /// `CompanyName`.
    pub company_name: String,
    /// `FileDescription`.
    pub file_description: String,
    /// `InternalName`.
    pub internal_name: String,
    /// `LegalCopyright`.
    pub legal_copyright: String,
    /// `OriginalFilename`.
    pub original_filename: String,
    /// `ProductName`.
    pub product_name: String,
    /// String table language (default 1033, English-US).
    pub language_id: u16,
    /// String table code page (default 1200, Unicode).
    pub code_page: u16,
}

impl Default for VersionConfig {
    fn default() -> Self {
        Self {
            company_name: String::new(),
            file_description: String::new(),
            internal_name: String::new(),
            legal_copyright: String::new(),
            original_filename: String::new(),
            product_name: String::new(),
            language_id: verstamp::LANG_EN_US,
            code_page: verstamp::CODE_PAGE_UNICODE,
        }
    }
}

impl VersionConfig {
    /// Attributes handed to stamp actions.
    pub fn attributes(&self) -> VersionAttributes {
        VersionAttributes {
            company_name: self.company_name.clone(),
            file_description: self.file_description.clone(),
            internal_name: self.internal_name.clone(),
            legal_copyright: self.legal_copyright.clone(),
            original_filename: self.original_filename.clone(),
            product_name: self.product_name.clone(),
            language_id: self.language_id,
            code_page: self.code_page,
        }
    }
}

// ── Targets ─────────────────────────────────────────────────────

/// One `[[targets]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    /// Unique target name.
    pub name: String,
    /// Targets that must complete first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// When the target's steps run.
    #[serde(default)]
    pub when: When,
    /// Steps run in order when the target is due.
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

/// Run condition of a target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum When {
    /// Always run.
    #[default]
    Always,
    /// Never run; the target is reported skipped.
    Never,
    /// Only in local builds.
    Local,
    /// Only in CI builds.
    Ci,
    /// Only when the named environment variable is set and non-empty
    /// (written `{ env = "VAR" }`).
    Env(String),
}

/// One step of a target, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepConfig {
    /// Remove directories below the root.
    Clean {
        /// Templated directory paths.
        dirs: Vec<String>,
    },
    /// Run an external program.
    Exec {
        /// Program to launch.
        program: String,
        /// Templated arguments.
        #[serde(default)]
        args: Vec<String>,
        /// Working directory, relative to the root.
        #[serde(default)]
        cwd: Option<String>,
        /// Extra environment variables.
        #[serde(default)]
        env: BTreeMap<String, String>,
        /// Run once per platform, concurrently.
        #[serde(default)]
        per_platform: bool,
    },
    /// Copy a file or directory.
    Copy {
        /// Templated source path.
        from: String,
        /// Templated destination path.
        to: String,
        /// Copy once per platform.
        #[serde(default)]
        per_platform: bool,
    },
    /// Stamp the build version into binaries.
    Stamp {
        /// Templated binary paths.
        files: Vec<String>,
        /// Stamp once per platform.
        #[serde(default)]
        per_platform: bool,
    },
}
