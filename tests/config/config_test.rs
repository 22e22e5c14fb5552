//! Build file parsing, validation and loading.

use std::collections::HashMap;
use std::path::PathBuf;

use anvil::config::{AnvilConfig, StepConfig, When};
use anvil::executor::SkipPolicy;

const FULL: &str = r#"
[build]
default_goal = "Pack"
configuration = "Debug"
ci_configuration = "Release"
platforms = ["Win32", "x64"]
artifacts_dir = "out"
skip_policy = "propagate"
version = "3.1.0.42"

[build.variables]
solution = "Device.sln"

[version]
company_name = "Acme Devices"
file_description = "Device helper"
internal_name = "device"
legal_copyright = "(c) Acme"
original_filename = "device.dll"
product_name = "Device SDK"
language_id = 1031

[[targets]]
name = "Clean"
steps = [{ kind = "clean", dirs = ["{artifacts}"] }]

[[targets]]
name = "Restore"
depends_on = ["Clean"]
when = "local"

[[targets]]
name = "Compile"
depends_on = ["Restore"]
when = { env = "ANVIL_COMPILE" }

[[targets.steps]]
kind = "exec"
program = "msbuild"
args = ["{solution}", "/p:Platform={platform}"]
per_platform = true

[[targets.steps]]
kind = "stamp"
files = ["build/{platform}/device.dll"]
per_platform = true

[[targets]]
name = "Pack"
depends_on = ["Compile"]
when = "ci"
steps = [{ kind = "copy", from = "out", to = "dist" }]
"#;

fn with_targets(build: &str, targets: &str) -> String {
    format!("{build}\n{targets}")
}

fn no_env(_: &str) -> Option<String> {
    None
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[test]
fn parses_a_complete_build_file() {
    let config = AnvilConfig::from_toml(FULL).expect("parse");
    config.validate().expect("valid");

    assert_eq!(config.build.default_goal.as_deref(), Some("Pack"));
    assert_eq!(config.build.platforms, vec!["Win32", "x64"]);
    assert_eq!(config.build.artifacts_dir, PathBuf::from("out"));
    assert_eq!(config.build.skip_policy, SkipPolicy::Propagate);
    assert_eq!(config.build.variables.get("solution").map(String::as_str), Some("Device.sln"));
    assert_eq!(config.version.language_id, 1031);
    assert_eq!(config.version.code_page, 1200);

    let names: Vec<&str> = config.targets.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["Clean", "Restore", "Compile", "Pack"]);
    assert_eq!(config.targets[1].when, When::Local);
    assert_eq!(config.targets[2].when, When::Env("ANVIL_COMPILE".to_owned()));
    assert_eq!(config.targets[3].when, When::Ci);
    assert_eq!(config.targets[0].when, When::Always);
    assert!(config.has_stamp_steps());
}

#[test]
fn steps_are_tagged_by_kind() {
    let config = AnvilConfig::from_toml(FULL).expect("parse");
    let compile = &config.targets[2];

    assert_eq!(compile.steps.len(), 2);
    match &compile.steps[0] {
        StepConfig::Exec {
            program,
            args,
            cwd,
            env,
            per_platform,
        } => {
            assert_eq!(program, "msbuild");
            assert_eq!(args, &["{solution}", "/p:Platform={platform}"]);
            assert!(cwd.is_none());
            assert!(env.is_empty());
            assert!(*per_platform);
        }
        other => panic!("expected exec step, got {other:?}"),
    }
    assert_eq!(
        config.targets[3].steps[0],
        StepConfig::Copy {
            from: "out".to_owned(),
            to: "dist".to_owned(),
            per_platform: false,
        }
    );
}

#[test]
fn defaults_apply_when_build_table_is_absent() {
    let config = AnvilConfig::from_toml("[[targets]]\nname = \"build\"\n").expect("parse");

    assert_eq!(config.build.configuration, "Debug");
    assert_eq!(config.build.artifacts_dir, PathBuf::from("bin"));
    assert_eq!(config.build.skip_policy, SkipPolicy::Passthrough);
    assert!(config.build.default_goal.is_none());
    assert!(!config.build.ci);
    assert_eq!(config.effective_configuration(), "Debug");
}

#[test]
fn unknown_step_kind_is_a_parse_error() {
    let toml = "[[targets]]\nname = \"x\"\nsteps = [{ kind = \"deploy\" }]\n";
    assert!(AnvilConfig::from_toml(toml).is_err());
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[test]
fn empty_build_file_is_invalid() {
    let config = AnvilConfig::from_toml("").expect("parse");
    let err = config.validate().expect_err("no targets");
    assert!(err.to_string().contains("no targets"));
}

#[test]
fn target_names_must_be_identifiers() {
    let config = AnvilConfig::from_toml("[[targets]]\nname = \"build all\"\n").expect("parse");
    let err = config.validate().expect_err("space in name");
    assert!(err.to_string().contains("build all"));
}

#[test]
fn default_goal_must_be_declared() {
    let toml = with_targets("[build]\ndefault_goal = \"Deploy\"", "[[targets]]\nname = \"Pack\"");
    let config = AnvilConfig::from_toml(&toml).expect("parse");
    let err = config.validate().expect_err("unknown goal");
    assert!(err.to_string().contains("Deploy"));
}

#[test]
fn stamp_steps_require_version_attributes() {
    let toml = with_targets(
        "[version]\ncompany_name = \"Acme\"",
        "[[targets]]\nname = \"Stamp\"\nsteps = [{ kind = \"stamp\", files = [\"a.dll\"] }]",
    );
    let config = AnvilConfig::from_toml(&toml).expect("parse");

    let err = config.validate().expect_err("attributes missing");

    let message = err.to_string();
    assert!(message.contains("product_name"), "{message}");
    assert!(!message.contains("company_name"), "{message}");
}

#[test]
fn build_version_must_have_four_parts_when_stamping() {
    let mut config = AnvilConfig::from_toml(FULL).expect("parse");
    config.validate().expect("3.1.0.42 is valid");

    config.build.version = Some("3.1.0".to_owned());
    let err = config.validate().expect_err("three parts");
    assert!(err.to_string().starts_with("build version"), "{err}");
}

#[test]
fn build_version_is_free_form_without_stamp_steps() {
    let toml = "[build]\nversion = \"nightly\"\n[[targets]]\nname = \"a\"\n";
    let config = AnvilConfig::from_toml(toml).expect("parse");
    config.validate().expect("no stamp steps");
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

#[test]
fn load_with_reads_explicit_path_and_applies_env() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("anvil.toml");
    std::fs::write(&path, FULL).expect("write");
    let env: HashMap<&str, &str> = [("ANVIL_BUILD_VERSION", "4.0.0.1"), ("ANVIL_CI", "yes")]
        .into_iter()
        .collect();

    let config = AnvilConfig::load_with(Some(path.as_path()), |key| env.get(key).map(|v| (*v).to_owned()))
        .expect("load");

    assert_eq!(config.build.version.as_deref(), Some("4.0.0.1"));
    assert_eq!(config.effective_configuration(), "Release");
}

#[test]
fn load_with_rejects_malformed_env_build_version() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("anvil.toml");
    std::fs::write(&path, FULL).expect("write");

    let err = AnvilConfig::load_with(Some(path.as_path()), |key| {
        (key == "ANVIL_BUILD_VERSION").then(|| "4.0.x.1".to_owned())
    })
    .expect_err("malformed version");

    assert!(format!("{err:#}").contains("4.0.x.1"), "{err:#}");
}

#[test]
fn load_with_uses_anvil_config_variable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("custom.toml");
    std::fs::write(&path, "[[targets]]\nname = \"only\"\n").expect("write");
    let location = path.display().to_string();

    let config = AnvilConfig::load_with(None, |key| (key == "ANVIL_CONFIG").then(|| location.clone()))
        .expect("load");

    assert_eq!(config.targets[0].name, "only");
}

#[test]
fn load_with_reports_missing_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("absent.toml");

    let err = AnvilConfig::load_with(Some(path.as_path()), no_env).expect_err("missing");

    assert!(format!("{err:#}").contains("absent.toml"));
}

#[test]
fn load_with_rejects_invalid_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("anvil.toml");
    std::fs::write(&path, "[[targets]]\nname = 5\n").expect("write");

    assert!(AnvilConfig::load_with(Some(path.as_path()), no_env).is_err());
}
