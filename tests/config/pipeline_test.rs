//! Assembling graphs and contexts from build files.

use std::collections::HashMap;
use std::path::Path;

use anvil::actions::template;
use anvil::config::{AnvilConfig, StepConfig};
use anvil::context::BuildContext;
use anvil::executor::{SkipPolicy, TargetStatus};
use anvil::graph::GraphError;
use anvil::pipeline;

const CONDITIONS: &str = r#"
[build]
configuration = "Debug"
ci_configuration = "Release"
platforms = ["x64"]
artifacts_dir = "out"
version = "1.0.0.7"

[build.variables]
channel = "beta"

[[targets]]
name = "always"

[[targets]]
name = "never"
when = "never"

[[targets]]
name = "local"
when = "local"

[[targets]]
name = "ci"
when = "ci"

[[targets]]
name = "flagged"
when = { env = "ANVIL_FLAG" }
"#;

fn config(toml: &str) -> AnvilConfig {
    AnvilConfig::from_toml(toml).expect("parse")
}

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |key| map.get(key).cloned()
}

fn evaluate(config: &AnvilConfig, env: impl Fn(&str) -> Option<String>, ctx: &BuildContext) -> Vec<(String, bool)> {
    let graph = pipeline::assemble(config, env).expect("assemble");
    graph
        .targets()
        .iter()
        .map(|t| (t.name().to_owned(), t.condition().evaluate(ctx)))
        .collect()
}

#[test]
fn conditions_follow_build_kind() {
    let config = config(CONDITIONS);
    let local = BuildContext::new("/repo").with_local(true);
    let ci = BuildContext::new("/repo").with_local(false);

    let on_local: HashMap<String, bool> = evaluate(&config, env_from(&[]), &local).into_iter().collect();
    let on_ci: HashMap<String, bool> = evaluate(&config, env_from(&[]), &ci).into_iter().collect();

    assert!(on_local["always"] && on_ci["always"]);
    assert!(!on_local["never"] && !on_ci["never"]);
    assert!(on_local["local"] && !on_ci["local"]);
    assert!(!on_local["ci"] && on_ci["ci"]);
}

#[test]
fn env_conditions_require_a_non_empty_value() {
    let config = config(CONDITIONS);
    let ctx = BuildContext::new("/repo");

    for (value, expected) in [(None, false), (Some("  "), false), (Some("1"), true)] {
        let pairs: Vec<(&str, &str)> = value.map(|v| ("ANVIL_FLAG", v)).into_iter().collect();
        let due = evaluate(&config, env_from(&pairs), &ctx)
            .into_iter()
            .find(|(name, _)| name == "flagged")
            .map(|(_, due)| due);
        assert_eq!(due, Some(expected), "ANVIL_FLAG={value:?}");
    }
}

#[test]
fn duplicate_target_names_are_rejected() {
    let config = config("[[targets]]\nname = \"a\"\n[[targets]]\nname = \"a\"\n");
    let err = pipeline::assemble(&config, env_from(&[])).expect_err("duplicate");
    assert_eq!(err, GraphError::DuplicateTarget("a".to_owned()));
}

#[test]
fn unknown_dependencies_surface_at_validation() {
    let config = config("[[targets]]\nname = \"a\"\ndepends_on = [\"b\"]\n");
    let graph = pipeline::assemble(&config, env_from(&[])).expect("assembled");
    assert_eq!(graph.validate().expect_err("b missing").kind(), "unknown_dependency");
}

#[test]
fn step_descriptions_reach_the_graph() {
    let config = config(
        r#"
[[targets]]
name = "Compile"
steps = [
  { kind = "clean", dirs = ["obj"] },
  { kind = "exec", program = "cargo", args = ["build"] },
]

[[targets]]
name = "Empty"
"#,
    );
    let graph = pipeline::assemble(&config, env_from(&[])).expect("assemble");

    let compile = graph.get("Compile").expect("declared");
    assert_eq!(compile.action().describe(), "clean obj; cargo build");
    let empty = graph.get("Empty").expect("declared");
    assert_eq!(empty.action().describe(), "no-op");
}

#[test]
fn context_reflects_the_build_section() {
    let mut config = config(CONDITIONS);
    config.build.ci = true;

    let ctx = pipeline::context(&config, Path::new("/repo"));

    assert_eq!(ctx.root(), Path::new("/repo"));
    assert_eq!(ctx.artifacts_dir(), Path::new("/repo/out"));
    assert_eq!(ctx.configuration(), "Release");
    assert_eq!(ctx.platforms(), ["x64"]);
    assert_eq!(ctx.build_version(), Some("1.0.0.7"));
    assert!(!ctx.is_local());
    assert_eq!(ctx.variables().get("channel").map(String::as_str), Some("beta"));
}

#[test]
fn executor_uses_configured_skip_policy() {
    let config = config("[build]\nskip_policy = \"propagate\"\n[[targets]]\nname = \"a\"\n");
    assert_eq!(pipeline::executor(&config).skip_policy(), SkipPolicy::Propagate);
}

#[tokio::test]
async fn assembled_graph_runs_with_skips() {
    let config = config(CONDITIONS);
    let graph = pipeline::assemble(&config, env_from(&[])).expect("assemble");
    let ctx = pipeline::context(&config, Path::new("/repo"));
    let executor = pipeline::executor(&config);

    for name in ["always", "never", "local", "ci"] {
        let plan = executor.plan(&graph, name).expect("plan");
        let report = executor.run(&graph, &plan, &ctx).await;
        assert!(report.succeeded());
        let expected = if name == "always" || name == "local" {
            TargetStatus::Succeeded
        } else {
            TargetStatus::Skipped
        };
        assert_eq!(report.status_of(name), Some(expected), "{name}");
    }
}

// ---------------------------------------------------------------------------
// Example build file
// ---------------------------------------------------------------------------

const EXAMPLE: &str = include_str!("../../anvil.example.toml");

fn example_stamp_path(ci: bool) -> String {
    let mut config = config(EXAMPLE);
    config.apply_overrides(env_from(&[("ANVIL_CI", if ci { "1" } else { "0" })]));
    config.validate().expect("example is valid");
    let files = config
        .targets
        .iter()
        .flat_map(|t| &t.steps)
        .find_map(|step| match step {
            StepConfig::Stamp { files, .. } => files.first().cloned(),
            _ => None,
        })
        .expect("example stamps a binary");
    let ctx = pipeline::context(&config, Path::new("/repo"));
    template::render(&files, &ctx, Some("x64")).expect("render")
}

#[test]
fn example_stamps_the_output_of_the_active_configuration() {
    assert_eq!(example_stamp_path(false), "bin/Debug/x64/ViGEmClient.dll");
    assert_eq!(example_stamp_path(true), "bin/Release/x64/ViGEmClient.dll");
}

#[test]
fn ci_variables_reach_the_context_only_in_ci() {
    let toml = format!("{CONDITIONS}\n[build.ci_variables]\nchannel = \"stable\"\n");
    let mut config = config(&toml);

    let local = pipeline::context(&config, Path::new("/repo"));
    assert_eq!(local.variables().get("channel").map(String::as_str), Some("beta"));

    config.build.ci = true;
    let ci = pipeline::context(&config, Path::new("/repo"));
    assert_eq!(ci.variables().get("channel").map(String::as_str), Some("stable"));
}
