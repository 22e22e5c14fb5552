//! Registration and structural validation of target graphs.

use std::sync::Arc;

use anvil::actions::{from_fn, Action};
use anvil::graph::{GraphError, Target, TargetGraph};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn noop() -> Arc<dyn Action> {
    from_fn("noop", |_| Ok(()))
}

fn target(name: &str, deps: &[&str]) -> Target {
    Target::new(name, noop()).with_dependencies(deps.iter().copied())
}

fn graph(specs: &[(&str, &[&str])]) -> TargetGraph {
    let mut graph = TargetGraph::new();
    for (name, deps) in specs {
        graph.add_target(target(name, deps)).expect("unique names");
    }
    graph
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

#[test]
fn duplicate_names_are_rejected() {
    let mut graph = TargetGraph::new();
    graph.add_target(target("build", &[])).expect("first");

    let err = graph.add_target(target("build", &[])).expect_err("duplicate");

    assert_eq!(err, GraphError::DuplicateTarget("build".to_owned()));
    assert_eq!(graph.len(), 1);
}

#[test]
fn dependencies_may_be_declared_before_their_targets() {
    let graph = graph(&[("pack", &["compile"]), ("compile", &[])]);
    assert!(graph.validate().is_ok());
}

#[test]
fn repeated_dependencies_collapse_in_declaration_order() {
    let t = target("pack", &["compile", "restore", "compile", "clean", "restore"]);
    assert_eq!(t.dependencies(), ["compile", "restore", "clean"]);
}

#[test]
fn names_keep_declaration_order() {
    let graph = graph(&[("b", &[]), ("a", &[]), ("c", &[])]);
    assert_eq!(graph.names().collect::<Vec<_>>(), vec!["b", "a", "c"]);
    assert!(graph.contains("a"));
    assert!(graph.get("z").is_none());
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[test]
fn unknown_dependency_is_reported() {
    let graph = graph(&[("compile", &["restore"])]);

    let err = graph.validate().expect_err("missing restore");

    assert_eq!(
        err,
        GraphError::UnknownDependency {
            target: "compile".to_owned(),
            dependency: "restore".to_owned(),
        }
    );
    assert_eq!(err.kind(), "unknown_dependency");
}

#[test]
fn two_node_cycle_names_both_members() {
    let graph = graph(&[("a", &["b"]), ("b", &["a"])]);

    let err = graph.validate().expect_err("cycle");

    match err {
        GraphError::CyclicDependency { cycle } => {
            assert_eq!(cycle.len(), 2);
            assert!(cycle.contains(&"a".to_owned()));
            assert!(cycle.contains(&"b".to_owned()));
        }
        other => panic!("expected cycle, got {other}"),
    }
}

#[test]
fn self_dependency_is_a_cycle() {
    let graph = graph(&[("a", &["a"])]);
    let err = graph.validate().expect_err("self cycle");
    assert_eq!(
        err,
        GraphError::CyclicDependency {
            cycle: vec!["a".to_owned()]
        }
    );
}

#[test]
fn cycle_excludes_the_path_leading_into_it() {
    let graph = graph(&[("entry", &["x"]), ("x", &["y"]), ("y", &["z"]), ("z", &["x"])]);

    let err = graph.validate().expect_err("cycle");

    assert_eq!(
        err,
        GraphError::CyclicDependency {
            cycle: vec!["x".to_owned(), "y".to_owned(), "z".to_owned()]
        }
    );
    assert_eq!(err.to_string(), "dependency cycle: x -> y -> z -> x");
}

#[test]
fn diamond_is_not_a_cycle() {
    let graph = graph(&[
        ("top", &["left", "right"]),
        ("left", &["base"]),
        ("right", &["base"]),
        ("base", &[]),
    ]);
    assert!(graph.validate().is_ok());
}

#[test]
fn unknown_dependency_is_reported_before_cycles() {
    let graph = graph(&[("a", &["b"]), ("b", &["a", "ghost"])]);
    let err = graph.validate().expect_err("invalid");
    assert_eq!(err.kind(), "unknown_dependency");
}

// ---------------------------------------------------------------------------
// Depth
// ---------------------------------------------------------------------------

const DEEP: usize = 100_000;

/// `step{DEEP-1}` -> ... -> `step0`, declared deepest first.
fn deep_chain(close_loop: bool) -> TargetGraph {
    let mut graph = TargetGraph::new();
    for i in (0..DEEP).rev() {
        let name = format!("step{i}");
        let dep = match i {
            0 if close_loop => Some(format!("step{}", DEEP - 1)),
            0 => None,
            _ => Some(format!("step{}", i - 1)),
        };
        graph
            .add_target(Target::new(name, noop()).with_dependencies(dep))
            .expect("unique names");
    }
    graph
}

#[test]
fn very_deep_chain_validates() {
    deep_chain(false).validate().expect("acyclic");
}

#[test]
fn very_deep_cycle_is_reported_whole() {
    let err = deep_chain(true).validate().expect_err("closed loop");
    match err {
        GraphError::CyclicDependency { cycle } => {
            assert_eq!(cycle.len(), DEEP);
            assert_eq!(cycle.first().map(String::as_str), Some("step99999"));
            assert_eq!(cycle.last().map(String::as_str), Some("step0"));
        }
        other => panic!("expected a cycle, got {other:?}"),
    }
}
