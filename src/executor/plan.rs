//! Ordering a goal's transitive dependencies.

use std::collections::HashSet;

use serde::Serialize;

use crate::graph::{GraphError, TargetGraph};

/// Ordered targets needed to reach a goal.
///
/// Every transitive dependency appears exactly once and strictly before its
/// dependents. Ties are broken by dependency declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionPlan {
    goal: String,
    targets: Vec<String>,
}

impl ExecutionPlan {
    /// The requested goal; always the last entry.
    pub fn goal(&self) -> &str {
        &self.goal
    }

    /// Target names in execution order.
    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Number of planned targets.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether the plan is empty. A built plan always contains its goal.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Whether `name` is part of the plan.
    pub fn contains(&self, name: &str) -> bool {
        self.targets.iter().any(|t| t == name)
    }
}

/// Build the plan for `goal`. The graph is validated first.
pub(crate) fn build(graph: &TargetGraph, goal: &str) -> Result<ExecutionPlan, GraphError> {
    if !graph.contains(goal) {
        return Err(GraphError::UnknownTarget(goal.to_owned()));
    }
    graph.validate()?;

    Ok(ExecutionPlan {
        goal: goal.to_owned(),
        targets: post_order(graph, goal),
    })
}

/// Post-order DFS over `(target, next dependency)` frames. The graph is
/// acyclic here, so every frame eventually completes.
fn post_order(graph: &TargetGraph, goal: &str) -> Vec<String> {
    let mut planned: HashSet<&str> = HashSet::new();
    let mut out = Vec::new();
    let Some(root) = graph.get(goal) else {
        return out;
    };
    let mut frames = vec![(root, 0usize)];

    while let Some(frame) = frames.last_mut() {
        let (target, cursor) = *frame;
        match target.dependencies().get(cursor) {
            Some(dep) => {
                frame.1 = cursor.saturating_add(1);
                if planned.contains(dep.as_str()) {
                    continue;
                }
                if let Some(next) = graph.get(dep) {
                    frames.push((next, 0));
                }
            }
            None => {
                frames.pop();
                if planned.insert(target.name()) {
                    out.push(target.name().to_owned());
                }
            }
        }
    }
    out
}
