//! Target declarations and structural validation of the dependency graph.
//!
//! Targets are registered in any order; dependency names are resolved only
//! by [`TargetGraph::validate`], once every target has been declared.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::actions::Action;
use crate::context::BuildContext;

/// Structural errors in a target graph. All are detected before any action runs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// Two targets share a name.
    #[error("duplicate target '{0}'")]
    DuplicateTarget(String),
    /// A target depends on a name that was never declared.
    #[error("target '{target}' depends on unknown target '{dependency}'")]
    UnknownDependency {
        /// Declaring target.
        target: String,
        /// The missing dependency.
        dependency: String,
    },
    /// The dependency relation contains a cycle.
    #[error("dependency cycle: {}", format_cycle(.cycle))]
    CyclicDependency {
        /// Cycle members in traversal order.
        cycle: Vec<String>,
    },
    /// The requested goal is not a declared target.
    #[error("unknown target '{0}'")]
    UnknownTarget(String),
}

impl GraphError {
    /// Short stable label for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateTarget(_) => "duplicate_target",
            Self::UnknownDependency { .. } => "unknown_dependency",
            Self::CyclicDependency { .. } => "cyclic_dependency",
            Self::UnknownTarget(_) => "unknown_target",
        }
    }
}

fn format_cycle(cycle: &[String]) -> String {
    let mut parts: Vec<&str> = cycle.iter().map(String::as_str).collect();
    if let Some(first) = cycle.first() {
        parts.push(first);
    }
    parts.join(" -> ")
}

/// Run-time predicate deciding whether a target's action is invoked.
#[derive(Clone, Default)]
pub enum Condition {
    /// Always run.
    #[default]
    Always,
    /// Never run; the target is reported skipped.
    Never,
    /// Decide from the build context.
    Predicate(Arc<dyn Fn(&BuildContext) -> bool + Send + Sync>),
}

impl Condition {
    /// Wrap a closure as a condition.
    pub fn when(predicate: impl Fn(&BuildContext) -> bool + Send + Sync + 'static) -> Self {
        Self::Predicate(Arc::new(predicate))
    }

    /// Evaluate against a context.
    pub fn evaluate(&self, ctx: &BuildContext) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Predicate(predicate) => predicate(ctx),
        }
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => f.write_str("Always"),
            Self::Never => f.write_str("Never"),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// A named build step. Immutable once built.
#[derive(Clone)]
pub struct Target {
    name: String,
    dependencies: Vec<String>,
    condition: Condition,
    action: Arc<dyn Action>,
}

impl Target {
    /// Create a target with no dependencies that always runs.
    pub fn new(name: impl Into<String>, action: Arc<dyn Action>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            condition: Condition::Always,
            action,
        }
    }

    /// Set the dependencies. Repeated names collapse to their first occurrence.
    #[must_use]
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut deduped: Vec<String> = Vec::new();
        for dep in dependencies {
            let dep = dep.into();
            if !deduped.contains(&dep) {
                deduped.push(dep);
            }
        }
        self.dependencies = deduped;
        self
    }

    /// Set the run-time condition.
    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }

    /// Target name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dependencies in declaration order.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Run-time condition.
    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    /// The work performed when the target is due.
    pub fn action(&self) -> &Arc<dyn Action> {
        &self.action
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("condition", &self.condition)
            .field("action", &self.action.describe())
            .finish()
    }
}

/// The set of declared targets.
#[derive(Debug, Clone, Default)]
pub struct TargetGraph {
    targets: Vec<Target>,
    index: HashMap<String, usize>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

impl TargetGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a target. Dependencies are checked later by [`Self::validate`].
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateTarget`] if the name is already registered.
    pub fn add_target(&mut self, target: Target) -> Result<(), GraphError> {
        if self.index.contains_key(target.name()) {
            return Err(GraphError::DuplicateTarget(target.name().to_owned()));
        }
        self.index.insert(target.name().to_owned(), self.targets.len());
        self.targets.push(target);
        Ok(())
    }

    /// Check that every dependency resolves and that the graph is acyclic.
    ///
    /// # Errors
    ///
    /// Returns the first [`GraphError::UnknownDependency`] in declaration
    /// order, otherwise [`GraphError::CyclicDependency`] for the first back-edge found.
    pub fn validate(&self) -> Result<(), GraphError> {
        for target in &self.targets {
            if let Some(missing) = target.dependencies().iter().find(|d| !self.contains(d)) {
                return Err(GraphError::UnknownDependency {
                    target: target.name().to_owned(),
                    dependency: missing.clone(),
                });
            }
        }

        let mut marks = vec![Mark::Unvisited; self.targets.len()];
        for start in 0..self.targets.len() {
            if marks[start] == Mark::Unvisited {
                self.visit(start, &mut marks)?;
            }
        }
        Ok(())
    }

    /// Three-color DFS from `start` over an explicit stack of
    /// `(node, next dependency)` frames.
    fn visit(&self, start: usize, marks: &mut [Mark]) -> Result<(), GraphError> {
        marks[start] = Mark::InProgress;
        let mut frames = vec![(start, 0usize)];

        while let Some(frame) = frames.last_mut() {
            let (node, cursor) = *frame;
            let Some(dep) = self.targets[node].dependencies().get(cursor) else {
                frames.pop();
                marks[node] = Mark::Done;
                continue;
            };
            frame.1 = cursor.saturating_add(1);
            let Some(&next) = self.index.get(dep) else {
                continue;
            };
            match marks[next] {
                Mark::Done => {}
                Mark::Unvisited => {
                    marks[next] = Mark::InProgress;
                    frames.push((next, 0));
                }
                Mark::InProgress => {
                    // The frames from `next` upward are exactly the cycle.
                    let from = frames.iter().position(|&(n, _)| n == next).unwrap_or_default();
                    let cycle = frames[from..]
                        .iter()
                        .map(|&(n, _)| self.targets[n].name().to_owned())
                        .collect();
                    return Err(GraphError::CyclicDependency { cycle });
                }
            }
        }
        Ok(())
    }

    /// Look up a target by name.
    pub fn get(&self, name: &str) -> Option<&Target> {
        self.index.get(name).map(|&i| &self.targets[i])
    }

    /// Whether a target with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Target names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.targets.iter().map(Target::name)
    }

    /// Targets in declaration order.
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Number of targets.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether no targets are declared.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
