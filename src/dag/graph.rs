// src/dag/graph.rs

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use thiserror::Error;

use crate::dag::TaskSpec;
use crate::engine::TaskName;

/// Build-time graph validation errors.
///
/// Any of these is fatal: the run never starts and no task is dispatched.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("duplicate task name '{0}'")]
    DuplicateTask(TaskName),

    #[error("task '{task}' depends on unknown task '{dep}'")]
    UnknownDependency { task: TaskName, dep: TaskName },

    #[error("task '{0}' cannot depend on itself")]
    SelfDependency(TaskName),

    #[error("cycle detected in task graph involving task '{0}'")]
    Cycle(TaskName),
}

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone)]
struct DagNode {
    /// Direct dependencies: tasks that must complete before this one can run.
    deps: Vec<TaskName>,
    /// Direct dependents: tasks that depend on this one.
    dependents: Vec<TaskName>,
    /// Declaration order, used for deterministic priority tie-breaks.
    order: usize,
}

/// Immutable-after-build dependency graph keyed by task name.
///
/// Validation happens once in [`TaskGraph::build`]; after that the graph only
/// answers adjacency queries. Readiness is *not* computed here — the state
/// store keeps a remaining-dependency counter per task and uses
/// [`TaskGraph::dependents_of`] so that completing one task only re-examines
/// its direct dependents.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    specs: Vec<TaskSpec>,
    nodes: HashMap<TaskName, DagNode>,
}

impl TaskGraph {
    /// Build and validate a graph from a set of task specs.
    ///
    /// Rejects, in order: duplicate names, self-dependencies, references to
    /// nonexistent tasks, and cycles (via a petgraph topological sort). A
    /// graph that builds successfully is guaranteed acyclic.
    pub fn build(specs: Vec<TaskSpec>) -> Result<Self, GraphError> {
        let mut nodes: HashMap<TaskName, DagNode> = HashMap::new();

        for (order, spec) in specs.iter().enumerate() {
            for dep in &spec.after {
                if *dep == spec.name {
                    return Err(GraphError::SelfDependency(spec.name.clone()));
                }
            }
            let prev = nodes.insert(
                spec.name.clone(),
                DagNode {
                    deps: spec.after.clone(),
                    dependents: Vec::new(),
                    order,
                },
            );
            if prev.is_some() {
                return Err(GraphError::DuplicateTask(spec.name.clone()));
            }
        }

        for spec in &specs {
            for dep in &spec.after {
                if !nodes.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        task: spec.name.clone(),
                        dep: dep.clone(),
                    });
                }
            }
        }

        // Populate the dependents index now that all references are known
        // to be valid.
        for spec in &specs {
            for dep in &spec.after {
                if let Some(node) = nodes.get_mut(dep) {
                    node.dependents.push(spec.name.clone());
                }
            }
        }

        check_acyclic(&specs)?;

        Ok(Self { specs, nodes })
    }

    /// All task specs in declaration order.
    pub fn specs(&self) -> &[TaskSpec] {
        &self.specs
    }

    /// All task names.
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|s| s.name.as_str())
    }

    /// Number of tasks in the graph.
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Immediate dependencies of a task.
    pub fn dependencies_of(&self, name: &str) -> &[TaskName] {
        self.nodes
            .get(name)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a task (tasks that list this one in `after`).
    pub fn dependents_of(&self, name: &str) -> &[TaskName] {
        self.nodes
            .get(name)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Declaration index of a task, used for stable tie-breaks.
    pub fn order_of(&self, name: &str) -> usize {
        self.nodes.get(name).map(|n| n.order).unwrap_or(usize::MAX)
    }

    /// Tasks with no dependencies.
    pub fn roots(&self) -> impl Iterator<Item = &str> {
        self.specs
            .iter()
            .filter(|s| s.after.is_empty())
            .map(|s| s.name.as_str())
    }
}

/// Reject cyclic dependency relations.
///
/// Edge direction: dep -> task. A topological sort fails exactly when the
/// relation contains a cycle.
fn check_acyclic(specs: &[TaskSpec]) -> Result<(), GraphError> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for spec in specs {
        graph.add_node(spec.name.as_str());
    }
    for spec in specs {
        for dep in &spec.after {
            graph.add_edge(dep.as_str(), spec.name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(GraphError::Cycle(cycle.node_id().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, after: &[&str]) -> TaskSpec {
        let mut s = TaskSpec::new(name, "test");
        s.after = after.iter().map(|d| d.to_string()).collect();
        s
    }

    #[test]
    fn builds_diamond_and_indexes_dependents() {
        let g = TaskGraph::build(vec![
            spec("a", &[]),
            spec("b", &["a"]),
            spec("c", &["a"]),
            spec("d", &["b", "c"]),
        ])
        .unwrap();

        assert_eq!(g.len(), 4);
        let mut deps_of_a: Vec<_> = g.dependents_of("a").to_vec();
        deps_of_a.sort();
        assert_eq!(deps_of_a, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(g.dependencies_of("d"), &["b".to_string(), "c".to_string()]);
        assert_eq!(g.roots().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn rejects_self_loop() {
        let err = TaskGraph::build(vec![spec("a", &["a"])]).unwrap_err();
        assert!(matches!(err, GraphError::SelfDependency(name) if name == "a"));
    }

    #[test]
    fn rejects_cycle() {
        let err =
            TaskGraph::build(vec![spec("a", &["b"]), spec("b", &["a"])]).unwrap_err();
        assert!(matches!(err, GraphError::Cycle(_)));
    }

    #[test]
    fn rejects_duplicate_and_dangling() {
        let err = TaskGraph::build(vec![spec("a", &[]), spec("a", &[])]).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateTask(_)));

        let err = TaskGraph::build(vec![spec("a", &["ghost"])]).unwrap_err();
        assert!(matches!(err, GraphError::UnknownDependency { .. }));
    }
}
