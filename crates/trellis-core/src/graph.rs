//! Workflow graph analysis: edge derivation, cycle detection, and
//! reachability.
//!
//! Uses `petgraph` to model step successor edges as a directed graph.
//! Edges come from `next`/`on_success`/`on_failure`, conditional branches,
//! and switch cases. The graph must be acyclic except through `loop` step
//! bodies, which are validated as independent acyclic sub-graphs.

use std::collections::HashMap;

use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;

use trellis_types::workflow::WorkflowStep;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from graph construction. These are Gate-1 material: a bad edge
/// is a validation failure, never a runtime crash.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// An edge names a step id that does not exist.
    #[error("step '{from}' references unknown step '{to}'")]
    UnknownTarget { from: String, to: String },

    /// The successor graph contains a cycle outside loop bodies.
    #[error("cycle detected involving step '{step_id}'")]
    Cycle { step_id: String },

    /// Two steps share an id.
    #[error("duplicate step id '{step_id}'")]
    DuplicateId { step_id: String },
}

// ---------------------------------------------------------------------------
// WorkflowGraph
// ---------------------------------------------------------------------------

/// Directed successor graph over one step sequence (one nesting level).
///
/// Nested loop/scatter bodies get their own graphs via [`validate_nested`].
#[derive(Debug)]
pub struct WorkflowGraph {
    graph: DiGraph<String, ()>,
    nodes: HashMap<String, NodeIndex>,
    order: Vec<String>,
}

impl WorkflowGraph {
    /// Build and validate the successor graph for a step sequence.
    ///
    /// Checks id uniqueness, edge-target existence, and acyclicity.
    pub fn build(steps: &[WorkflowStep]) -> Result<Self, GraphError> {
        let mut graph = DiGraph::<String, ()>::new();
        let mut nodes: HashMap<String, NodeIndex> = HashMap::new();
        let mut order = Vec::with_capacity(steps.len());

        for step in steps {
            if nodes.contains_key(step.id.as_str()) {
                return Err(GraphError::DuplicateId {
                    step_id: step.id.clone(),
                });
            }
            let idx = graph.add_node(step.id.clone());
            nodes.insert(step.id.clone(), idx);
            order.push(step.id.clone());
        }

        for step in steps {
            let from = nodes[step.id.as_str()];
            for target in step.explicit_successors() {
                let to = nodes.get(target).ok_or_else(|| GraphError::UnknownTarget {
                    from: step.id.clone(),
                    to: target.to_string(),
                })?;
                graph.add_edge(from, *to, ());
            }
        }

        toposort(&graph, None).map_err(|cycle| GraphError::Cycle {
            step_id: graph[cycle.node_id()].clone(),
        })?;

        Ok(Self {
            graph,
            nodes,
            order,
        })
    }

    /// All step ids, in declaration order.
    pub fn step_ids(&self) -> &[String] {
        &self.order
    }

    /// Direct successors of a step (empty for unknown ids).
    pub fn successors(&self, step_id: &str) -> Vec<&str> {
        match self.nodes.get(step_id) {
            Some(&idx) => self
                .graph
                .neighbors_directed(idx, petgraph::Direction::Outgoing)
                .map(|n| self.graph[n].as_str())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Direct predecessors of a step (empty for unknown ids).
    pub fn predecessors(&self, step_id: &str) -> Vec<&str> {
        match self.nodes.get(step_id) {
            Some(&idx) => self
                .graph
                .neighbors_directed(idx, petgraph::Direction::Incoming)
                .map(|n| self.graph[n].as_str())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Whether `to` is reachable from `from` through successor edges.
    ///
    /// Used by Gate 2 to reject forward references: a step must not read
    /// the output of a step strictly downstream of it.
    pub fn is_downstream(&self, from: &str, to: &str) -> bool {
        match (self.nodes.get(from), self.nodes.get(to)) {
            (Some(&a), Some(&b)) => a != b && has_path_connecting(&self.graph, a, b, None),
            _ => false,
        }
    }
}

/// Validate every nested body (loop bodies, scatter bodies) as its own
/// acyclic sub-graph, recursively.
pub fn validate_nested(steps: &[WorkflowStep]) -> Result<(), GraphError> {
    for step in steps {
        for body in step.nested_bodies() {
            WorkflowGraph::build(body)?;
            validate_nested(body)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trellis_types::condition::{Condition, ConditionOperator};
    use trellis_types::workflow::StepKind;

    fn step(id: &str, next: Option<&str>) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            name: id.to_string(),
            next: next.map(String::from),
            on_success: None,
            on_failure: None,
            execute_if: None,
            kind: StepKind::Action {
                plugin: "p".to_string(),
                action: "a".to_string(),
                params: json!({}),
            },
        }
    }

    fn conditional(id: &str, true_branch: &str, false_branch: &str) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            name: id.to_string(),
            next: None,
            on_success: None,
            on_failure: None,
            execute_if: None,
            kind: StepKind::Conditional {
                condition: Condition::Simple {
                    field: "{{input.x}}".to_string(),
                    operator: ConditionOperator::Eq,
                    value: json!(true),
                },
                true_branch: Some(true_branch.to_string()),
                false_branch: Some(false_branch.to_string()),
            },
        }
    }

    #[test]
    fn test_linear_chain_builds() {
        let steps = vec![step("a", Some("b")), step("b", Some("c")), step("c", None)];
        let graph = WorkflowGraph::build(&steps).unwrap();
        assert_eq!(graph.step_ids(), &["a", "b", "c"]);
        assert_eq!(graph.successors("a"), vec!["b"]);
        assert_eq!(graph.predecessors("c"), vec!["b"]);
    }

    #[test]
    fn test_branch_edges_from_conditional() {
        let steps = vec![
            conditional("check", "yes", "no"),
            step("yes", None),
            step("no", None),
        ];
        let graph = WorkflowGraph::build(&steps).unwrap();
        let mut succ = graph.successors("check");
        succ.sort();
        assert_eq!(succ, vec!["no", "yes"]);
    }

    #[test]
    fn test_unknown_target_is_error() {
        let steps = vec![step("a", Some("ghost"))];
        let err = WorkflowGraph::build(&steps).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownTarget {
                from: "a".to_string(),
                to: "ghost".to_string()
            }
        );
    }

    #[test]
    fn test_cycle_is_error() {
        let steps = vec![step("a", Some("b")), step("b", Some("a"))];
        let err = WorkflowGraph::build(&steps).unwrap_err();
        assert!(matches!(err, GraphError::Cycle { .. }));
    }

    #[test]
    fn test_duplicate_id_is_error() {
        let steps = vec![step("a", None), step("a", None)];
        let err = WorkflowGraph::build(&steps).unwrap_err();
        assert_eq!(
            err,
            GraphError::DuplicateId {
                step_id: "a".to_string()
            }
        );
    }

    #[test]
    fn test_is_downstream() {
        let steps = vec![step("a", Some("b")), step("b", Some("c")), step("c", None)];
        let graph = WorkflowGraph::build(&steps).unwrap();
        assert!(graph.is_downstream("a", "c"));
        assert!(!graph.is_downstream("c", "a"));
        assert!(!graph.is_downstream("a", "a"));
        assert!(!graph.is_downstream("a", "ghost"));
    }

    #[test]
    fn test_nested_loop_body_validated_independently() {
        let body_ok = vec![step("inner1", Some("inner2")), step("inner2", None)];
        let loop_step = WorkflowStep {
            id: "outer".to_string(),
            name: "outer".to_string(),
            next: None,
            on_success: None,
            on_failure: None,
            execute_if: None,
            kind: StepKind::Loop {
                iterate_over: "{{step0.data.items}}".to_string(),
                loop_steps: body_ok,
                max_iterations: Some(10),
            },
        };
        assert!(validate_nested(std::slice::from_ref(&loop_step)).is_ok());

        let body_cyclic = vec![step("x", Some("y")), step("y", Some("x"))];
        let bad = WorkflowStep {
            kind: StepKind::Loop {
                iterate_over: "{{step0.data.items}}".to_string(),
                loop_steps: body_cyclic,
                max_iterations: None,
            },
            ..loop_step
        };
        assert!(matches!(
            validate_nested(std::slice::from_ref(&bad)),
            Err(GraphError::Cycle { .. })
        ));
    }
}
