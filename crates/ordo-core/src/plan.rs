//! Plan validation.
//!
//! A plan is checked once, before its root node execution is created, so a
//! malformed plan never reaches a strategy. Validation builds a `DiGraph` of
//! parent -> child edges and runs `petgraph::algo::toposort` to reject cycles,
//! then resolves every node's step type against the registry.

use std::collections::HashMap;

use ordo_types::plan::{ExecutionMode, Plan};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

use crate::step::StepRegistry;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("start node '{0}' is not part of the plan")]
    MissingStartNode(String),

    #[error("node '{parent}' references unknown child '{child}'")]
    UnknownChild { parent: String, child: String },

    #[error("cycle detected involving node '{0}'")]
    Cycle(String),

    #[error("node '{node}' uses unregistered step type '{step_type}'")]
    UnknownStepType { node: String, step_type: String },

    #[error("node '{node}' declares {declared} mode but its step is registered as {registered}")]
    ModeMismatch {
        node: String,
        declared: ExecutionMode,
        registered: ExecutionMode,
    },
}

/// Check that `plan` is a well-formed tree the engine can execute.
pub fn validate_plan(plan: &Plan, registry: &StepRegistry) -> Result<(), PlanError> {
    if plan.start_node().is_none() {
        return Err(PlanError::MissingStartNode(plan.start_node_id.clone()));
    }

    // Sorted so errors are reported deterministically.
    let mut ids: Vec<&str> = plan.nodes.keys().map(String::as_str).collect();
    ids.sort_unstable();

    let mut graph = DiGraph::<&str, ()>::new();
    let indices: HashMap<&str, _> = ids.iter().map(|id| (*id, graph.add_node(*id))).collect();

    for id in &ids {
        let node = &plan.nodes[*id];
        for child in &node.child_ids {
            let to = indices
                .get(child.as_str())
                .ok_or_else(|| PlanError::UnknownChild {
                    parent: node.id.clone(),
                    child: child.clone(),
                })?;
            graph.add_edge(indices[*id], *to, ());
        }
    }

    toposort(&graph, None).map_err(|cycle| PlanError::Cycle(graph[cycle.node_id()].to_string()))?;

    for id in &ids {
        let node = &plan.nodes[*id];
        let registered = registry
            .mode_of(&node.step_type)
            .ok_or_else(|| PlanError::UnknownStepType {
                node: node.id.clone(),
                step_type: node.step_type.clone(),
            })?;
        if registered != node.mode {
            return Err(PlanError::ModeMismatch {
                node: node.id.clone(),
                declared: node.mode,
                registered,
            });
        }
    }

    tracing::debug!(plan_id = %plan.id, nodes = plan.len(), "plan validated");
    Ok(())
}
