//! Stage section shapes consumed by the rollback plan builder, and the
//! rollback plan it produces.
//!
//! The section types mirror the YAML a stage is authored in (camelCase keys).
//! Each element of a `steps` list is a single-key map naming its kind:
//!
//! ```yaml
//! steps:
//!   - step: { identifier: s1, type: SHELL }
//!   - stepGroup: { identifier: g1, steps: [...], rollbackSteps: [...] }
//!   - parallel:
//!       - stepGroup: { ... }
//! ```

use serde::{Deserialize, Serialize};

use crate::plan::{Plan, PlanNode};

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// One stage of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSection {
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub spec: StageSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSpec {
    pub execution: ExecutionSection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure: Option<InfrastructureSection>,
}

/// Forward steps of a stage and the stage-level compensating steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSection {
    #[serde(default)]
    pub steps: Vec<ExecutionElement>,
    #[serde(default)]
    pub rollback_steps: Vec<ExecutionElement>,
}

/// An entry of a `steps` or `rollbackSteps` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionElement {
    Step(StepElement),
    StepGroup(StepGroupElement),
    Parallel(Vec<ExecutionElement>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepElement {
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(default)]
    pub spec: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepGroupElement {
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub steps: Vec<ExecutionElement>,
    #[serde(default)]
    pub rollback_steps: Vec<ExecutionElement>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioner: Option<ProvisionerSection>,
}

/// Steps that provision infrastructure before the execution section runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionerSection {
    #[serde(default)]
    pub steps: Vec<ExecutionElement>,
    #[serde(default)]
    pub rollback_steps: Vec<ExecutionElement>,
}

// ---------------------------------------------------------------------------
// Rollback plan
// ---------------------------------------------------------------------------

/// What part of the forward stage a rollback node compensates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackNodeKind {
    /// Rollback of a single step group.
    StepGroup,
    /// Fan-out over the step groups of a parallel block.
    Parallel,
    /// Chain of every step group rollback, latest group first.
    StepGroups,
    /// Stage-level `execution.rollbackSteps`.
    Execution,
    /// Provisioner `rollbackSteps`.
    Infrastructure,
    /// Top node chaining the sections above.
    Stage,
}

/// A node of the rollback plan plus the forward node it depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackNode {
    /// Plan node id inside the rollback plan.
    pub node_id: String,
    pub identifier: String,
    /// Forward FQN that must have started before this node is eligible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependent_node_identifier: Option<String>,
    /// Run regardless of what the forward execution reached.
    #[serde(default)]
    pub always_run: bool,
    pub kind: RollbackNodeKind,
}

/// "`from` must finish before `to` starts".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackEdge {
    pub from: String,
    pub to: String,
}

/// Compensating plan built from a stage's sections.
///
/// An empty plan (no nodes) means there is nothing to roll back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollbackPlan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_node_id: Option<String>,
    /// Rollback nodes in the order they were built (inner scopes first).
    pub nodes: Vec<RollbackNode>,
    /// Every plan node needed to execute the rollback.
    pub plan_nodes: Vec<PlanNode>,
    pub edges: Vec<RollbackEdge>,
}

impl RollbackPlan {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, node_id: &str) -> Option<&RollbackNode> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }

    /// Rollback nodes of one kind, in build order.
    pub fn nodes_of_kind(&self, kind: RollbackNodeKind) -> impl Iterator<Item = &RollbackNode> {
        self.nodes.iter().filter(move |n| n.kind == kind)
    }

    /// Convert into an executable plan. `None` for an empty rollback.
    pub fn into_plan(self) -> Option<Plan> {
        let root = self.root_node_id?;
        Some(Plan::new(root, self.plan_nodes))
    }
}

/// One child of an optional rollback fan-out or chain, as stored in the
/// parent's step parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackChild {
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependent_node_identifier: Option<String>,
    #[serde(default)]
    pub always_run: bool,
}

/// Step parameters of the optional rollback structural steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackChildren {
    pub children: Vec<RollbackChild>,
}
