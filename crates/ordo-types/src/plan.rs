//! Plan and plan node types.
//!
//! A `Plan` is the compiled, immutable tree of `PlanNode`s produced ahead of
//! execution. Each node declares its `ExecutionMode`, which selects the
//! execution strategy the engine dispatches to. The mode is resolved once, when
//! the plan is compiled, and never looked up again at runtime.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ExecutionMode
// ---------------------------------------------------------------------------

/// How a plan node is started and resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Runs in-line and completes immediately.
    Sync,
    /// Waits on callback ids resolved by an external party.
    Async,
    /// Delegates a single task to the task executor.
    Task,
    /// Delegates a sequence of tasks, one link at a time.
    TaskChain,
    /// Runs exactly one child node.
    Child,
    /// Fans out to independent children and waits for all of them.
    Children,
    /// Runs a dynamically extended, strictly sequential list of children.
    ChildChain,
}

impl ExecutionMode {
    /// Modes whose nodes spawn child node executions.
    pub fn spawns_children(&self) -> bool {
        matches!(
            self,
            ExecutionMode::Child | ExecutionMode::Children | ExecutionMode::ChildChain
        )
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionMode::Sync => "sync",
            ExecutionMode::Async => "async",
            ExecutionMode::Task => "task",
            ExecutionMode::TaskChain => "task_chain",
            ExecutionMode::Child => "child",
            ExecutionMode::Children => "children",
            ExecutionMode::ChildChain => "child_chain",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// PlanNode
// ---------------------------------------------------------------------------

/// Static definition of one step of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    /// Unique id within the plan.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// User-facing identifier, used to build fully-qualified names.
    pub identifier: String,
    /// Step type identifier, resolved through the step registry.
    pub step_type: String,
    /// Declared execution mode.
    pub mode: ExecutionMode,
    /// Opaque, step-specific payload.
    #[serde(default)]
    pub step_parameters: serde_json::Value,
    /// Statically known child plan node ids.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_ids: Vec<String>,
    /// Skip the node when it has nothing to run (e.g. no children).
    #[serde(default)]
    pub skip_if_empty: bool,
    /// Leave this node's identifier out of expression FQNs.
    #[serde(default)]
    pub skip_expression_chain: bool,
    /// Group tag (e.g. "STAGE", "STEP_GROUP").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl PlanNode {
    /// Create a node whose name equals its identifier.
    pub fn new(
        id: impl Into<String>,
        identifier: impl Into<String>,
        step_type: impl Into<String>,
        mode: ExecutionMode,
    ) -> Self {
        let identifier = identifier.into();
        Self {
            id: id.into(),
            name: identifier.clone(),
            identifier,
            step_type: step_type.into(),
            mode,
            step_parameters: serde_json::Value::Null,
            child_ids: Vec::new(),
            skip_if_empty: false,
            skip_expression_chain: false,
            group: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.step_parameters = parameters;
        self
    }

    pub fn with_children<I, S>(mut self, child_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.child_ids = child_ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn skipping_expression_chain(mut self) -> Self {
        self.skip_expression_chain = true;
        self
    }

    pub fn skipping_if_empty(mut self) -> Self {
        self.skip_if_empty = true;
        self
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// A compiled, immutable tree of plan nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// UUIDv7 assigned at compilation.
    pub id: Uuid,
    /// Node the root node execution runs.
    pub start_node_id: String,
    /// All nodes keyed by id.
    pub nodes: HashMap<String, PlanNode>,
}

impl Plan {
    /// Assemble a plan from its nodes.
    pub fn new(start_node_id: impl Into<String>, nodes: impl IntoIterator<Item = PlanNode>) -> Self {
        Self {
            id: Uuid::now_v7(),
            start_node_id: start_node_id.into(),
            nodes: nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&PlanNode> {
        self.nodes.get(id)
    }

    pub fn start_node(&self) -> Option<&PlanNode> {
        self.nodes.get(&self.start_node_id)
    }

    /// Number of nodes in the plan.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
