//! Ambiance: the per-level execution context threaded through child spawns.
//!
//! An `Ambiance` carries the plan execution id, the ordered path of `Level`s
//! from the root node down to the node currently executing, and the setup
//! abstractions (account/org/project scoping keys) that every descendant
//! inherits. Ambiances are values: deriving a child context copies the parent
//! and appends exactly one level, so a parent can fan out to many children
//! concurrently without any aliasing.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::plan::PlanNode;

/// Level identifier that marks the rollback section of a stage.
pub const ROLLBACK_STEPS_IDENTIFIER: &str = "rollbackSteps";

/// Setup abstraction keys propagated to every descendant.
pub const ACCOUNT_ID_KEY: &str = "accountId";
pub const ORG_IDENTIFIER_KEY: &str = "orgIdentifier";
pub const PROJECT_IDENTIFIER_KEY: &str = "projectIdentifier";

/// Set on rollback executions so that rollback steps can inspect the forward run.
pub const ORIGINAL_PLAN_EXECUTION_ID_KEY: &str = "originalPlanExecutionId";

// ---------------------------------------------------------------------------
// Level
// ---------------------------------------------------------------------------

/// One entry in the node path of an ambiance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    /// Plan node id this level executes.
    pub setup_id: String,
    /// Node execution id of this level.
    pub runtime_id: Uuid,
    /// User-facing identifier of the plan node (used to build FQNs).
    pub identifier: String,
    /// Step type of the plan node.
    pub step_type: String,
    /// Group tag of the plan node (e.g. "STAGE", "STEP_GROUP").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Whether this level is left out of expression FQNs.
    #[serde(default)]
    pub skip_expression_chain: bool,
    /// When the node execution for this level was created.
    pub start_ts: DateTime<Utc>,
}

impl Level {
    /// Build the level for executing `node` as node execution `runtime_id`.
    pub fn for_node(node: &PlanNode, runtime_id: Uuid) -> Self {
        Self {
            setup_id: node.id.clone(),
            runtime_id,
            identifier: node.identifier.clone(),
            step_type: node.step_type.clone(),
            group: node.group.clone(),
            skip_expression_chain: node.skip_expression_chain,
            start_ts: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Ambiance
// ---------------------------------------------------------------------------

/// Immutable execution context for one node execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ambiance {
    plan_execution_id: Uuid,
    plan_id: Uuid,
    #[serde(default)]
    levels: Vec<Level>,
    #[serde(default)]
    setup_abstractions: BTreeMap<String, String>,
}

impl Ambiance {
    /// Create a root ambiance with no levels.
    pub fn new(
        plan_execution_id: Uuid,
        plan_id: Uuid,
        setup_abstractions: BTreeMap<String, String>,
    ) -> Self {
        Self {
            plan_execution_id,
            plan_id,
            levels: Vec::new(),
            setup_abstractions,
        }
    }

    pub fn plan_execution_id(&self) -> Uuid {
        self.plan_execution_id
    }

    pub fn plan_id(&self) -> Uuid {
        self.plan_id
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn setup_abstractions(&self) -> &BTreeMap<String, String> {
        &self.setup_abstractions
    }

    /// Look up a single setup abstraction.
    pub fn setup_abstraction(&self, key: &str) -> Option<&str> {
        self.setup_abstractions.get(key).map(String::as_str)
    }

    // -----------------------------------------------------------------------
    // Derivation
    // -----------------------------------------------------------------------

    /// Derive the ambiance for a child by appending exactly one level.
    pub fn clone_for_child(&self, level: Level) -> Self {
        let mut levels = Vec::with_capacity(self.levels.len() + 1);
        levels.extend(self.levels.iter().cloned());
        levels.push(level);
        Self {
            plan_execution_id: self.plan_execution_id,
            plan_id: self.plan_id,
            levels,
            setup_abstractions: self.setup_abstractions.clone(),
        }
    }

    /// Copy of this ambiance truncated to the first `depth` levels.
    pub fn clone_to_depth(&self, depth: usize) -> Self {
        Self {
            plan_execution_id: self.plan_execution_id,
            plan_id: self.plan_id,
            levels: self.levels.iter().take(depth).cloned().collect(),
            setup_abstractions: self.setup_abstractions.clone(),
        }
    }

    /// Copy of this ambiance with the current level removed.
    pub fn clone_for_finish(&self) -> Self {
        self.clone_to_depth(self.levels.len().saturating_sub(1))
    }

    /// Copy of this ambiance for a different plan execution of a different
    /// plan, keeping the setup abstractions and recording where it came from.
    pub fn clone_for_plan_execution(&self, plan_execution_id: Uuid, plan_id: Uuid) -> Self {
        let mut setup_abstractions = self.setup_abstractions.clone();
        setup_abstractions
            .entry(ORIGINAL_PLAN_EXECUTION_ID_KEY.to_string())
            .or_insert_with(|| self.plan_execution_id.to_string());
        Self {
            plan_execution_id,
            plan_id,
            levels: Vec::new(),
            setup_abstractions,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors for the current position
    // -----------------------------------------------------------------------

    pub fn current_level(&self) -> Option<&Level> {
        self.levels.last()
    }

    pub fn parent_level(&self) -> Option<&Level> {
        self.levels.len().checked_sub(2).and_then(|i| self.levels.get(i))
    }

    pub fn current_runtime_id(&self) -> Option<Uuid> {
        self.current_level().map(|l| l.runtime_id)
    }

    pub fn parent_runtime_id(&self) -> Option<Uuid> {
        self.parent_level().map(|l| l.runtime_id)
    }

    pub fn current_setup_id(&self) -> Option<&str> {
        self.current_level().map(|l| l.setup_id.as_str())
    }

    pub fn current_step_type(&self) -> Option<&str> {
        self.current_level().map(|l| l.step_type.as_str())
    }

    pub fn current_group(&self) -> Option<&str> {
        self.current_level().and_then(|l| l.group.as_deref())
    }

    /// Fully-qualified name of the current node: level identifiers joined by
    /// `.`, skipping levels marked `skip_expression_chain`.
    pub fn fqn(&self) -> String {
        fqn_from_levels(&self.levels)
    }

    /// Whether any level of the path is the rollback section.
    pub fn is_under_rollback_steps(&self) -> bool {
        self.levels
            .iter()
            .any(|l| l.identifier == ROLLBACK_STEPS_IDENTIFIER)
    }

    pub fn account_id(&self) -> Option<&str> {
        self.setup_abstraction(ACCOUNT_ID_KEY)
    }

    pub fn org_identifier(&self) -> Option<&str> {
        self.setup_abstraction(ORG_IDENTIFIER_KEY)
    }

    pub fn project_identifier(&self) -> Option<&str> {
        self.setup_abstraction(PROJECT_IDENTIFIER_KEY)
    }

    /// The plan execution whose node executions rollback steps should inspect.
    ///
    /// Falls back to the current plan execution when the ambiance was not
    /// derived for a rollback run (or the recorded id does not parse).
    pub fn original_plan_execution_id(&self) -> Uuid {
        self.setup_abstraction(ORIGINAL_PLAN_EXECUTION_ID_KEY)
            .and_then(|s| s.parse().ok())
            .unwrap_or(self.plan_execution_id)
    }
}

/// Join level identifiers into a fully-qualified name.
pub fn fqn_from_levels(levels: &[Level]) -> String {
    levels
        .iter()
        .filter(|l| !l.skip_expression_chain)
        .map(|l| l.identifier.as_str())
        .collect::<Vec<_>>()
        .join(".")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
