//! Events published by the orchestration engine.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::execution::Status;

/// Something observable happened to a node or plan execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A node execution was created in the queued state.
    NodeQueued {
        node_execution_id: Uuid,
        plan_execution_id: Uuid,
        identifier: String,
    },
    /// A node execution moved to a new status.
    NodeStatusChanged {
        node_execution_id: Uuid,
        plan_execution_id: Uuid,
        identifier: String,
        from: Status,
        to: Status,
    },
    /// The root node of a plan execution reached a terminal status.
    PlanExecutionFinished {
        plan_execution_id: Uuid,
        status: Status,
    },
}

impl EngineEvent {
    pub fn plan_execution_id(&self) -> Uuid {
        match self {
            EngineEvent::NodeQueued { plan_execution_id, .. }
            | EngineEvent::NodeStatusChanged { plan_execution_id, .. }
            | EngineEvent::PlanExecutionFinished { plan_execution_id, .. } => *plan_execution_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serde_tag() {
        let event = EngineEvent::PlanExecutionFinished {
            plan_execution_id: Uuid::nil(),
            status: Status::Succeeded,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"plan_execution_finished\""));
        assert_eq!(event.plan_execution_id(), Uuid::nil());
    }
}
