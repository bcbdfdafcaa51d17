//! Context handed to every step invocation.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use ordo_types::ambiance::Ambiance;
use ordo_types::error::RepositoryError;
use ordo_types::execution::{NodeExecution, Status};
use ordo_types::plan::PlanNode;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::StepError;
use crate::repository::NodeExecutionRepository;

/// Read-only view over persisted node executions, for steps that decide
/// what to run based on what already ran.
pub trait ExecutionQuery: Send + Sync {
    fn node_executions(
        &self,
        plan_execution_id: Uuid,
    ) -> BoxFuture<'_, Result<Vec<NodeExecution>, RepositoryError>>;
}

impl<R: NodeExecutionRepository> ExecutionQuery for R {
    fn node_executions(
        &self,
        plan_execution_id: Uuid,
    ) -> BoxFuture<'_, Result<Vec<NodeExecution>, RepositoryError>> {
        Box::pin(self.list_by_plan_execution(plan_execution_id))
    }
}

/// Everything a step sees about the node execution it runs for.
#[derive(Clone)]
pub struct StepContext {
    ambiance: Ambiance,
    plan_node: PlanNode,
    node_execution_id: Uuid,
    query: Arc<dyn ExecutionQuery>,
}

impl StepContext {
    pub fn new(
        ambiance: Ambiance,
        plan_node: PlanNode,
        node_execution_id: Uuid,
        query: Arc<dyn ExecutionQuery>,
    ) -> Self {
        Self {
            ambiance,
            plan_node,
            node_execution_id,
            query,
        }
    }

    pub fn ambiance(&self) -> &Ambiance {
        &self.ambiance
    }

    pub fn plan_node(&self) -> &PlanNode {
        &self.plan_node
    }

    pub fn node_execution_id(&self) -> Uuid {
        self.node_execution_id
    }

    /// Deserialize the node's step parameters. Missing parameters read as an
    /// empty object.
    pub fn parameters<T: DeserializeOwned>(&self) -> Result<T, StepError> {
        let value = match &self.plan_node.step_parameters {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            other => other.clone(),
        };
        serde_json::from_value(value).map_err(|e| {
            StepError::InvalidParameters(format!("{}: {e}", self.plan_node.identifier))
        })
    }

    /// Whether a node with fully-qualified name `fqn` started in the plan
    /// execution this one compensates (or in this one, outside rollback).
    pub async fn has_executed(&self, fqn: &str) -> Result<bool, StepError> {
        Ok(self.executed_fqns().await?.contains(fqn))
    }

    /// FQNs of every node that left `Queued` in the original plan execution.
    pub async fn executed_fqns(&self) -> Result<HashSet<String>, StepError> {
        let plan_execution_id = self.ambiance.original_plan_execution_id();
        let nodes = self
            .query
            .node_executions(plan_execution_id)
            .await
            .map_err(|e| StepError::Query(e.to_string()))?;
        Ok(nodes
            .iter()
            .filter(|n| n.status != Status::Queued)
            .map(NodeExecution::fqn)
            .collect())
    }

    /// Outcome of the most recent successful node with `identifier` in the
    /// current plan execution.
    pub async fn outcome_of(&self, identifier: &str) -> Result<Option<serde_json::Value>, StepError> {
        let nodes = self
            .query
            .node_executions(self.ambiance.plan_execution_id())
            .await
            .map_err(|e| StepError::Query(e.to_string()))?;
        Ok(nodes
            .into_iter()
            .rev()
            .find(|n| n.status == Status::Succeeded && n.identifier() == identifier)
            .and_then(|n| n.outcome))
    }
}

impl std::fmt::Debug for StepContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext")
            .field("node_execution_id", &self.node_execution_id)
            .field("identifier", &self.plan_node.identifier)
            .field("fqn", &self.ambiance.fqn())
            .finish()
    }
}
