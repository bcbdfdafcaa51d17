//! Restart recovery: rebuild the in-memory wait state of a plan execution
//! from what the repository persisted.

use std::collections::{HashMap, HashSet};

use ordo_types::execution::{ExecutableResponse, NodeExecution, Status};
use ordo_types::response::ResponseData;
use uuid::Uuid;

use super::{EngineError, OrchestrationEngine};
use crate::repository::NodeExecutionRepository;
use crate::wait_notify::WaitNotifyError;

/// What `recover` re-drove.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Recovery {
    /// Waits registered again under their persisted callback id.
    pub registered: usize,
    /// Finished children reported again to the parent waiting on them.
    pub resolved: usize,
    /// Queued nodes sent to start.
    pub started: usize,
    /// Running nodes with no wait recorded. They stopped mid-step and are
    /// left for an operator to abort.
    pub stranded: usize,
}

/// Correlation ids a suspended node waits on, read from its latest response.
/// `None` for a chain that suspended itself.
fn awaited(node: &NodeExecution) -> Option<Vec<String>> {
    match node.latest_response()? {
        ExecutableResponse::Async { callback_ids, .. } => Some(callback_ids.clone()),
        ExecutableResponse::Task { task_id, .. } => Some(vec![task_id.clone()]),
        ExecutableResponse::TaskChain {
            task_id: Some(task_id),
            ..
        } => Some(vec![task_id.clone()]),
        ExecutableResponse::Child {
            child_node_execution_id,
            ..
        } => Some(vec![child_node_execution_id.to_string()]),
        ExecutableResponse::Children { children, .. } => Some(
            children
                .iter()
                .map(|c| c.node_execution_id.to_string())
                .collect(),
        ),
        ExecutableResponse::ChildChain {
            next_child_execution_id: Some(id),
            ..
        } => Some(vec![id.to_string()]),
        ExecutableResponse::Sync {}
        | ExecutableResponse::TaskChain { task_id: None, .. }
        | ExecutableResponse::ChildChain { .. } => None,
    }
}

fn is_self_suspended(node: &NodeExecution) -> bool {
    matches!(
        node.latest_response(),
        Some(ExecutableResponse::ChildChain { suspend: true, .. })
    )
}

/// Whether `parent_id` is a fan-out that starts its children a few at a time.
fn is_bounded_fan_out(nodes: &[NodeExecution], parent_id: Uuid) -> bool {
    nodes.iter().any(|n| {
        n.id == parent_id
            && matches!(
                n.latest_response(),
                Some(ExecutableResponse::Children {
                    max_concurrency: Some(_),
                    ..
                })
            )
    })
}

impl<R: NodeExecutionRepository> OrchestrationEngine<R> {
    /// Re-drive `plan_execution_id` after a restart.
    ///
    /// Every node suspended on a wait is registered again under its
    /// persisted `pending_callback`, so `notify` and the conditional resume
    /// work as they did before the restart. Finished children are reported
    /// to the parent still waiting on them, self-suspended chains get their
    /// wake-up again and queued nodes are started. Run on an engine whose
    /// wait/notify holds nothing for this plan execution yet.
    pub async fn recover(&self, plan_execution_id: Uuid) -> Result<Recovery, EngineError> {
        let core = &self.core;
        core.plan(plan_execution_id).await?;
        let nodes = core.repo.list_by_plan_execution(plan_execution_id).await?;
        let mut recovery = Recovery::default();

        // parent id -> correlation ids it waits on
        let mut waits: HashMap<Uuid, HashSet<String>> = HashMap::new();
        for node in &nodes {
            let Some(callback_id) = node.pending_callback.clone() else {
                if node.status == Status::Running {
                    tracing::warn!(
                        node_execution_id = %node.id,
                        identifier = node.identifier(),
                        "node stopped mid-step; not recoverable"
                    );
                    recovery.stranded += 1;
                }
                continue;
            };
            if node.status.is_terminal() || node.status == Status::Queued {
                continue;
            }

            if is_self_suspended(node) {
                let token = Uuid::now_v7().to_string();
                if self.reregister(node, vec![token.clone()], callback_id).await? {
                    core.wait_notify
                        .resolve(&token, ResponseData::Suspended)
                        .await?;
                    recovery.registered += 1;
                }
                continue;
            }
            let Some(correlation_ids) = awaited(node) else {
                tracing::warn!(
                    node_execution_id = %node.id,
                    "pending callback without a recorded wait"
                );
                recovery.stranded += 1;
                continue;
            };
            waits
                .entry(node.id)
                .or_default()
                .extend(correlation_ids.iter().cloned());
            if self.reregister(node, correlation_ids, callback_id).await? {
                recovery.registered += 1;
            }
        }

        let mut bounded_parents = HashSet::new();
        for node in &nodes {
            let awaited_by_parent = node
                .parent_id
                .and_then(|parent_id| waits.get(&parent_id))
                .is_some_and(|ids| ids.contains(&node.id.to_string()));

            if node.status.is_terminal() && awaited_by_parent {
                let response = ResponseData::Child(super::shared::child_response(node));
                if core
                    .wait_notify
                    .resolve(&node.id.to_string(), response)
                    .await?
                {
                    recovery.resolved += 1;
                }
            } else if node.status == Status::Queued {
                match node.parent_id {
                    None => {
                        core.start(node.id).await?;
                        recovery.started += 1;
                    }
                    Some(parent_id) if awaited_by_parent => {
                        if is_bounded_fan_out(&nodes, parent_id) {
                            bounded_parents.insert(parent_id);
                        } else {
                            core.start(node.id).await?;
                            recovery.started += 1;
                        }
                    }
                    Some(_) => {}
                }
            }
        }
        for parent_id in bounded_parents {
            core.start_queued_siblings(parent_id).await?;
        }

        tracing::info!(
            plan_execution_id = %plan_execution_id,
            registered = recovery.registered,
            resolved = recovery.resolved,
            started = recovery.started,
            stranded = recovery.stranded,
            "plan execution recovered"
        );
        Ok(recovery)
    }

    /// Register `node`'s wait again. `false` if it is already registered in
    /// this process.
    async fn reregister(
        &self,
        node: &NodeExecution,
        correlation_ids: Vec<String>,
        callback_id: String,
    ) -> Result<bool, EngineError> {
        match self
            .core
            .wait_notify
            .register_callback(correlation_ids, node.id, callback_id)
            .await
        {
            Ok(()) => Ok(true),
            Err(WaitNotifyError::DuplicateCallback(callback_id)) => {
                tracing::debug!(
                    node_execution_id = %node.id,
                    callback_id = %callback_id,
                    "wait already registered"
                );
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}
