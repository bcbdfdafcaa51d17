//! Abort and expiry: externally driven terminal overrides.

use ordo_types::execution::Status;
use ordo_types::response::{FailureInfo, FailureType, StepResponse};
use uuid::Uuid;

use super::{EngineError, OrchestrationEngine};
use crate::repository::NodeExecutionRepository;

impl<R: NodeExecutionRepository> OrchestrationEngine<R> {
    /// Abort a node execution and, transitively, its live children, then
    /// notify its parent. Returns `false` if it had already finished.
    pub async fn abort(&self, node_execution_id: Uuid) -> Result<bool, EngineError> {
        self.interrupt(node_execution_id, Status::Aborted, FailureType::Aborted)
            .await
    }

    /// Expire a node execution the same way `abort` does.
    pub async fn expire(&self, node_execution_id: Uuid) -> Result<bool, EngineError> {
        self.interrupt(node_execution_id, Status::Expired, FailureType::Timeout)
            .await
    }

    async fn interrupt(
        &self,
        node_execution_id: Uuid,
        status: Status,
        failure_type: FailureType,
    ) -> Result<bool, EngineError> {
        let core = &self.core;
        let live: Vec<Status> = Status::ALL
            .into_iter()
            .filter(|s| !s.is_terminal())
            .collect();
        let response = StepResponse {
            status,
            failure: Some(FailureInfo::new(
                format!("node execution {status} on request"),
                failure_type,
            )),
            outcome: None,
        };

        let before = core
            .repo
            .get(node_execution_id)
            .await?
            .ok_or(EngineError::NodeExecutionNotFound(node_execution_id))?;
        let Some(top) = core
            .repo
            .complete(node_execution_id, &live, &response)
            .await?
        else {
            tracing::debug!(node_execution_id = %node_execution_id, "interrupt ignored; node already finished");
            return Ok(false);
        };
        core.publish_status(&top, before.status, status);
        tracing::info!(
            node_execution_id = %node_execution_id,
            identifier = top.identifier(),
            %status,
            "node execution interrupted"
        );

        let mut pending = vec![top.id];
        while let Some(parent_id) = pending.pop() {
            core.wait_notify.cancel_for(parent_id);
            for child in core.repo.list_children(parent_id).await? {
                if child.status.is_terminal() {
                    continue;
                }
                if let Some(done) = core.repo.complete(child.id, &live, &response).await? {
                    core.publish_status(&done, child.status, status);
                    pending.push(done.id);
                }
            }
        }

        core.report_terminal(&top).await?;
        Ok(true)
    }
}
