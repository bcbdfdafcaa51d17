use ordo_types::execution::{ExecutableResponse, NodeExecution};
use ordo_types::response::ResponseMap;

use super::ExecutionStrategy;
use crate::engine::{EngineCore, EngineError};
use crate::repository::NodeExecutionRepository;
use crate::step::{StepContext, SyncExecutable};

/// Runs the step in-line and completes the node in the same call.
pub(crate) struct SyncStrategy;

impl ExecutionStrategy for SyncStrategy {
    type Step = dyn SyncExecutable;

    async fn start<R: NodeExecutionRepository>(
        &self,
        core: &EngineCore<R>,
        step: &Self::Step,
        ctx: &StepContext,
        mut node: NodeExecution,
    ) -> Result<(), EngineError> {
        core.append_response(&mut node, ExecutableResponse::Sync {})
            .await?;
        let response = step.execute_sync(ctx).await?;
        core.finish(&node, response).await
    }

    async fn resume<R: NodeExecutionRepository>(
        &self,
        _core: &EngineCore<R>,
        _step: &Self::Step,
        _ctx: &StepContext,
        node: NodeExecution,
        _responses: ResponseMap,
    ) -> Result<(), EngineError> {
        Err(EngineError::InvalidRequest(format!(
            "sync node execution {} cannot be resumed",
            node.id
        )))
    }
}
