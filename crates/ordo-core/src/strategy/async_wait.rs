use ordo_types::execution::{ExecutableResponse, NodeExecution};
use ordo_types::response::ResponseMap;

use super::ExecutionStrategy;
use crate::engine::{EngineCore, EngineError};
use crate::repository::NodeExecutionRepository;
use crate::step::{AsyncExecutable, StepContext};

/// Parks the node on callback ids an external party resolves.
pub(crate) struct AsyncStrategy;

impl ExecutionStrategy for AsyncStrategy {
    type Step = dyn AsyncExecutable;

    async fn start<R: NodeExecutionRepository>(
        &self,
        core: &EngineCore<R>,
        step: &Self::Step,
        ctx: &StepContext,
        mut node: NodeExecution,
    ) -> Result<(), EngineError> {
        let response = step.execute_async(ctx).await?;
        if response.callback_ids.is_empty() {
            return Err(EngineError::InvalidRequest(format!(
                "async step '{}' returned no callback ids",
                ctx.plan_node().identifier
            )));
        }

        let callback_ids = response.callback_ids.clone();
        core.append_response(
            &mut node,
            ExecutableResponse::Async {
                callback_ids: response.callback_ids,
                mode: response.mode,
            },
        )
        .await?;
        core.suspend_on(&node, callback_ids, Some(response.mode.waiting_status()))
            .await?;
        Ok(())
    }

    async fn resume<R: NodeExecutionRepository>(
        &self,
        core: &EngineCore<R>,
        step: &Self::Step,
        ctx: &StepContext,
        node: NodeExecution,
        responses: ResponseMap,
    ) -> Result<(), EngineError> {
        let response = step.handle_async_response(ctx, &responses).await?;
        core.finish(&node, response).await
    }
}
