use ordo_types::execution::{ExecutableResponse, NodeExecution, Status};
use ordo_types::response::ResponseMap;

use super::{ExecutionStrategy, error_response};
use crate::engine::{EngineCore, EngineError};
use crate::repository::NodeExecutionRepository;
use crate::step::{StepContext, TaskExecutable};

/// Delegates one task and waits on its id.
pub(crate) struct TaskStrategy;

impl ExecutionStrategy for TaskStrategy {
    type Step = dyn TaskExecutable;

    async fn start<R: NodeExecutionRepository>(
        &self,
        core: &EngineCore<R>,
        step: &Self::Step,
        ctx: &StepContext,
        mut node: NodeExecution,
    ) -> Result<(), EngineError> {
        let request = step.obtain_task(ctx).await?;
        let queued = core.queue_task(request, &node.ambiance).await?;
        core.append_response(
            &mut node,
            ExecutableResponse::Task {
                task_id: queued.task_id.clone(),
                mode: queued.mode,
            },
        )
        .await?;
        core.suspend_on(&node, vec![queued.task_id], Some(Status::TaskWaiting))
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
        if let Some(failed) = error_response(&responses) {
            tracing::debug!(node_execution_id = %node.id, "task reported an infrastructure error");
            return core.finish(&node, failed).await;
        }
        let response = step.handle_task_result(ctx, &responses).await?;
        core.finish(&node, response).await
    }
}
