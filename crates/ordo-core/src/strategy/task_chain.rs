use ordo_types::execution::{ExecutableResponse, NodeExecution, Status};
use ordo_types::response::ResponseMap;

use super::{ExecutionStrategy, error_response};
use crate::engine::{EngineCore, EngineError};
use crate::repository::NodeExecutionRepository;
use crate::step::{StepContext, TaskChainExecutable, TaskChainResponse};

/// Delegates a sequence of tasks, one link per resume, persisting the
/// pass-through data of every link.
pub(crate) struct TaskChainStrategy;

impl TaskChainStrategy {
    async fn run_link<R: NodeExecutionRepository>(
        &self,
        core: &EngineCore<R>,
        step: &dyn TaskChainExecutable,
        ctx: &StepContext,
        mut node: NodeExecution,
        link: TaskChainResponse,
    ) -> Result<(), EngineError> {
        let Some(request) = link.task else {
            if !link.chain_end {
                return Err(EngineError::InvalidRequest(format!(
                    "task chain '{}' produced no task without ending the chain",
                    ctx.plan_node().identifier
                )));
            }
            core.append_response(
                &mut node,
                ExecutableResponse::TaskChain {
                    task_id: None,
                    mode: Default::default(),
                    chain_end: true,
                    pass_through_data: link.pass_through_data.clone(),
                },
            )
            .await?;
            let response = step
                .finalize_execution(ctx, &link.pass_through_data, &ResponseMap::new())
                .await?;
            return core.finish(&node, response).await;
        };

        let queued = core.queue_task(request, &node.ambiance).await?;
        core.append_response(
            &mut node,
            ExecutableResponse::TaskChain {
                task_id: Some(queued.task_id.clone()),
                mode: queued.mode,
                chain_end: link.chain_end,
                pass_through_data: link.pass_through_data,
            },
        )
        .await?;
        core.suspend_on(&node, vec![queued.task_id], Some(Status::TaskWaiting))
            .await?;
        Ok(())
    }
}

impl ExecutionStrategy for TaskChainStrategy {
    type Step = dyn TaskChainExecutable;

    async fn start<R: NodeExecutionRepository>(
        &self,
        core: &EngineCore<R>,
        step: &Self::Step,
        ctx: &StepContext,
        node: NodeExecution,
    ) -> Result<(), EngineError> {
        let link = step.start_chain_link(ctx).await?;
        self.run_link(core, step, ctx, node, link).await
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
            tracing::debug!(node_execution_id = %node.id, "task chain link reported an infrastructure error");
            return core.finish(&node, failed).await;
        }
        let Some(ExecutableResponse::TaskChain {
            chain_end,
            pass_through_data,
            ..
        }) = node.latest_response().cloned()
        else {
            return Err(EngineError::InvalidRequest(format!(
                "node execution {} has no task chain response",
                node.id
            )));
        };

        if chain_end {
            let response = step
                .finalize_execution(ctx, &pass_through_data, &responses)
                .await?;
            return core.finish(&node, response).await;
        }
        let link = step
            .execute_next_link(ctx, &pass_through_data, &responses)
            .await?;
        self.run_link(core, step, ctx, node, link).await
    }
}
