use ordo_types::execution::{ExecutableResponse, NodeExecution};
use ordo_types::response::ResponseMap;

use super::ExecutionStrategy;
use crate::engine::{EngineCore, EngineError};
use crate::repository::NodeExecutionRepository;
use crate::step::{ChildExecutable, StepContext};

/// Spawns one child and completes with its result.
pub(crate) struct ChildStrategy;

impl ExecutionStrategy for ChildStrategy {
    type Step = dyn ChildExecutable;

    async fn start<R: NodeExecutionRepository>(
        &self,
        core: &EngineCore<R>,
        step: &Self::Step,
        ctx: &StepContext,
        mut node: NodeExecution,
    ) -> Result<(), EngineError> {
        let child_node_id = step.obtain_child(ctx).await?;
        let child = core.spawn_child(&node, &child_node_id).await?;
        core.append_response(
            &mut node,
            ExecutableResponse::Child {
                child_node_id,
                child_node_execution_id: child.id,
            },
        )
        .await?;
        if core.suspend_on(&node, vec![child.id.to_string()], None).await? {
            core.start(child.id).await?;
        }
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
        let response = step.handle_child_response(ctx, &responses).await?;
        core.finish(&node, response).await
    }
}
