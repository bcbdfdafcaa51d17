use ordo_types::execution::{ChildSpec, ExecutableResponse, NodeExecution};
use ordo_types::response::ResponseMap;

use super::ExecutionStrategy;
use crate::engine::{EngineCore, EngineError};
use crate::repository::NodeExecutionRepository;
use crate::step::{ChildrenExecutable, StepContext};

/// Fans out to every child at once, or at most `max_concurrency` at a time,
/// and resumes once all of them are terminal.
pub(crate) struct ChildrenStrategy;

impl ExecutionStrategy for ChildrenStrategy {
    type Step = dyn ChildrenExecutable;

    async fn start<R: NodeExecutionRepository>(
        &self,
        core: &EngineCore<R>,
        step: &Self::Step,
        ctx: &StepContext,
        mut node: NodeExecution,
    ) -> Result<(), EngineError> {
        let obtained = step.obtain_children(ctx).await?;
        let max_concurrency = obtained.max_concurrency.map(|m| m.max(1));

        if obtained.child_node_ids.is_empty() {
            core.append_response(
                &mut node,
                ExecutableResponse::Children {
                    children: Vec::new(),
                    max_concurrency,
                },
            )
            .await?;
            let response = step
                .handle_children_response(ctx, &ResponseMap::new())
                .await?;
            return core.finish(&node, response).await;
        }

        // Every child exists (queued) before the parent waits, so the bounded
        // fan-out can pick the next one up when a slot frees.
        let mut children = Vec::with_capacity(obtained.child_node_ids.len());
        for child_node_id in obtained.child_node_ids {
            let child = core.spawn_child(&node, &child_node_id).await?;
            children.push(ChildSpec {
                node_id: child_node_id,
                node_execution_id: child.id,
            });
        }
        let ids: Vec<_> = children.iter().map(|c| c.node_execution_id).collect();
        core.append_response(
            &mut node,
            ExecutableResponse::Children {
                children,
                max_concurrency,
            },
        )
        .await?;

        let correlation_ids = ids.iter().map(ToString::to_string).collect();
        if !core.suspend_on(&node, correlation_ids, None).await? {
            return Ok(());
        }
        let initial = max_concurrency.unwrap_or(ids.len());
        tracing::debug!(
            node_execution_id = %node.id,
            children = ids.len(),
            initial,
            "fanning out"
        );
        for id in ids.into_iter().take(initial) {
            core.start(id).await?;
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
        let response = step.handle_children_response(ctx, &responses).await?;
        core.finish(&node, response).await
    }
}
