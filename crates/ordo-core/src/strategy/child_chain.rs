use ordo_types::execution::{ExecutableResponse, NodeExecution, Status};
use ordo_types::response::{ResponseData, ResponseMap};
use uuid::Uuid;

use super::ExecutionStrategy;
use crate::engine::{EngineCore, EngineError};
use crate::repository::NodeExecutionRepository;
use crate::step::{ChildChainExecutable, ChildChainResponse, StepContext};

/// Runs children strictly one after another. Each link decides the next
/// child from the pass-through data of the previous link and the result of
/// the child it just waited on.
pub(crate) struct ChildChainStrategy;

impl ChildChainStrategy {
    async fn run_link<R: NodeExecutionRepository>(
        &self,
        core: &EngineCore<R>,
        step: &dyn ChildChainExecutable,
        ctx: &StepContext,
        mut node: NodeExecution,
        link: ChildChainResponse,
    ) -> Result<(), EngineError> {
        if link.suspend {
            core.append_response(
                &mut node,
                ExecutableResponse::ChildChain {
                    next_child_id: None,
                    next_child_execution_id: None,
                    pass_through_data: link.pass_through_data,
                    last_link: false,
                    suspend: true,
                },
            )
            .await?;
            // Wake ourselves up through wait/notify so the finalize runs on
            // the resume path like every other link.
            let token = Uuid::now_v7().to_string();
            if core.suspend_on(&node, vec![token.clone()], None).await? {
                core.wait_notify
                    .resolve(&token, ResponseData::Suspended)
                    .await?;
            }
            return Ok(());
        }

        let Some(next_child_id) = link.next_child_id else {
            if !link.last_link {
                return Err(EngineError::InvalidRequest(format!(
                    "child chain '{}' produced no next child without ending the chain",
                    ctx.plan_node().identifier
                )));
            }
            core.append_response(
                &mut node,
                ExecutableResponse::ChildChain {
                    next_child_id: None,
                    next_child_execution_id: None,
                    pass_through_data: link.pass_through_data.clone(),
                    last_link: true,
                    suspend: false,
                },
            )
            .await?;
            let response = step
                .finalize_execution(ctx, &link.pass_through_data, &ResponseMap::new())
                .await?;
            return core.finish(&node, response).await;
        };

        let child = core.spawn_child(&node, &next_child_id).await?;
        core.append_response(
            &mut node,
            ExecutableResponse::ChildChain {
                next_child_id: Some(next_child_id),
                next_child_execution_id: Some(child.id),
                pass_through_data: link.pass_through_data,
                last_link: link.last_link,
                suspend: false,
            },
        )
        .await?;
        if core.suspend_on(&node, vec![child.id.to_string()], None).await? {
            core.start(child.id).await?;
        }
        Ok(())
    }
}

impl ExecutionStrategy for ChildChainStrategy {
    type Step = dyn ChildChainExecutable;

    async fn start<R: NodeExecutionRepository>(
        &self,
        core: &EngineCore<R>,
        step: &Self::Step,
        ctx: &StepContext,
        node: NodeExecution,
    ) -> Result<(), EngineError> {
        let link = step.execute_first_child(ctx).await?;
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
        let Some(ExecutableResponse::ChildChain {
            pass_through_data,
            last_link,
            suspend,
            ..
        }) = node.latest_response().cloned()
        else {
            return Err(EngineError::InvalidRequest(format!(
                "node execution {} has no child chain response",
                node.id
            )));
        };

        let broken = responses.values().any(|data| {
            data.status()
                .is_some_and(|s| s == Status::Aborted || s.is_broken())
        });
        if last_link || suspend || broken {
            let mut response = step
                .finalize_execution(ctx, &pass_through_data, &responses)
                .await?;
            if suspend && !(response.status.is_broken() || response.status == Status::Aborted) {
                response.status = Status::Suspended;
            }
            return core.finish(&node, response).await;
        }

        let link = step
            .execute_next_child(ctx, &pass_through_data, &responses)
            .await?;
        self.run_link(core, step, ctx, node, link).await
    }
}
