//! Structural steps that plans (and rollback plans) are assembled from.
//!
//! None of these do work themselves; they only decide which children run
//! and fold the children's statuses into their own.

use futures_util::future::BoxFuture;
use ordo_types::execution::{PassThroughData, Status};
use ordo_types::response::{FailureInfo, FailureType, ResponseData, ResponseMap, StepResponse};
use ordo_types::rollback::{RollbackChild, RollbackChildren};
use serde::{Deserialize, Serialize};

use super::registry::StepRegistry;
use super::{
    ChildChainExecutable, ChildChainResponse, ChildrenExecutable, ChildrenExecutableResponse,
    StepContext, StepError,
};
use crate::passthrough::{JsonCodec, PassThroughCodec};

/// Runs `child_ids` one after another.
pub const SECTION_CHAIN: &str = "SECTION_CHAIN";
/// Runs `child_ids` concurrently.
pub const PARALLEL: &str = "PARALLEL";
/// Runs the eligible rollback children one after another.
pub const ROLLBACK_OPTIONAL_CHILD_CHAIN: &str = "ROLLBACK_OPTIONAL_CHILD_CHAIN";
/// Runs the eligible rollback children concurrently.
pub const ROLLBACK_OPTIONAL_CHILDREN: &str = "ROLLBACK_OPTIONAL_CHILDREN";

pub(crate) fn register_builtins(registry: &mut StepRegistry) {
    registry.register_child_chain(SECTION_CHAIN, SectionChain);
    registry.register_children(PARALLEL, Parallel);
    registry.register_child_chain(ROLLBACK_OPTIONAL_CHILD_CHAIN, RollbackOptionalChildChain);
    registry.register_children(ROLLBACK_OPTIONAL_CHILDREN, RollbackOptionalChildren);
}

/// Fold child responses into the parent's terminal response.
///
/// An aborted child aborts the parent. Otherwise the first failed or expired
/// child's status and failure are propagated unchanged. Everything else
/// (including suspended children) counts as success.
pub fn aggregate_children(responses: &ResponseMap) -> StepResponse {
    let mut broken: Option<StepResponse> = None;
    for data in responses.values() {
        match data {
            ResponseData::Child(child) if child.status == Status::Aborted => {
                return StepResponse {
                    status: Status::Aborted,
                    failure: child.failure.clone(),
                    outcome: None,
                };
            }
            ResponseData::Child(child) if child.status.is_broken() => {
                broken.get_or_insert_with(|| StepResponse {
                    status: child.status,
                    failure: Some(child.failure.clone().unwrap_or_else(|| {
                        FailureInfo::new(
                            format!("child '{}' finished {}", child.identifier, child.status),
                            FailureType::Application,
                        )
                    })),
                    outcome: None,
                });
            }
            ResponseData::Error { message, kind } => {
                broken.get_or_insert_with(|| {
                    StepResponse::failed(FailureInfo::new(message.clone(), kind.failure_type()))
                });
            }
            _ => {}
        }
    }
    broken.unwrap_or_else(StepResponse::succeeded)
}

// ---------------------------------------------------------------------------
// Sequential chains
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
struct ChainCursor {
    /// Children this chain runs, in order.
    children: Vec<String>,
    /// Index of the child currently running.
    position: usize,
}

impl ChainCursor {
    fn link(self) -> Result<ChildChainResponse, StepError> {
        let Some(child) = self.children.get(self.position).cloned() else {
            return Err(StepError::Failed(format!(
                "chain has no child at position {}",
                self.position
            )));
        };
        let last_link = self.position + 1 == self.children.len();
        let data = JsonCodec::<ChainCursor>::new().encode(&self)?;
        Ok(ChildChainResponse {
            next_child_id: Some(child),
            pass_through_data: data,
            last_link,
            suspend: false,
        })
    }

    fn advance(data: &PassThroughData) -> Result<Self, StepError> {
        let mut cursor = JsonCodec::<ChainCursor>::new().decode(data)?;
        cursor.position += 1;
        Ok(cursor)
    }
}

/// `SECTION_CHAIN`: the plan node's `child_ids`, in order.
pub struct SectionChain;

impl ChildChainExecutable for SectionChain {
    fn execute_first_child<'a>(
        &'a self,
        ctx: &'a StepContext,
    ) -> BoxFuture<'a, Result<ChildChainResponse, StepError>> {
        Box::pin(async move {
            let children = ctx.plan_node().child_ids.clone();
            if children.is_empty() {
                return Ok(ChildChainResponse {
                    last_link: true,
                    ..Default::default()
                });
            }
            ChainCursor {
                children,
                position: 0,
            }
            .link()
        })
    }

    fn execute_next_child<'a>(
        &'a self,
        _ctx: &'a StepContext,
        pass_through_data: &'a PassThroughData,
        _responses: &'a ResponseMap,
    ) -> BoxFuture<'a, Result<ChildChainResponse, StepError>> {
        Box::pin(async move { ChainCursor::advance(pass_through_data)?.link() })
    }

    fn finalize_execution<'a>(
        &'a self,
        _ctx: &'a StepContext,
        _pass_through_data: &'a PassThroughData,
        responses: &'a ResponseMap,
    ) -> BoxFuture<'a, Result<StepResponse, StepError>> {
        Box::pin(async move { Ok(aggregate_children(responses)) })
    }
}

/// `ROLLBACK_OPTIONAL_CHILD_CHAIN`: the rollback children whose forward
/// counterpart started, in order. Suspends when none did.
pub struct RollbackOptionalChildChain;

impl ChildChainExecutable for RollbackOptionalChildChain {
    fn execute_first_child<'a>(
        &'a self,
        ctx: &'a StepContext,
    ) -> BoxFuture<'a, Result<ChildChainResponse, StepError>> {
        Box::pin(async move {
            let children = eligible_children(ctx).await?;
            if children.is_empty() {
                tracing::debug!(
                    node_execution_id = %ctx.node_execution_id(),
                    "no rollback child is eligible"
                );
                return Ok(ChildChainResponse::suspend(PassThroughData::empty()));
            }
            ChainCursor {
                children,
                position: 0,
            }
            .link()
        })
    }

    fn execute_next_child<'a>(
        &'a self,
        _ctx: &'a StepContext,
        pass_through_data: &'a PassThroughData,
        _responses: &'a ResponseMap,
    ) -> BoxFuture<'a, Result<ChildChainResponse, StepError>> {
        Box::pin(async move { ChainCursor::advance(pass_through_data)?.link() })
    }

    fn finalize_execution<'a>(
        &'a self,
        _ctx: &'a StepContext,
        _pass_through_data: &'a PassThroughData,
        responses: &'a ResponseMap,
    ) -> BoxFuture<'a, Result<StepResponse, StepError>> {
        Box::pin(async move { Ok(aggregate_children(responses)) })
    }
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParallelParameters {
    #[serde(default)]
    max_concurrency: Option<usize>,
}

/// `PARALLEL`: every `child_ids` entry at once, optionally bounded by the
/// `maxConcurrency` step parameter.
pub struct Parallel;

impl ChildrenExecutable for Parallel {
    fn obtain_children<'a>(
        &'a self,
        ctx: &'a StepContext,
    ) -> BoxFuture<'a, Result<ChildrenExecutableResponse, StepError>> {
        Box::pin(async move {
            let params: ParallelParameters = ctx.parameters()?;
            Ok(ChildrenExecutableResponse {
                child_node_ids: ctx.plan_node().child_ids.clone(),
                max_concurrency: params.max_concurrency,
            })
        })
    }

    fn handle_children_response<'a>(
        &'a self,
        _ctx: &'a StepContext,
        responses: &'a ResponseMap,
    ) -> BoxFuture<'a, Result<StepResponse, StepError>> {
        Box::pin(async move { Ok(aggregate_children(responses)) })
    }
}

/// `ROLLBACK_OPTIONAL_CHILDREN`: every eligible rollback child at once.
pub struct RollbackOptionalChildren;

impl ChildrenExecutable for RollbackOptionalChildren {
    fn obtain_children<'a>(
        &'a self,
        ctx: &'a StepContext,
    ) -> BoxFuture<'a, Result<ChildrenExecutableResponse, StepError>> {
        Box::pin(async move {
            Ok(ChildrenExecutableResponse {
                child_node_ids: eligible_children(ctx).await?,
                max_concurrency: None,
            })
        })
    }

    fn handle_children_response<'a>(
        &'a self,
        _ctx: &'a StepContext,
        responses: &'a ResponseMap,
    ) -> BoxFuture<'a, Result<StepResponse, StepError>> {
        Box::pin(async move { Ok(aggregate_children(responses)) })
    }
}

/// Rollback children that may run: `always_run` ones, ones without a
/// dependency, and ones whose dependent forward node started.
async fn eligible_children(ctx: &StepContext) -> Result<Vec<String>, StepError> {
    let params: RollbackChildren = ctx.parameters()?;
    let executed = ctx.executed_fqns().await?;
    Ok(params
        .children
        .into_iter()
        .filter(|child: &RollbackChild| {
            child.always_run
                || child
                    .dependent_node_identifier
                    .as_deref()
                    .is_none_or(|fqn| executed.contains(fqn))
        })
        .map(|child| child.node_id)
        .collect())
}
