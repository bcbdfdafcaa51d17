//! Execution strategies: how a node of each execution mode is started and
//! resumed.
//!
//! A strategy call is one-shot. It records what it decided by appending an
//! `ExecutableResponse`, then either hands a terminal `StepResponse` to the
//! engine or registers the ids it waits on and returns. Nothing polls; the
//! next call happens when wait/notify fires.

mod async_wait;
mod child;
mod child_chain;
mod children;
mod sync;
mod task;
mod task_chain;

use ordo_types::execution::NodeExecution;
use ordo_types::response::{FailureInfo, ResponseData, ResponseMap, StepResponse};

use crate::engine::{EngineCore, EngineError};
use crate::repository::NodeExecutionRepository;
use crate::step::StepContext;

pub(crate) use async_wait::AsyncStrategy;
pub(crate) use child::ChildStrategy;
pub(crate) use child_chain::ChildChainStrategy;
pub(crate) use children::ChildrenStrategy;
pub(crate) use sync::SyncStrategy;
pub(crate) use task::TaskStrategy;
pub(crate) use task_chain::TaskChainStrategy;

/// Start/resume contract shared by every execution mode.
pub(crate) trait ExecutionStrategy {
    /// Step capability this strategy drives.
    type Step: ?Sized + Send + Sync;

    fn start<R: NodeExecutionRepository>(
        &self,
        core: &EngineCore<R>,
        step: &Self::Step,
        ctx: &StepContext,
        node: NodeExecution,
    ) -> impl std::future::Future<Output = Result<(), EngineError>> + Send;

    fn resume<R: NodeExecutionRepository>(
        &self,
        core: &EngineCore<R>,
        step: &Self::Step,
        ctx: &StepContext,
        node: NodeExecution,
        responses: ResponseMap,
    ) -> impl std::future::Future<Output = Result<(), EngineError>> + Send;
}

/// Failed step response for the first infrastructure error wrapper in
/// `responses`, if any.
pub(crate) fn error_response(responses: &ResponseMap) -> Option<StepResponse> {
    responses.values().find_map(|data| match data {
        ResponseData::Error { message, kind } => Some(StepResponse::failed(FailureInfo::new(
            message.clone(),
            kind.failure_type(),
        ))),
        _ => None,
    })
}
