//! Step capability traits.
//!
//! A step type implements exactly one of the seven executable traits below;
//! which one decides the `ExecutionMode` its plan nodes must declare. The
//! traits are object-safe (futures are boxed) so the registry can hold
//! heterogeneous implementations behind `Arc<dyn ...>`.

pub mod builtin;
pub mod context;
pub mod registry;

use futures_util::future::BoxFuture;
use ordo_types::execution::{AsyncWaitMode, PassThroughData};
use ordo_types::response::{ResponseMap, StepResponse};
use ordo_types::task::TaskRequest;

use crate::passthrough::PassThroughError;

pub use context::{ExecutionQuery, StepContext};
pub use registry::{RegisteredStep, StepRegistry};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("invalid step parameters: {0}")]
    InvalidParameters(String),

    #[error("execution query failed: {0}")]
    Query(String),

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    PassThrough(#[from] PassThroughError),
}

// ---------------------------------------------------------------------------
// Capability responses
// ---------------------------------------------------------------------------

/// Callback ids an async step waits on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncExecutableResponse {
    pub callback_ids: Vec<String>,
    pub mode: AsyncWaitMode,
}

/// Result of one task chain link.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskChainResponse {
    /// Task to queue for this link. `None` is only valid with `chain_end`.
    pub task: Option<TaskRequest>,
    /// This is the last link; the next resume finalizes.
    pub chain_end: bool,
    pub pass_through_data: PassThroughData,
}

/// Children a fan-out step spawns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildrenExecutableResponse {
    pub child_node_ids: Vec<String>,
    /// Upper bound on children running at once. `None` starts all of them.
    pub max_concurrency: Option<usize>,
}

/// Result of one child chain link.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChildChainResponse {
    pub next_child_id: Option<String>,
    pub pass_through_data: PassThroughData,
    /// The child spawned by this link is the last one.
    pub last_link: bool,
    /// Nothing further to run; finalize and report `Suspended`.
    pub suspend: bool,
}

impl ChildChainResponse {
    pub fn next(child_id: impl Into<String>, pass_through_data: PassThroughData) -> Self {
        Self {
            next_child_id: Some(child_id.into()),
            pass_through_data,
            last_link: false,
            suspend: false,
        }
    }

    pub fn last(child_id: impl Into<String>, pass_through_data: PassThroughData) -> Self {
        Self {
            last_link: true,
            ..Self::next(child_id, pass_through_data)
        }
    }

    pub fn suspend(pass_through_data: PassThroughData) -> Self {
        Self {
            next_child_id: None,
            pass_through_data,
            last_link: false,
            suspend: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// Runs in-line and completes immediately.
pub trait SyncExecutable: Send + Sync {
    fn execute_sync<'a>(
        &'a self,
        ctx: &'a StepContext,
    ) -> BoxFuture<'a, Result<StepResponse, StepError>>;
}

/// Suspends on callback ids resolved by an external party.
pub trait AsyncExecutable: Send + Sync {
    fn execute_async<'a>(
        &'a self,
        ctx: &'a StepContext,
    ) -> BoxFuture<'a, Result<AsyncExecutableResponse, StepError>>;

    fn handle_async_response<'a>(
        &'a self,
        ctx: &'a StepContext,
        responses: &'a ResponseMap,
    ) -> BoxFuture<'a, Result<StepResponse, StepError>>;
}

/// Delegates one task to the task executor.
pub trait TaskExecutable: Send + Sync {
    fn obtain_task<'a>(&'a self, ctx: &'a StepContext) -> BoxFuture<'a, Result<TaskRequest, StepError>>;

    fn handle_task_result<'a>(
        &'a self,
        ctx: &'a StepContext,
        responses: &'a ResponseMap,
    ) -> BoxFuture<'a, Result<StepResponse, StepError>>;
}

/// Delegates a sequence of tasks, one per link.
pub trait TaskChainExecutable: Send + Sync {
    fn start_chain_link<'a>(
        &'a self,
        ctx: &'a StepContext,
    ) -> BoxFuture<'a, Result<TaskChainResponse, StepError>>;

    fn execute_next_link<'a>(
        &'a self,
        ctx: &'a StepContext,
        pass_through_data: &'a PassThroughData,
        responses: &'a ResponseMap,
    ) -> BoxFuture<'a, Result<TaskChainResponse, StepError>>;

    fn finalize_execution<'a>(
        &'a self,
        ctx: &'a StepContext,
        pass_through_data: &'a PassThroughData,
        responses: &'a ResponseMap,
    ) -> BoxFuture<'a, Result<StepResponse, StepError>>;
}

/// Runs exactly one child node.
pub trait ChildExecutable: Send + Sync {
    /// Plan node id of the child to run.
    fn obtain_child<'a>(&'a self, ctx: &'a StepContext) -> BoxFuture<'a, Result<String, StepError>>;

    fn handle_child_response<'a>(
        &'a self,
        ctx: &'a StepContext,
        responses: &'a ResponseMap,
    ) -> BoxFuture<'a, Result<StepResponse, StepError>>;
}

/// Fans out to independent children and waits for all of them.
pub trait ChildrenExecutable: Send + Sync {
    fn obtain_children<'a>(
        &'a self,
        ctx: &'a StepContext,
    ) -> BoxFuture<'a, Result<ChildrenExecutableResponse, StepError>>;

    fn handle_children_response<'a>(
        &'a self,
        ctx: &'a StepContext,
        responses: &'a ResponseMap,
    ) -> BoxFuture<'a, Result<StepResponse, StepError>>;
}

/// Runs a dynamically extended, strictly sequential list of children.
pub trait ChildChainExecutable: Send + Sync {
    fn execute_first_child<'a>(
        &'a self,
        ctx: &'a StepContext,
    ) -> BoxFuture<'a, Result<ChildChainResponse, StepError>>;

    fn execute_next_child<'a>(
        &'a self,
        ctx: &'a StepContext,
        pass_through_data: &'a PassThroughData,
        responses: &'a ResponseMap,
    ) -> BoxFuture<'a, Result<ChildChainResponse, StepError>>;

    fn finalize_execution<'a>(
        &'a self,
        ctx: &'a StepContext,
        pass_through_data: &'a PassThroughData,
        responses: &'a ResponseMap,
    ) -> BoxFuture<'a, Result<StepResponse, StepError>>;
}
