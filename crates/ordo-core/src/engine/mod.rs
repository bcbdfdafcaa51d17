//! Orchestration engine facade.
//!
//! Receives start/resume work keyed by node execution id, dispatches to the
//! strategy for the node's declared mode and feeds terminal step responses
//! back into the node execution state machine.
//!
//! All work flows through one bounded queue of `EngineMessage`s: the engine
//! sends `Start` for nodes it creates, and the wait/notify engine sends
//! `Resume` when a registration fires. `OrchestrationEngine::run` drains the
//! queue and spawns one task per message; the repository's conditional
//! writes make sure only one of them owns a node at a time.

mod shared;
mod interrupt;
mod recover;

use std::collections::BTreeMap;
use std::sync::Arc;

use ordo_types::ambiance::{Ambiance, ORIGINAL_PLAN_EXECUTION_ID_KEY};
use ordo_types::error::RepositoryError;
use ordo_types::event::EngineEvent;
use ordo_types::execution::{NodeExecution, Status};
use ordo_types::plan::{ExecutionMode, Plan};
use ordo_types::response::{FailureInfo, FailureType, ResponseData, ResponseMap, StepResponse};
use ordo_types::rollback::RollbackPlan;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use self::recover::Recovery;
pub(crate) use self::shared::EngineCore;
use crate::event::EventBus;
use crate::passthrough::PassThroughError;
use crate::plan::{PlanError, validate_plan};
use crate::repository::NodeExecutionRepository;
use crate::step::{RegisteredStep, StepError, StepRegistry};
use crate::strategy::{
    AsyncStrategy, ChildChainStrategy, ChildStrategy, ChildrenStrategy, ExecutionStrategy,
    SyncStrategy, TaskChainStrategy, TaskStrategy,
};
use crate::task::{BoxTaskExecutor, TaskExecutorError};
use crate::wait_notify::{WaitNotifyEngine, WaitNotifyError};

// ---------------------------------------------------------------------------
// Messages and errors
// ---------------------------------------------------------------------------

/// Work item for the engine's apply loop.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineMessage {
    /// Run `start` for a queued node execution.
    Start { node_execution_id: Uuid },
    /// Run `resume` for a node whose wait registration fired.
    Resume {
        node_execution_id: Uuid,
        callback_id: String,
        responses: ResponseMap,
    },
}

impl EngineMessage {
    pub fn node_execution_id(&self) -> Uuid {
        match self {
            EngineMessage::Start { node_execution_id }
            | EngineMessage::Resume {
                node_execution_id, ..
            } => *node_execution_id,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The plan or a step response is malformed. Fails the node; retrying
    /// cannot help.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("step error: {0}")]
    Step(#[from] StepError),

    #[error("plan not found for plan execution {0}")]
    PlanNotFound(Uuid),

    #[error("plan node not found: {0}")]
    NodeNotFound(String),

    #[error("node execution not found: {0}")]
    NodeExecutionNotFound(Uuid),

    #[error("no step registered for type '{0}'")]
    UnknownStepType(String),

    #[error("invalid plan: {0}")]
    Plan(#[from] PlanError),

    #[error("wait/notify error: {0}")]
    WaitNotify(#[from] WaitNotifyError),

    #[error("task executor error: {0}")]
    TaskExecutor(#[from] TaskExecutorError),

    #[error(transparent)]
    PassThrough(#[from] PassThroughError),

    #[error("engine queue closed")]
    QueueClosed,
}

impl EngineError {
    /// Failure category recorded when this error fails a node.
    pub fn failure_type(&self) -> FailureType {
        match self {
            EngineError::InvalidRequest(_)
            | EngineError::NodeNotFound(_)
            | EngineError::UnknownStepType(_)
            | EngineError::Plan(_)
            | EngineError::PassThrough(_)
            | EngineError::Step(StepError::InvalidParameters(_)) => FailureType::Authoring,
            EngineError::Step(_) => FailureType::Application,
            _ => FailureType::Infrastructure,
        }
    }

    /// Errors from storage or the queue. They leave the node as it is so it
    /// can be driven again, instead of failing it.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::Repository(_)
                | EngineError::QueueClosed
                | EngineError::WaitNotify(WaitNotifyError::QueueClosed)
        )
    }
}

/// Ids of a started plan execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanExecution {
    pub plan_execution_id: Uuid,
    pub root_node_execution_id: Uuid,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles an `OrchestrationEngine`.
pub struct EngineBuilder<R: NodeExecutionRepository> {
    repo: Arc<R>,
    wait_notify: Arc<WaitNotifyEngine>,
    registry: StepRegistry,
    events: Option<EventBus>,
    tasks: Option<BoxTaskExecutor>,
}

impl<R: NodeExecutionRepository> EngineBuilder<R> {
    pub fn registry(mut self, registry: StepRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn task_executor(mut self, executor: BoxTaskExecutor) -> Self {
        self.tasks = Some(executor);
        self
    }

    pub fn build(self) -> OrchestrationEngine<R> {
        let events = self.events.unwrap_or_else(|| EventBus::new(1024));
        OrchestrationEngine {
            core: Arc::new(EngineCore::new(
                self.repo,
                self.registry,
                self.wait_notify,
                self.tasks,
                events,
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// OrchestrationEngine
// ---------------------------------------------------------------------------

/// Entry point for running plans. Cheap to clone.
pub struct OrchestrationEngine<R: NodeExecutionRepository> {
    core: Arc<EngineCore<R>>,
}

impl<R: NodeExecutionRepository> Clone for OrchestrationEngine<R> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<R: NodeExecutionRepository> OrchestrationEngine<R> {
    /// Start building an engine. The registry defaults to the built-in
    /// structural steps.
    pub fn builder(repo: Arc<R>, wait_notify: Arc<WaitNotifyEngine>) -> EngineBuilder<R> {
        EngineBuilder {
            repo,
            wait_notify,
            registry: StepRegistry::with_builtins(),
            events: None,
            tasks: None,
        }
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.core.repo
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.core.registry
    }

    pub fn wait_notify(&self) -> &Arc<WaitNotifyEngine> {
        &self.core.wait_notify
    }

    pub fn events(&self) -> &EventBus {
        &self.core.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.core.events.subscribe()
    }

    // -----------------------------------------------------------------------
    // Submitting work
    // -----------------------------------------------------------------------

    /// Validate and persist `plan`, create its root node execution and queue
    /// it to start.
    pub async fn start_plan(
        &self,
        plan: Plan,
        setup_abstractions: BTreeMap<String, String>,
    ) -> Result<PlanExecution, EngineError> {
        validate_plan(&plan, &self.core.registry)?;

        let plan_execution_id = Uuid::now_v7();
        self.core.repo.save_plan(plan_execution_id, &plan).await?;
        let ambiance = Ambiance::new(plan_execution_id, plan.id, setup_abstractions);
        let root = self.core.create_root(&plan, ambiance).await?;
        self.core.cache_plan(plan_execution_id, Arc::new(plan));

        tracing::info!(
            plan_execution_id = %plan_execution_id,
            root_node_execution_id = %root.id,
            "plan execution started"
        );
        self.core.start(root.id).await?;

        Ok(PlanExecution {
            plan_execution_id,
            root_node_execution_id: root.id,
        })
    }

    /// Start the rollback of `forward_plan_execution_id`.
    ///
    /// Returns `None` for an empty rollback plan: there is nothing to undo.
    pub async fn start_rollback(
        &self,
        rollback: RollbackPlan,
        forward_plan_execution_id: Uuid,
        mut setup_abstractions: BTreeMap<String, String>,
    ) -> Result<Option<PlanExecution>, EngineError> {
        let Some(plan) = rollback.into_plan() else {
            tracing::info!(
                plan_execution_id = %forward_plan_execution_id,
                "rollback plan is empty; nothing to roll back"
            );
            return Ok(None);
        };
        setup_abstractions.insert(
            ORIGINAL_PLAN_EXECUTION_ID_KEY.to_string(),
            forward_plan_execution_id.to_string(),
        );
        self.start_plan(plan, setup_abstractions).await.map(Some)
    }

    /// Deliver a result for a correlation id (task id, async callback id).
    ///
    /// Returns `false` for a duplicate.
    pub async fn notify(&self, correlation_id: &str, data: ResponseData) -> Result<bool, EngineError> {
        Ok(self.core.wait_notify.resolve(correlation_id, data).await?)
    }

    pub async fn node_execution(&self, id: Uuid) -> Result<Option<NodeExecution>, EngineError> {
        Ok(self.core.repo.get(id).await?)
    }

    // -----------------------------------------------------------------------
    // Apply loop
    // -----------------------------------------------------------------------

    /// Spawn the apply loop on the current runtime.
    pub fn spawn(
        &self,
        queue: mpsc::Receiver<EngineMessage>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move { engine.run(queue, cancel).await })
    }

    /// Drain the engine queue until it closes or `cancel` fires.
    pub async fn run(self, mut queue: mpsc::Receiver<EngineMessage>, cancel: CancellationToken) {
        let mut tasks = JoinSet::new();
        tracing::debug!("engine apply loop started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                message = queue.recv() => {
                    let Some(message) = message else { break };
                    let engine = self.clone();
                    tasks.spawn(async move { engine.apply(message).await });
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "engine task panicked");
                    }
                }
            }
        }
        tasks.shutdown().await;
        tracing::debug!("engine apply loop stopped");
    }

    /// Process one message to completion.
    pub async fn apply(&self, message: EngineMessage) {
        let node_execution_id = message.node_execution_id();
        let result = match message {
            EngineMessage::Start { node_execution_id } => self.start_node(node_execution_id).await,
            EngineMessage::Resume {
                node_execution_id,
                callback_id,
                responses,
            } => {
                self.resume_node(node_execution_id, &callback_id, responses)
                    .await
            }
        };
        if let Err(e) = result {
            tracing::error!(
                node_execution_id = %node_execution_id,
                error = %e,
                "engine message failed"
            );
        }
    }

    async fn start_node(&self, id: Uuid) -> Result<(), EngineError> {
        let core = &self.core;
        let Some(node) = core
            .repo
            .update_status(id, &[Status::Queued], Status::Running)
            .await?
        else {
            tracing::debug!(node_execution_id = %id, "start ignored; node is not queued");
            return Ok(());
        };
        core.publish_status(&node, Status::Queued, Status::Running);

        let outcome = self.dispatch_start(&node).await;
        self.settle(&node, outcome).await
    }

    async fn resume_node(
        &self,
        id: Uuid,
        callback_id: &str,
        responses: ResponseMap,
    ) -> Result<(), EngineError> {
        let core = &self.core;
        let Some(mut node) = core.repo.claim_resume(id, callback_id).await? else {
            tracing::debug!(
                node_execution_id = %id,
                callback_id,
                "resume ignored; already claimed or node moved on"
            );
            return Ok(());
        };
        if node.status != Status::Running {
            core.publish_status(&node, node.status, Status::Running);
        }
        node.status = Status::Running;
        node.pending_callback = None;

        let outcome = self.dispatch_resume(&node, responses).await;
        self.settle(&node, outcome).await
    }

    /// Turn a non-transient strategy error into a failed step response.
    async fn settle(
        &self,
        node: &NodeExecution,
        outcome: Result<(), EngineError>,
    ) -> Result<(), EngineError> {
        match outcome {
            Ok(()) => Ok(()),
            Err(e) if e.is_transient() => Err(e),
            Err(e) => {
                tracing::warn!(
                    node_execution_id = %node.id,
                    identifier = node.identifier(),
                    error = %e,
                    "failing node"
                );
                let failure = FailureInfo::new(e.to_string(), e.failure_type());
                self.core.finish(node, StepResponse::failed(failure)).await
            }
        }
    }

    async fn dispatch_start(&self, node: &NodeExecution) -> Result<(), EngineError> {
        let core = self.core.as_ref();
        let plan_node = core.plan_node(node).await?;
        let step = core.step(&plan_node.step_type)?;
        check_mode(plan_node.mode, &step)?;
        let ctx = core.context(node, plan_node);
        let node = node.clone();

        match step {
            RegisteredStep::Sync(s) => SyncStrategy.start(core, &*s, &ctx, node).await,
            RegisteredStep::Async(s) => AsyncStrategy.start(core, &*s, &ctx, node).await,
            RegisteredStep::Task(s) => TaskStrategy.start(core, &*s, &ctx, node).await,
            RegisteredStep::TaskChain(s) => TaskChainStrategy.start(core, &*s, &ctx, node).await,
            RegisteredStep::Child(s) => ChildStrategy.start(core, &*s, &ctx, node).await,
            RegisteredStep::Children(s) => ChildrenStrategy.start(core, &*s, &ctx, node).await,
            RegisteredStep::ChildChain(s) => ChildChainStrategy.start(core, &*s, &ctx, node).await,
        }
    }

    async fn dispatch_resume(
        &self,
        node: &NodeExecution,
        responses: ResponseMap,
    ) -> Result<(), EngineError> {
        let core = self.core.as_ref();
        let plan_node = core.plan_node(node).await?;
        let step = core.step(&plan_node.step_type)?;
        check_mode(plan_node.mode, &step)?;
        let Some(latest) = node.latest_response() else {
            return Err(EngineError::InvalidRequest(format!(
                "node execution {} resumed before it started",
                node.id
            )));
        };
        if latest.mode() != plan_node.mode {
            return Err(EngineError::InvalidRequest(format!(
                "{} response recorded for a {} node",
                latest.kind(),
                plan_node.mode
            )));
        }
        let ctx = core.context(node, plan_node);
        let node = node.clone();

        match step {
            RegisteredStep::Sync(s) => SyncStrategy.resume(core, &*s, &ctx, node, responses).await,
            RegisteredStep::Async(s) => AsyncStrategy.resume(core, &*s, &ctx, node, responses).await,
            RegisteredStep::Task(s) => TaskStrategy.resume(core, &*s, &ctx, node, responses).await,
            RegisteredStep::TaskChain(s) => {
                TaskChainStrategy.resume(core, &*s, &ctx, node, responses).await
            }
            RegisteredStep::Child(s) => ChildStrategy.resume(core, &*s, &ctx, node, responses).await,
            RegisteredStep::Children(s) => {
                ChildrenStrategy.resume(core, &*s, &ctx, node, responses).await
            }
            RegisteredStep::ChildChain(s) => {
                ChildChainStrategy.resume(core, &*s, &ctx, node, responses).await
            }
        }
    }
}

fn check_mode(declared: ExecutionMode, step: &RegisteredStep) -> Result<(), EngineError> {
    if step.mode() == declared {
        Ok(())
    } else {
        Err(EngineError::InvalidRequest(format!(
            "node declares {declared} mode but its step is registered as {}",
            step.mode()
        )))
    }
}

#[cfg(test)]
mod tests;
