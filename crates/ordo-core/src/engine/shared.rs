//! Shared engine state and the primitives strategies are built from.
//!
//! Strategies never write node executions directly; they go through these
//! helpers so every status change is conditional and every change is
//! published on the event bus.

use std::sync::Arc;

use dashmap::DashMap;
use ordo_types::ambiance::{Ambiance, Level};
use ordo_types::event::EngineEvent;
use ordo_types::execution::{ExecutableResponse, NodeExecution, Status};
use ordo_types::plan::{Plan, PlanNode};
use ordo_types::response::{ChildResponse, ResponseData, StepResponse};
use ordo_types::task::{QueuedTask, TaskRequest};
use uuid::Uuid;

use super::{EngineError, EngineMessage};
use crate::event::EventBus;
use crate::repository::NodeExecutionRepository;
use crate::step::{ExecutionQuery, RegisteredStep, StepContext, StepRegistry};
use crate::task::{BoxTaskExecutor, TaskExecutorError};
use crate::wait_notify::WaitNotifyEngine;

pub(crate) struct EngineCore<R: NodeExecutionRepository> {
    pub(crate) repo: Arc<R>,
    pub(crate) registry: StepRegistry,
    pub(crate) wait_notify: Arc<WaitNotifyEngine>,
    pub(crate) tasks: Option<BoxTaskExecutor>,
    pub(crate) events: EventBus,
    /// plan execution id -> plan
    plans: DashMap<Uuid, Arc<Plan>>,
}

impl<R: NodeExecutionRepository> EngineCore<R> {
    pub(crate) fn new(
        repo: Arc<R>,
        registry: StepRegistry,
        wait_notify: Arc<WaitNotifyEngine>,
        tasks: Option<BoxTaskExecutor>,
        events: EventBus,
    ) -> Self {
        Self {
            repo,
            registry,
            wait_notify,
            tasks,
            events,
            plans: DashMap::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    pub(crate) fn cache_plan(&self, plan_execution_id: Uuid, plan: Arc<Plan>) {
        self.plans.insert(plan_execution_id, plan);
    }

    /// Plan of a plan execution, loaded from the repository on first use.
    pub(crate) async fn plan(&self, plan_execution_id: Uuid) -> Result<Arc<Plan>, EngineError> {
        if let Some(plan) = self.plans.get(&plan_execution_id).map(|p| Arc::clone(&p)) {
            return Ok(plan);
        }
        let plan = self
            .repo
            .get_plan(plan_execution_id)
            .await?
            .ok_or(EngineError::PlanNotFound(plan_execution_id))?;
        let plan = Arc::new(plan);
        self.plans.insert(plan_execution_id, Arc::clone(&plan));
        Ok(plan)
    }

    pub(crate) async fn plan_node(&self, node: &NodeExecution) -> Result<PlanNode, EngineError> {
        let plan = self.plan(node.ambiance.plan_execution_id()).await?;
        plan.node(&node.plan_node_id)
            .cloned()
            .ok_or_else(|| EngineError::NodeNotFound(node.plan_node_id.clone()))
    }

    pub(crate) fn step(&self, step_type: &str) -> Result<RegisteredStep, EngineError> {
        self.registry
            .get(step_type)
            .cloned()
            .ok_or_else(|| EngineError::UnknownStepType(step_type.to_string()))
    }

    pub(crate) fn context(&self, node: &NodeExecution, plan_node: PlanNode) -> StepContext {
        let query: Arc<dyn ExecutionQuery> = Arc::clone(&self.repo) as Arc<dyn ExecutionQuery>;
        StepContext::new(node.ambiance.clone(), plan_node, node.id, query)
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    pub(crate) async fn append_response(
        &self,
        node: &mut NodeExecution,
        response: ExecutableResponse,
    ) -> Result<(), EngineError> {
        self.repo.append_response(node.id, &response).await?;
        tracing::debug!(
            node_execution_id = %node.id,
            kind = response.kind(),
            "appended executable response"
        );
        node.executable_responses.push(response);
        Ok(())
    }

    /// Park `node` until every correlation id resolves.
    ///
    /// `waiting_status` is `None` for parents waiting on children, which stay
    /// `Running`. Returns `false` if the node stopped running in the meantime
    /// (e.g. it was aborted), in which case nothing is registered.
    pub(crate) async fn suspend_on(
        &self,
        node: &NodeExecution,
        correlation_ids: Vec<String>,
        waiting_status: Option<Status>,
    ) -> Result<bool, EngineError> {
        let callback_id = Uuid::now_v7().to_string();
        if !self
            .repo
            .mark_waiting(node.id, &callback_id, waiting_status)
            .await?
        {
            tracing::debug!(node_execution_id = %node.id, "node left running before it could wait");
            return Ok(false);
        }
        if let Some(status) = waiting_status {
            self.publish_status(node, Status::Running, status);
        }
        self.wait_notify
            .register_callback(correlation_ids, node.id, callback_id)
            .await?;
        Ok(true)
    }

    /// Create a queued child node execution of `parent` for `child_node_id`.
    pub(crate) async fn spawn_child(
        &self,
        parent: &NodeExecution,
        child_node_id: &str,
    ) -> Result<NodeExecution, EngineError> {
        let plan = self.plan(parent.ambiance.plan_execution_id()).await?;
        let plan_node = plan
            .node(child_node_id)
            .ok_or_else(|| EngineError::NodeNotFound(child_node_id.to_string()))?;
        let id = Uuid::now_v7();
        let ambiance = parent
            .ambiance
            .clone_for_child(Level::for_node(plan_node, id));
        let child = NodeExecution::queued(id, child_node_id, ambiance, Some(parent.id));
        self.repo.create(&child).await?;
        self.publish_queued(&child);
        Ok(child)
    }

    /// Create and persist the root node execution of a plan execution.
    pub(crate) async fn create_root(
        &self,
        plan: &Plan,
        ambiance: Ambiance,
    ) -> Result<NodeExecution, EngineError> {
        let root = plan
            .start_node()
            .ok_or_else(|| EngineError::NodeNotFound(plan.start_node_id.clone()))?;
        let id = Uuid::now_v7();
        let ambiance = ambiance.clone_for_child(Level::for_node(root, id));
        let node = NodeExecution::queued(id, root.id.clone(), ambiance, None);
        self.repo.create(&node).await?;
        self.publish_queued(&node);
        Ok(node)
    }

    pub(crate) async fn start(&self, node_execution_id: Uuid) -> Result<(), EngineError> {
        self.wait_notify
            .sender()
            .send(EngineMessage::Start { node_execution_id })
            .await
            .map_err(|_| EngineError::QueueClosed)
    }

    pub(crate) async fn queue_task(
        &self,
        request: TaskRequest,
        ambiance: &Ambiance,
    ) -> Result<QueuedTask, EngineError> {
        let executor = self
            .tasks
            .as_ref()
            .ok_or(EngineError::TaskExecutor(TaskExecutorError::NotConfigured))?;
        let task_type = request.task_type.clone();
        let queued = executor.queue_task(request, ambiance).await?;
        tracing::debug!(
            task_id = %queued.task_id,
            task_type = %task_type,
            executor = executor.name(),
            "queued task"
        );
        Ok(queued)
    }

    /// Apply a terminal step response to a running node and report it.
    pub(crate) async fn finish(
        &self,
        node: &NodeExecution,
        response: StepResponse,
    ) -> Result<(), EngineError> {
        if !response.status.is_terminal() {
            return Err(EngineError::InvalidRequest(format!(
                "step of '{}' returned non-terminal status {}",
                node.identifier(),
                response.status
            )));
        }
        let Some(done) = self
            .repo
            .complete(node.id, &[Status::Running], &response)
            .await?
        else {
            tracing::debug!(
                node_execution_id = %node.id,
                status = %response.status,
                "node already left running; step response dropped"
            );
            return Ok(());
        };
        self.publish_status(&done, Status::Running, done.status);
        self.report_terminal(&done).await
    }

    /// Tell whoever waits on `done` that it reached a terminal status.
    pub(crate) async fn report_terminal(&self, done: &NodeExecution) -> Result<(), EngineError> {
        match done.parent_id {
            Some(parent_id) => {
                let response = ResponseData::Child(child_response(done));
                self.wait_notify
                    .resolve(&done.id.to_string(), response)
                    .await?;
                self.start_queued_siblings(parent_id).await
            }
            None => {
                let plan_execution_id = done.ambiance.plan_execution_id();
                tracing::info!(
                    plan_execution_id = %plan_execution_id,
                    status = %done.status,
                    "plan execution finished"
                );
                self.events.publish(EngineEvent::PlanExecutionFinished {
                    plan_execution_id,
                    status: done.status,
                });
                Ok(())
            }
        }
    }

    /// Start queued children of a bounded fan-out while slots are free.
    pub(crate) async fn start_queued_siblings(&self, parent_id: Uuid) -> Result<(), EngineError> {
        let Some(parent) = self.repo.get(parent_id).await? else {
            return Ok(());
        };
        let Some(ExecutableResponse::Children {
            children,
            max_concurrency: Some(limit),
        }) = parent.latest_response()
        else {
            return Ok(());
        };
        if parent.status.is_terminal() {
            return Ok(());
        }

        let siblings = self.repo.list_children(parent_id).await?;
        let running = siblings
            .iter()
            .filter(|s| s.status != Status::Queued && !s.status.is_terminal())
            .count();
        let free = limit.saturating_sub(running);
        let queued: Vec<Uuid> = children
            .iter()
            .filter(|spec| {
                siblings
                    .iter()
                    .any(|s| s.id == spec.node_execution_id && s.status == Status::Queued)
            })
            .map(|spec| spec.node_execution_id)
            .take(free)
            .collect();
        for id in queued {
            self.start(id).await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    pub(crate) fn publish_status(&self, node: &NodeExecution, from: Status, to: Status) {
        tracing::debug!(
            node_execution_id = %node.id,
            identifier = node.identifier(),
            %from,
            %to,
            "node status changed"
        );
        self.events.publish(EngineEvent::NodeStatusChanged {
            node_execution_id: node.id,
            plan_execution_id: node.ambiance.plan_execution_id(),
            identifier: node.identifier().to_string(),
            from,
            to,
        });
    }

    fn publish_queued(&self, node: &NodeExecution) {
        self.events.publish(EngineEvent::NodeQueued {
            node_execution_id: node.id,
            plan_execution_id: node.ambiance.plan_execution_id(),
            identifier: node.identifier().to_string(),
        });
    }
}

/// Summary of a finished child as delivered to its parent.
pub(crate) fn child_response(done: &NodeExecution) -> ChildResponse {
    ChildResponse {
        node_execution_id: done.id,
        identifier: done.identifier().to_string(),
        status: done.status,
        outcome: done.outcome.clone(),
        failure: done.failure.clone(),
    }
}
