use std::sync::Mutex;
use std::time::Duration;

use futures_util::future::BoxFuture;
use ordo_types::ambiance::Ambiance;
use ordo_types::execution::{AsyncWaitMode, ExecutableResponse, PassThroughData, TaskMode};
use ordo_types::plan::PlanNode;
use ordo_types::response::{ErrorKind, StepResponse};
use ordo_types::task::{QueuedTask, TaskRequest};
use serde::{Deserialize, Serialize};

use super::*;
use crate::event::wait_for_plan;
use crate::passthrough::{JsonCodec, PassThroughCodec};
use crate::repository::InMemoryNodeExecutionRepository;
use crate::rollback::{build_rollback_plan, parse_stage};
use crate::step::builtin::{PARALLEL, SECTION_CHAIN};
use crate::step::{
    AsyncExecutable, AsyncExecutableResponse, ChildChainExecutable, ChildChainResponse,
    ChildExecutable, StepContext, SyncExecutable, TaskChainExecutable, TaskChainResponse,
    TaskExecutable,
};
use crate::task::{TaskExecutor, TaskExecutorError};

const WAIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Test steps
// ---------------------------------------------------------------------------

/// Succeeds with its step parameters as outcome.
struct Emit;

impl SyncExecutable for Emit {
    fn execute_sync<'a>(
        &'a self,
        ctx: &'a StepContext,
    ) -> BoxFuture<'a, Result<StepResponse, StepError>> {
        Box::pin(async move {
            Ok(StepResponse::succeeded_with(
                ctx.plan_node().step_parameters.clone(),
            ))
        })
    }
}

/// Finishes with a fixed status.
struct Finish(Status);

impl SyncExecutable for Finish {
    fn execute_sync<'a>(
        &'a self,
        _ctx: &'a StepContext,
    ) -> BoxFuture<'a, Result<StepResponse, StepError>> {
        Box::pin(async move {
            Ok(match self.0 {
                Status::Failed => {
                    StepResponse::failed(FailureInfo::new("boom", FailureType::Application))
                }
                status => StepResponse::with_status(status),
            })
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct GateParameters {
    #[serde(default)]
    approval: bool,
    #[serde(default)]
    resource: bool,
}

/// Waits on `gate-<identifier>`; succeeds with the callback payload.
struct Gate;

impl AsyncExecutable for Gate {
    fn execute_async<'a>(
        &'a self,
        ctx: &'a StepContext,
    ) -> BoxFuture<'a, Result<AsyncExecutableResponse, StepError>> {
        Box::pin(async move {
            let params: GateParameters = ctx.parameters()?;
            Ok(AsyncExecutableResponse {
                callback_ids: vec![format!("gate-{}", ctx.plan_node().identifier)],
                mode: if params.approval {
                    AsyncWaitMode::Approval
                } else if params.resource {
                    AsyncWaitMode::Resource
                } else {
                    AsyncWaitMode::Async
                },
            })
        })
    }

    fn handle_async_response<'a>(
        &'a self,
        _ctx: &'a StepContext,
        responses: &'a ResponseMap,
    ) -> BoxFuture<'a, Result<StepResponse, StepError>> {
        Box::pin(async move {
            Ok(match responses.values().next() {
                Some(ResponseData::Callback { data }) => StepResponse::succeeded_with(data.clone()),
                _ => StepResponse::succeeded(),
            })
        })
    }
}

/// Async step that forgets to return callback ids.
struct NoCallbacks;

impl AsyncExecutable for NoCallbacks {
    fn execute_async<'a>(
        &'a self,
        _ctx: &'a StepContext,
    ) -> BoxFuture<'a, Result<AsyncExecutableResponse, StepError>> {
        Box::pin(async {
            Ok(AsyncExecutableResponse {
                callback_ids: Vec::new(),
                mode: AsyncWaitMode::Async,
            })
        })
    }

    fn handle_async_response<'a>(
        &'a self,
        _ctx: &'a StepContext,
        _responses: &'a ResponseMap,
    ) -> BoxFuture<'a, Result<StepResponse, StepError>> {
        Box::pin(async { Ok(StepResponse::succeeded()) })
    }
}

/// Task step that succeeds with the task result.
struct Build;

impl TaskExecutable for Build {
    fn obtain_task<'a>(&'a self, ctx: &'a StepContext) -> BoxFuture<'a, Result<TaskRequest, StepError>> {
        Box::pin(async move {
            Ok(TaskRequest::new(
                "build",
                ctx.plan_node().step_parameters.clone(),
            ))
        })
    }

    fn handle_task_result<'a>(
        &'a self,
        _ctx: &'a StepContext,
        responses: &'a ResponseMap,
    ) -> BoxFuture<'a, Result<StepResponse, StepError>> {
        Box::pin(async move {
            Ok(match responses.values().next() {
                Some(ResponseData::Task { data, .. }) => StepResponse::succeeded_with(data.clone()),
                _ => StepResponse::succeeded(),
            })
        })
    }
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct DeployState {
    links: Vec<String>,
    planned: Option<serde_json::Value>,
}

/// Two-link task chain: `plan`, then `apply`.
struct Deploy;

impl TaskChainExecutable for Deploy {
    fn start_chain_link<'a>(
        &'a self,
        _ctx: &'a StepContext,
    ) -> BoxFuture<'a, Result<TaskChainResponse, StepError>> {
        Box::pin(async {
            let state = DeployState {
                links: vec!["plan".into()],
                planned: None,
            };
            Ok(TaskChainResponse {
                task: Some(TaskRequest::new("plan", serde_json::json!({}))),
                chain_end: false,
                pass_through_data: JsonCodec::<DeployState>::new().encode(&state)?,
            })
        })
    }

    fn execute_next_link<'a>(
        &'a self,
        _ctx: &'a StepContext,
        pass_through_data: &'a PassThroughData,
        responses: &'a ResponseMap,
    ) -> BoxFuture<'a, Result<TaskChainResponse, StepError>> {
        Box::pin(async move {
            let codec = JsonCodec::<DeployState>::new();
            let mut state = codec.decode(pass_through_data)?;
            state.links.push("apply".into());
            if let Some(ResponseData::Task { data, .. }) = responses.values().next() {
                state.planned = Some(data.clone());
            }
            Ok(TaskChainResponse {
                task: Some(TaskRequest::new("apply", serde_json::json!({}))),
                chain_end: true,
                pass_through_data: codec.encode(&state)?,
            })
        })
    }

    fn finalize_execution<'a>(
        &'a self,
        _ctx: &'a StepContext,
        pass_through_data: &'a PassThroughData,
        _responses: &'a ResponseMap,
    ) -> BoxFuture<'a, Result<StepResponse, StepError>> {
        Box::pin(async move {
            let state = JsonCodec::<DeployState>::new().decode(pass_through_data)?;
            Ok(StepResponse::succeeded_with(serde_json::json!(state.links)))
        })
    }
}

/// Runs its first `child_ids` entry and adopts the child's outcome.
struct Wrap;

impl ChildExecutable for Wrap {
    fn obtain_child<'a>(&'a self, ctx: &'a StepContext) -> BoxFuture<'a, Result<String, StepError>> {
        Box::pin(async move {
            ctx.plan_node()
                .child_ids
                .first()
                .cloned()
                .ok_or_else(|| StepError::InvalidParameters("no child".into()))
        })
    }

    fn handle_child_response<'a>(
        &'a self,
        _ctx: &'a StepContext,
        responses: &'a ResponseMap,
    ) -> BoxFuture<'a, Result<StepResponse, StepError>> {
        Box::pin(async move {
            Ok(match responses.values().next() {
                Some(ResponseData::Child(child)) => StepResponse {
                    status: child.status,
                    failure: child.failure.clone(),
                    outcome: child.outcome.clone(),
                },
                _ => StepResponse::succeeded(),
            })
        })
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Collected {
    position: usize,
    outputs: Vec<serde_json::Value>,
}

/// Child chain over `child_ids` that carries the outcome of the `seed`
/// node and of every finished child in its pass-through data.
struct Collect;

impl Collect {
    fn link(ctx: &StepContext, state: &Collected) -> Result<ChildChainResponse, StepError> {
        let children = &ctx.plan_node().child_ids;
        let child = children
            .get(state.position)
            .cloned()
            .ok_or_else(|| StepError::Failed("chain overran its children".into()))?;
        Ok(ChildChainResponse {
            next_child_id: Some(child),
            pass_through_data: JsonCodec::<Collected>::new().encode(state)?,
            last_link: state.position + 1 == children.len(),
            suspend: false,
        })
    }

    fn absorb(state: &mut Collected, responses: &ResponseMap) {
        for data in responses.values() {
            if let ResponseData::Child(child) = data {
                state.outputs.extend(child.outcome.clone());
            }
        }
    }
}

impl ChildChainExecutable for Collect {
    fn execute_first_child<'a>(
        &'a self,
        ctx: &'a StepContext,
    ) -> BoxFuture<'a, Result<ChildChainResponse, StepError>> {
        Box::pin(async move {
            let seed = ctx.plan_node().step_parameters["seed"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            let mut state = Collected::default();
            state.outputs.extend(ctx.outcome_of(&seed).await?);
            Self::link(ctx, &state)
        })
    }

    fn execute_next_child<'a>(
        &'a self,
        ctx: &'a StepContext,
        pass_through_data: &'a PassThroughData,
        responses: &'a ResponseMap,
    ) -> BoxFuture<'a, Result<ChildChainResponse, StepError>> {
        Box::pin(async move {
            let mut state = JsonCodec::<Collected>::new().decode(pass_through_data)?;
            Self::absorb(&mut state, responses);
            state.position += 1;
            Self::link(ctx, &state)
        })
    }

    fn finalize_execution<'a>(
        &'a self,
        _ctx: &'a StepContext,
        pass_through_data: &'a PassThroughData,
        responses: &'a ResponseMap,
    ) -> BoxFuture<'a, Result<StepResponse, StepError>> {
        Box::pin(async move {
            let mut state = JsonCodec::<Collected>::new().decode(pass_through_data)?;
            Self::absorb(&mut state, responses);
            Ok(StepResponse::succeeded_with(serde_json::json!(state.outputs)))
        })
    }
}

/// Child chain with nothing to run: suspends at once and finalizes with a
/// fixed status.
struct Idle(Status);

impl ChildChainExecutable for Idle {
    fn execute_first_child<'a>(
        &'a self,
        _ctx: &'a StepContext,
    ) -> BoxFuture<'a, Result<ChildChainResponse, StepError>> {
        Box::pin(async {
            Ok(ChildChainResponse {
                next_child_id: None,
                pass_through_data: PassThroughData::default(),
                last_link: false,
                suspend: true,
            })
        })
    }

    fn execute_next_child<'a>(
        &'a self,
        _ctx: &'a StepContext,
        _pass_through_data: &'a PassThroughData,
        _responses: &'a ResponseMap,
    ) -> BoxFuture<'a, Result<ChildChainResponse, StepError>> {
        Box::pin(async { Err(StepError::Failed("idle chain has no children".into())) })
    }

    fn finalize_execution<'a>(
        &'a self,
        _ctx: &'a StepContext,
        _pass_through_data: &'a PassThroughData,
        _responses: &'a ResponseMap,
    ) -> BoxFuture<'a, Result<StepResponse, StepError>> {
        Box::pin(async move { Ok(StepResponse::with_status(self.0)) })
    }
}

/// Accepts every task and remembers it; results are notified by the test.
#[derive(Clone, Default)]
struct RecordingExecutor {
    queued: Arc<Mutex<Vec<(String, TaskRequest)>>>,
}

impl RecordingExecutor {
    fn last_task_id(&self) -> String {
        self.queued.lock().unwrap().last().unwrap().0.clone()
    }

    fn task_types(&self) -> Vec<String> {
        self.queued
            .lock()
            .unwrap()
            .iter()
            .map(|(_, r)| r.task_type.clone())
            .collect()
    }
}

impl TaskExecutor for RecordingExecutor {
    fn name(&self) -> &str {
        "recording"
    }

    async fn queue_task(
        &self,
        request: TaskRequest,
        _ambiance: &Ambiance,
    ) -> Result<QueuedTask, TaskExecutorError> {
        let task_id = format!("task-{}", Uuid::now_v7());
        self.queued.lock().unwrap().push((task_id.clone(), request));
        Ok(QueuedTask {
            task_id,
            mode: TaskMode::Delegate,
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn registry() -> StepRegistry {
    let mut registry = StepRegistry::with_builtins();
    registry.register_sync("EMIT", Emit);
    registry.register_sync("FAIL", Finish(Status::Failed));
    registry.register_sync("ABORT", Finish(Status::Aborted));
    registry.register_sync("LIMBO", Finish(Status::TaskWaiting));
    registry.register_async("GATE", Gate);
    registry.register_async("NO_CALLBACKS", NoCallbacks);
    registry.register_task("BUILD", Build);
    registry.register_task_chain("DEPLOY", Deploy);
    registry.register_child("WRAP", Wrap);
    registry.register_child_chain("COLLECT", Collect);
    registry.register_child_chain("IDLE", Idle(Status::Succeeded));
    registry.register_child_chain("IDLE_EXPIRED", Idle(Status::Expired));
    registry
}

struct Harness {
    engine: OrchestrationEngine<InMemoryNodeExecutionRepository>,
    events: broadcast::Receiver<EngineEvent>,
    executor: RecordingExecutor,
    cancel: CancellationToken,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn harness() -> Harness {
    let repo = Arc::new(InMemoryNodeExecutionRepository::new());
    let (wait_notify, queue) = WaitNotifyEngine::channel(256);
    let executor = RecordingExecutor::default();
    let engine = OrchestrationEngine::builder(repo, wait_notify)
        .registry(registry())
        .task_executor(BoxTaskExecutor::new(executor.clone()))
        .build();
    let events = engine.subscribe();
    let cancel = CancellationToken::new();
    engine.spawn(queue, cancel.clone());
    Harness {
        engine,
        events,
        executor,
        cancel,
    }
}

fn sync(id: &str, outcome: serde_json::Value) -> PlanNode {
    PlanNode::new(id, id, "EMIT", ExecutionMode::Sync).with_parameters(outcome)
}

fn gate(id: &str) -> PlanNode {
    PlanNode::new(id, id, "GATE", ExecutionMode::Async)
}

fn section(id: &str, children: &[&str]) -> PlanNode {
    PlanNode::new(id, id, SECTION_CHAIN, ExecutionMode::ChildChain).with_children(children.iter().copied())
}

impl Harness {
    async fn start(&self, plan: Plan) -> PlanExecution {
        self.engine.start_plan(plan, BTreeMap::new()).await.unwrap()
    }

    async fn finished(&mut self, execution: &PlanExecution) -> Status {
        wait_for_plan(&mut self.events, execution.plan_execution_id, WAIT)
            .await
            .expect("plan execution did not finish")
    }

    /// Identifiers of nodes reaching a terminal status, in order, until the
    /// plan execution finishes.
    async fn terminal_order(&mut self, execution: &PlanExecution) -> (Vec<String>, Status) {
        let mut order = Vec::new();
        let collect = async {
            loop {
                match self.events.recv().await.unwrap() {
                    EngineEvent::NodeStatusChanged { identifier, to, .. } if to.is_terminal() => {
                        order.push(identifier);
                    }
                    EngineEvent::PlanExecutionFinished {
                        plan_execution_id,
                        status,
                    } if plan_execution_id == execution.plan_execution_id => return status,
                    _ => {}
                }
            }
        };
        let status = tokio::time::timeout(WAIT, collect).await.unwrap();
        (order, status)
    }

    /// Wait until the node with `identifier` moves to `status`; returns its id.
    async fn reached(&mut self, identifier: &str, status: Status) -> Uuid {
        let wait = async {
            loop {
                match self.events.recv().await.unwrap() {
                    EngineEvent::NodeStatusChanged {
                        node_execution_id,
                        identifier: id,
                        to,
                        ..
                    } if id == identifier && to == status => return node_execution_id,
                    _ => {}
                }
            }
        };
        tokio::time::timeout(WAIT, wait)
            .await
            .unwrap_or_else(|_| panic!("{identifier} never reached {status}"))
    }

    async fn node(&self, id: Uuid) -> NodeExecution {
        self.engine.node_execution(id).await.unwrap().unwrap()
    }

    async fn children(&self, parent: Uuid) -> Vec<NodeExecution> {
        self.engine.repository().list_children(parent).await.unwrap()
    }
}

// ---------------------------------------------------------------------------
// Sync and child chains
// ---------------------------------------------------------------------------

#[tokio::test]
async fn child_chain_runs_in_causal_order_and_carries_outputs() {
    let mut h = harness();
    let plan = Plan::new(
        "pipeline",
        vec![
            section("pipeline", &["A", "B"]),
            sync("A", serde_json::json!("a-out")),
            PlanNode::new("B", "B", "COLLECT", ExecutionMode::ChildChain)
                .with_children(["C", "D"])
                .with_parameters(serde_json::json!({"seed": "A"})),
            sync("C", serde_json::json!("c-out")),
            sync("D", serde_json::json!("d-out")),
        ],
    );
    let execution = h.start(plan).await;

    let (order, status) = h.terminal_order(&execution).await;
    assert_eq!(status, Status::Succeeded);
    assert_eq!(order, vec!["A", "C", "D", "B", "pipeline"]);

    let root = h.node(execution.root_node_execution_id).await;
    let b = h
        .children(root.id)
        .await
        .into_iter()
        .find(|n| n.identifier() == "B")
        .unwrap();
    assert_eq!(b.status, Status::Succeeded);
    assert_eq!(b.outcome, Some(serde_json::json!(["a-out", "c-out", "d-out"])));

    // The link that spawned D carried A's and C's outputs.
    let Some(ExecutableResponse::ChildChain {
        pass_through_data, ..
    }) = b.latest_response()
    else {
        panic!("expected a child chain response");
    };
    let state = JsonCodec::<Collected>::new().decode(pass_through_data).unwrap();
    assert_eq!(state.outputs, vec![serde_json::json!("a-out"), serde_json::json!("c-out")]);
}

#[tokio::test]
async fn child_chain_resumes_once_per_child() {
    let mut h = harness();
    let plan = Plan::new(
        "chain",
        vec![
            section("chain", &["x", "y", "z"]),
            sync("x", serde_json::json!(1)),
            sync("y", serde_json::json!(2)),
            sync("z", serde_json::json!(3)),
        ],
    );
    let execution = h.start(plan).await;
    assert_eq!(h.finished(&execution).await, Status::Succeeded);

    let chain = h.node(execution.root_node_execution_id).await;
    // One response per link: the start plus one per non-final resume.
    assert_eq!(chain.executable_responses.len(), 3);
    assert!(chain.executable_responses.iter().all(|r| r.mode() == ExecutionMode::ChildChain));
    assert!(matches!(
        chain.latest_response(),
        Some(ExecutableResponse::ChildChain { last_link: true, .. })
    ));
    assert_eq!(h.children(chain.id).await.len(), 3);
}

#[tokio::test]
async fn child_chain_stops_on_aborted_child() {
    let mut h = harness();
    let plan = Plan::new(
        "chain",
        vec![
            section("chain", &["x", "y"]),
            PlanNode::new("x", "x", "ABORT", ExecutionMode::Sync),
            sync("y", serde_json::json!(2)),
        ],
    );
    let execution = h.start(plan).await;
    assert_eq!(h.finished(&execution).await, Status::Aborted);

    let children = h.children(execution.root_node_execution_id).await;
    assert_eq!(children.len(), 1, "y must never be spawned");
    assert_eq!(children[0].status, Status::Aborted);
}

#[tokio::test]
async fn failed_child_fails_the_chain_with_its_failure() {
    let mut h = harness();
    let plan = Plan::new(
        "chain",
        vec![
            section("chain", &["x", "y"]),
            PlanNode::new("x", "x", "FAIL", ExecutionMode::Sync),
            sync("y", serde_json::json!(2)),
        ],
    );
    let execution = h.start(plan).await;
    assert_eq!(h.finished(&execution).await, Status::Failed);

    let chain = h.node(execution.root_node_execution_id).await;
    let failure = chain.failure.unwrap();
    assert_eq!(failure.message, "boom");
    assert_eq!(failure.failure_types, vec![FailureType::Application]);
}

#[tokio::test]
async fn non_terminal_step_status_fails_the_node() {
    let mut h = harness();
    let plan = Plan::new(
        "chain",
        vec![
            section("chain", &["x", "y"]),
            PlanNode::new("x", "x", "LIMBO", ExecutionMode::Sync),
            sync("y", serde_json::json!(2)),
        ],
    );
    let execution = h.start(plan).await;
    assert_eq!(h.finished(&execution).await, Status::Failed);

    let children = h.children(execution.root_node_execution_id).await;
    assert_eq!(children.len(), 1, "y must never be spawned");
    assert_eq!(children[0].status, Status::Failed);
    let failure = children[0].failure.clone().unwrap();
    assert_eq!(failure.failure_types, vec![FailureType::Authoring]);
    assert!(failure.message.contains("non-terminal"), "{}", failure.message);
    assert_eq!(h.engine.wait_notify().pending_registrations(), 0);
}

#[tokio::test]
async fn suspended_chain_reports_suspended_unless_finalize_breaks() {
    let mut h = harness();
    let plan = Plan::new(
        "idle",
        vec![PlanNode::new("idle", "idle", "IDLE", ExecutionMode::ChildChain)],
    );
    let execution = h.start(plan).await;
    assert_eq!(h.finished(&execution).await, Status::Suspended);

    let plan = Plan::new(
        "idle",
        vec![PlanNode::new("idle", "idle", "IDLE_EXPIRED", ExecutionMode::ChildChain)],
    );
    let execution = h.start(plan).await;
    assert_eq!(h.finished(&execution).await, Status::Expired);
    assert_eq!(
        h.node(execution.root_node_execution_id).await.status,
        Status::Expired
    );
}

#[tokio::test]
async fn child_adopts_its_single_child_outcome() {
    let mut h = harness();
    let plan = Plan::new(
        "wrap",
        vec![
            PlanNode::new("wrap", "wrap", "WRAP", ExecutionMode::Child).with_children(["inner"]),
            sync("inner", serde_json::json!({"ok": true})),
        ],
    );
    let execution = h.start(plan).await;
    assert_eq!(h.finished(&execution).await, Status::Succeeded);

    let wrap = h.node(execution.root_node_execution_id).await;
    assert_eq!(wrap.outcome, Some(serde_json::json!({"ok": true})));
    assert!(matches!(
        wrap.latest_response(),
        Some(ExecutableResponse::Child { child_node_id, .. }) if child_node_id == "inner"
    ));
}

// ---------------------------------------------------------------------------
// Async and wait/notify
// ---------------------------------------------------------------------------

#[tokio::test]
async fn async_without_callbacks_fails_without_registering() {
    let mut h = harness();
    let plan = Plan::new(
        "n",
        vec![PlanNode::new("n", "n", "NO_CALLBACKS", ExecutionMode::Async)],
    );
    let execution = h.start(plan).await;
    assert_eq!(h.finished(&execution).await, Status::Failed);

    let node = h.node(execution.root_node_execution_id).await;
    assert_eq!(
        node.failure.unwrap().failure_types,
        vec![FailureType::Authoring]
    );
    assert!(node.executable_responses.is_empty());
    assert_eq!(h.engine.wait_notify().pending_registrations(), 0);
}

#[tokio::test]
async fn approval_waits_until_notified() {
    let mut h = harness();
    let plan = Plan::new(
        "approve",
        vec![gate("approve").with_parameters(serde_json::json!({"approval": true}))],
    );
    let execution = h.start(plan).await;
    let id = h.reached("approve", Status::ApprovalWaiting).await;
    assert_eq!(h.node(id).await.status, Status::ApprovalWaiting);

    let data = ResponseData::Callback {
        data: serde_json::json!({"approved_by": "ops"}),
    };
    let (first, second) = tokio::join!(
        h.engine.notify("gate-approve", data.clone()),
        h.engine.notify("gate-approve", data)
    );
    assert!(first.unwrap() ^ second.unwrap(), "exactly one notify is accepted");

    assert_eq!(h.finished(&execution).await, Status::Succeeded);
    let node = h.node(id).await;
    assert_eq!(node.outcome, Some(serde_json::json!({"approved_by": "ops"})));
    assert!(node.pending_callback.is_none());
}

#[tokio::test]
async fn resource_gate_waits_until_notified() {
    let mut h = harness();
    let plan = Plan::new(
        "lock",
        vec![gate("lock").with_parameters(serde_json::json!({"resource": true}))],
    );
    let execution = h.start(plan).await;
    let id = h.reached("lock", Status::ResourceWaiting).await;

    let node = h.node(id).await;
    assert_eq!(node.status, Status::ResourceWaiting);
    assert!(matches!(
        node.latest_response(),
        Some(ExecutableResponse::Async {
            mode: AsyncWaitMode::Resource,
            ..
        })
    ));

    h.engine
        .notify(
            "gate-lock",
            ResponseData::Callback {
                data: serde_json::json!("acquired"),
            },
        )
        .await
        .unwrap();
    assert_eq!(h.finished(&execution).await, Status::Succeeded);
    assert_eq!(h.node(id).await.outcome, Some(serde_json::json!("acquired")));
}

#[tokio::test]
async fn duplicate_resume_applies_once() {
    let mut h = harness();
    let plan = Plan::new("wait", vec![gate("wait")]);
    let execution = h.start(plan).await;
    let id = h.reached("wait", Status::AsyncWaiting).await;

    let callback_id = h.node(id).await.pending_callback.unwrap();
    let message = EngineMessage::Resume {
        node_execution_id: id,
        callback_id,
        responses: ResponseMap::new(),
    };
    tokio::join!(h.engine.apply(message.clone()), h.engine.apply(message));

    let mut resumed = 0;
    let status = tokio::time::timeout(WAIT, async {
        loop {
            match h.events.recv().await.unwrap() {
                EngineEvent::NodeStatusChanged { from, to, .. }
                    if from == Status::AsyncWaiting && to == Status::Running =>
                {
                    resumed += 1;
                }
                EngineEvent::PlanExecutionFinished {
                    plan_execution_id,
                    status,
                } if plan_execution_id == execution.plan_execution_id => return status,
                _ => {}
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(status, Status::Succeeded);
    assert_eq!(resumed, 1);
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn task_result_completes_the_node() {
    let mut h = harness();
    let plan = Plan::new(
        "build",
        vec![PlanNode::new("build", "build", "BUILD", ExecutionMode::Task)
            .with_parameters(serde_json::json!({"target": "x86_64"}))],
    );
    let execution = h.start(plan).await;
    let id = h.reached("build", Status::TaskWaiting).await;

    let task_id = h.executor.last_task_id();
    assert!(matches!(
        h.node(id).await.latest_response(),
        Some(ExecutableResponse::Task { task_id: recorded, .. }) if *recorded == task_id
    ));
    h.engine
        .notify(
            &task_id,
            ResponseData::Task {
                task_id: task_id.clone(),
                data: serde_json::json!({"artifact": "app.tar"}),
            },
        )
        .await
        .unwrap();

    assert_eq!(h.finished(&execution).await, Status::Succeeded);
    assert_eq!(h.node(id).await.outcome, Some(serde_json::json!({"artifact": "app.tar"})));
}

#[tokio::test]
async fn task_error_fails_the_node() {
    let mut h = harness();
    let plan = Plan::new(
        "build",
        vec![PlanNode::new("build", "build", "BUILD", ExecutionMode::Task)],
    );
    let execution = h.start(plan).await;
    let id = h.reached("build", Status::TaskWaiting).await;

    let task_id = h.executor.last_task_id();
    h.engine
        .notify(
            &task_id,
            ResponseData::Error {
                message: "task timed out".into(),
                kind: ErrorKind::Timeout,
            },
        )
        .await
        .unwrap();

    assert_eq!(h.finished(&execution).await, Status::Failed);
    let failure = h.node(id).await.failure.unwrap();
    assert_eq!(failure.message, "task timed out");
    assert_eq!(failure.failure_types, vec![FailureType::Timeout]);
}

#[tokio::test]
async fn task_chain_persists_pass_through_between_links() {
    let mut h = harness();
    let plan = Plan::new(
        "deploy",
        vec![PlanNode::new("deploy", "deploy", "DEPLOY", ExecutionMode::TaskChain)],
    );
    let execution = h.start(plan).await;

    let id = h.reached("deploy", Status::TaskWaiting).await;
    let first = h.executor.last_task_id();
    h.engine
        .notify(
            &first,
            ResponseData::Task {
                task_id: first.clone(),
                data: serde_json::json!({"changes": 3}),
            },
        )
        .await
        .unwrap();

    h.reached("deploy", Status::TaskWaiting).await;
    // The second link is durable before its task completes.
    let node = h.node(id).await;
    let Some(ExecutableResponse::TaskChain {
        chain_end: true,
        pass_through_data,
        ..
    }) = node.latest_response()
    else {
        panic!("expected the final task chain link");
    };
    let state = JsonCodec::<DeployState>::new().decode(pass_through_data).unwrap();
    assert_eq!(state.links, vec!["plan", "apply"]);
    assert_eq!(state.planned, Some(serde_json::json!({"changes": 3})));

    let second = h.executor.last_task_id();
    assert_ne!(first, second);
    h.engine
        .notify(
            &second,
            ResponseData::Task {
                task_id: second.clone(),
                data: serde_json::json!({}),
            },
        )
        .await
        .unwrap();

    assert_eq!(h.finished(&execution).await, Status::Succeeded);
    assert_eq!(h.executor.task_types(), vec!["plan", "apply"]);
    assert_eq!(h.node(id).await.outcome, Some(serde_json::json!(["plan", "apply"])));
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

#[tokio::test]
async fn children_respect_max_concurrency() {
    let mut h = harness();
    let plan = Plan::new(
        "fan",
        vec![
            PlanNode::new("fan", "fan", PARALLEL, ExecutionMode::Children)
                .with_children(["a", "b", "c"])
                .with_parameters(serde_json::json!({"maxConcurrency": 1})),
            gate("a"),
            gate("b"),
            gate("c"),
        ],
    );
    let execution = h.start(plan).await;
    let fan = execution.root_node_execution_id;

    for (current, rest) in [("a", 2), ("b", 1), ("c", 0)] {
        h.reached(current, Status::AsyncWaiting).await;
        let children = h.children(fan).await;
        assert_eq!(children.len(), 3);
        let queued = children.iter().filter(|c| c.status == Status::Queued).count();
        assert_eq!(queued, rest, "only {current} may be running");
        h.engine
            .notify(
                &format!("gate-{current}"),
                ResponseData::Callback {
                    data: serde_json::json!(current),
                },
            )
            .await
            .unwrap();
    }

    assert_eq!(h.finished(&execution).await, Status::Succeeded);
}

#[tokio::test]
async fn empty_fan_out_completes_immediately() {
    let mut h = harness();
    let plan = Plan::new(
        "fan",
        vec![PlanNode::new("fan", "fan", PARALLEL, ExecutionMode::Children)],
    );
    let execution = h.start(plan).await;
    assert_eq!(h.finished(&execution).await, Status::Succeeded);
    assert_eq!(h.engine.wait_notify().pending_registrations(), 0);
}

// ---------------------------------------------------------------------------
// Interrupts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn abort_reaches_live_descendants() {
    let mut h = harness();
    let plan = Plan::new("pipeline", vec![section("pipeline", &["w"]), gate("w")]);
    let execution = h.start(plan).await;
    let w = h.reached("w", Status::AsyncWaiting).await;

    assert!(h.engine.abort(execution.root_node_execution_id).await.unwrap());
    assert_eq!(h.finished(&execution).await, Status::Aborted);
    assert_eq!(h.node(w).await.status, Status::Aborted);
    assert_eq!(h.engine.wait_notify().pending_registrations(), 0);

    assert!(!h.engine.abort(execution.root_node_execution_id).await.unwrap());
}

#[tokio::test]
async fn expire_reports_a_timeout_to_the_parent() {
    let mut h = harness();
    let plan = Plan::new("pipeline", vec![section("pipeline", &["w"]), gate("w")]);
    let execution = h.start(plan).await;
    let w = h.reached("w", Status::AsyncWaiting).await;

    assert!(h.engine.expire(w).await.unwrap());
    assert_eq!(h.finished(&execution).await, Status::Expired);
    let failure = h.node(w).await.failure.unwrap();
    assert_eq!(failure.failure_types, vec![FailureType::Timeout]);
}

// ---------------------------------------------------------------------------
// Recovery
// ---------------------------------------------------------------------------

/// A second engine over an existing repository, as after a restart.
fn restarted(
    repo: Arc<InMemoryNodeExecutionRepository>,
) -> (OrchestrationEngine<InMemoryNodeExecutionRepository>, CancellationToken) {
    let (wait_notify, queue) = WaitNotifyEngine::channel(256);
    let engine = OrchestrationEngine::builder(repo, wait_notify)
        .registry(registry())
        .build();
    let cancel = CancellationToken::new();
    engine.spawn(queue, cancel.clone());
    (engine, cancel)
}

#[tokio::test]
async fn recover_registers_async_wait_again() {
    let mut h = harness();
    let plan = Plan::new("pipeline", vec![section("pipeline", &["w"]), gate("w")]);
    let execution = h.start(plan).await;
    let w = h.reached("w", Status::AsyncWaiting).await;
    h.cancel.cancel();

    let (engine, cancel) = restarted(Arc::clone(h.engine.repository()));
    let mut events = engine.subscribe();
    let recovery = engine.recover(execution.plan_execution_id).await.unwrap();
    assert_eq!(recovery.registered, 2);
    assert_eq!(recovery.stranded, 0);
    assert_eq!(engine.wait_notify().pending_registrations(), 2);

    let data = ResponseData::Callback {
        data: serde_json::json!("late"),
    };
    assert!(engine.notify("gate-w", data).await.unwrap());
    let status = wait_for_plan(&mut events, execution.plan_execution_id, WAIT).await;
    assert_eq!(status, Some(Status::Succeeded));
    assert_eq!(h.node(w).await.outcome, Some(serde_json::json!("late")));
    cancel.cancel();
}

#[tokio::test]
async fn recover_unknown_plan_execution_fails() {
    let h = harness();
    let err = h.engine.recover(Uuid::now_v7()).await.unwrap_err();
    assert!(matches!(err, EngineError::PlanNotFound(_)));
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn start_plan_rejects_mode_mismatch() {
    let h = harness();
    let plan = Plan::new("n", vec![PlanNode::new("n", "n", "EMIT", ExecutionMode::Task)]);
    let err = h.engine.start_plan(plan, BTreeMap::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::Plan(PlanError::ModeMismatch { .. })));
    assert!(h.engine.repository().is_empty());
}

// ---------------------------------------------------------------------------
// Rollback
// ---------------------------------------------------------------------------

const STAGE: &str = r#"
identifier: deploy
spec:
  execution:
    steps:
      - stepGroup:
          identifier: g1
          steps:
            - step: { identifier: s1, type: FAIL }
          rollbackSteps:
            - step: { identifier: undo_g1, type: EMIT }
      - stepGroup:
          identifier: g2
          steps:
            - step: { identifier: s2, type: EMIT }
          rollbackSteps:
            - step: { identifier: undo_g2, type: EMIT }
    rollbackSteps:
      - step: { identifier: undo_stage, type: EMIT }
"#;

/// Forward plan laid out at `pipeline.stages.deploy.spec.execution.steps`.
fn forward_plan() -> Plan {
    Plan::new(
        "pipeline",
        vec![
            section("pipeline", &["stages"]),
            section("stages", &["deploy"]),
            section("deploy", &["spec"]),
            section("spec", &["execution"]),
            section("execution", &["steps"]),
            section("steps", &["g1", "g2"]),
            section("g1", &["s1"]),
            PlanNode::new("s1", "s1", "FAIL", ExecutionMode::Sync),
            section("g2", &["s2"]),
            sync("s2", serde_json::json!(null)),
        ],
    )
}

#[tokio::test]
async fn rollback_skips_groups_that_never_ran() {
    let mut h = harness();
    let forward = h.start(forward_plan()).await;
    assert_eq!(h.finished(&forward).await, Status::Failed);

    let stage = parse_stage(STAGE).unwrap();
    let rollback = build_rollback_plan(&stage, h.engine.registry()).unwrap();
    let execution = h
        .engine
        .start_rollback(rollback, forward.plan_execution_id, BTreeMap::new())
        .await
        .unwrap()
        .unwrap();

    let (order, status) = h.terminal_order(&execution).await;
    assert_eq!(status, Status::Succeeded);
    assert!(!order.iter().any(|id| id == "undo_g2"), "g2 never ran: {order:?}");
    let g1 = order.iter().position(|id| id == "undo_g1").unwrap();
    let stage_undo = order.iter().position(|id| id == "undo_stage").unwrap();
    assert!(g1 < stage_undo);
    assert_eq!(order.last().map(String::as_str), Some("deploy"));
}

#[tokio::test]
async fn rollback_of_unstarted_stage_suspends() {
    let mut h = harness();
    let stage = parse_stage(STAGE).unwrap();
    let rollback = build_rollback_plan(&stage, h.engine.registry()).unwrap();
    let execution = h
        .engine
        .start_rollback(rollback, Uuid::now_v7(), BTreeMap::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(h.finished(&execution).await, Status::Suspended);
}

#[tokio::test]
async fn empty_rollback_starts_nothing() {
    let h = harness();
    let started = h
        .engine
        .start_rollback(RollbackPlan::default(), Uuid::now_v7(), BTreeMap::new())
        .await
        .unwrap();
    assert!(started.is_none());
    assert!(h.engine.repository().is_empty());
}
