//! Node execution records, the status state machine and executable responses.
//!
//! A `NodeExecution` is one runtime instance of a `PlanNode`. Its `status` is
//! only ever changed through conditional writes in the repository, and its
//! `executable_responses` list is append-only: one entry per start/resume
//! cycle, recording what the strategy decided on that cycle.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::ambiance::Ambiance;
use crate::plan::ExecutionMode;
use crate::response::FailureInfo;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Status of a node execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Queued,
    Running,
    AsyncWaiting,
    TaskWaiting,
    ApprovalWaiting,
    ResourceWaiting,
    Succeeded,
    Failed,
    Aborted,
    Suspended,
    Expired,
}

impl Status {
    /// Every status, in declaration order.
    pub const ALL: [Status; 11] = [
        Status::Queued,
        Status::Running,
        Status::AsyncWaiting,
        Status::TaskWaiting,
        Status::ApprovalWaiting,
        Status::ResourceWaiting,
        Status::Succeeded,
        Status::Failed,
        Status::Aborted,
        Status::Suspended,
        Status::Expired,
    ];

    /// Statuses a node suspended on an external callback can be in.
    pub const WAITING: [Status; 4] = [
        Status::AsyncWaiting,
        Status::TaskWaiting,
        Status::ApprovalWaiting,
        Status::ResourceWaiting,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Status::Succeeded | Status::Failed | Status::Aborted | Status::Suspended | Status::Expired
        )
    }

    pub fn is_waiting(&self) -> bool {
        Self::WAITING.contains(self)
    }

    /// Failure outcomes that stop a chain from running further links.
    pub fn is_broken(&self) -> bool {
        matches!(self, Status::Failed | Status::Expired)
    }

    /// Whether `self -> next` is an edge of the node execution state machine.
    pub fn can_transition_to(&self, next: Status) -> bool {
        use Status::*;
        match self {
            Queued => matches!(next, Running | Aborted | Expired),
            Running => next.is_waiting() || next.is_terminal(),
            AsyncWaiting | TaskWaiting | ApprovalWaiting | ResourceWaiting => {
                matches!(next, Running | Aborted | Expired)
            }
            Succeeded | Failed | Aborted | Suspended | Expired => false,
        }
    }

    /// Statuses that may transition to `next`.
    pub fn predecessors_of(next: Status) -> Vec<Status> {
        Self::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(next))
            .collect()
    }

    /// Stable lowercase name used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Queued => "queued",
            Status::Running => "running",
            Status::AsyncWaiting => "async_waiting",
            Status::TaskWaiting => "task_waiting",
            Status::ApprovalWaiting => "approval_waiting",
            Status::ResourceWaiting => "resource_waiting",
            Status::Succeeded => "succeeded",
            Status::Failed => "failed",
            Status::Aborted => "aborted",
            Status::Suspended => "suspended",
            Status::Expired => "expired",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown status '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// PassThroughData
// ---------------------------------------------------------------------------

/// Opaque payload threaded between consecutive links of a chain strategy.
///
/// Stored as raw bytes; serialized as base64 so it survives inside JSON
/// documents across process restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassThroughData(Vec<u8>);

impl PassThroughData {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for PassThroughData {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl Serialize for PassThroughData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for PassThroughData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(encoded.as_bytes())
            .map(PassThroughData)
            .map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// ExecutableResponse
// ---------------------------------------------------------------------------

/// Which waiting status an async node parks in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsyncWaitMode {
    #[default]
    Async,
    Approval,
    Resource,
}

impl AsyncWaitMode {
    pub fn waiting_status(&self) -> Status {
        match self {
            AsyncWaitMode::Async => Status::AsyncWaiting,
            AsyncWaitMode::Approval => Status::ApprovalWaiting,
            AsyncWaitMode::Resource => Status::ResourceWaiting,
        }
    }
}

/// Where a delegated task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskMode {
    /// Queued for a remote worker.
    #[default]
    Delegate,
    /// Run by an in-process executor.
    Local,
}

/// A child spawned by a fan-out node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildSpec {
    /// Plan node the child runs.
    pub node_id: String,
    /// Node execution created for the child.
    pub node_execution_id: Uuid,
}

/// What a strategy decided on one start/resume cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutableResponse {
    Sync {},
    Async {
        callback_ids: Vec<String>,
        #[serde(default)]
        mode: AsyncWaitMode,
    },
    Task {
        task_id: String,
        #[serde(default)]
        mode: TaskMode,
    },
    TaskChain {
        task_id: Option<String>,
        #[serde(default)]
        mode: TaskMode,
        chain_end: bool,
        #[serde(default)]
        pass_through_data: PassThroughData,
    },
    Child {
        child_node_id: String,
        child_node_execution_id: Uuid,
    },
    Children {
        children: Vec<ChildSpec>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_concurrency: Option<usize>,
    },
    ChildChain {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_child_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_child_execution_id: Option<Uuid>,
        #[serde(default)]
        pass_through_data: PassThroughData,
        #[serde(default)]
        last_link: bool,
        #[serde(default)]
        suspend: bool,
    },
}

impl ExecutableResponse {
    /// Short name of the variant, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutableResponse::Sync {} => "sync",
            ExecutableResponse::Async { .. } => "async",
            ExecutableResponse::Task { .. } => "task",
            ExecutableResponse::TaskChain { .. } => "task_chain",
            ExecutableResponse::Child { .. } => "child",
            ExecutableResponse::Children { .. } => "children",
            ExecutableResponse::ChildChain { .. } => "child_chain",
        }
    }

    /// Execution mode whose strategy services the next resume.
    pub fn mode(&self) -> ExecutionMode {
        match self {
            ExecutableResponse::Sync {} => ExecutionMode::Sync,
            ExecutableResponse::Async { .. } => ExecutionMode::Async,
            ExecutableResponse::Task { .. } => ExecutionMode::Task,
            ExecutableResponse::TaskChain { .. } => ExecutionMode::TaskChain,
            ExecutableResponse::Child { .. } => ExecutionMode::Child,
            ExecutableResponse::Children { .. } => ExecutionMode::Children,
            ExecutableResponse::ChildChain { .. } => ExecutionMode::ChildChain,
        }
    }
}

// ---------------------------------------------------------------------------
// NodeExecution
// ---------------------------------------------------------------------------

/// One runtime instance of executing a plan node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecution {
    /// UUIDv7; doubles as the correlation id the parent waits on.
    pub id: Uuid,
    /// Plan node being executed.
    pub plan_node_id: String,
    /// Execution context, including this node's own level.
    pub ambiance: Ambiance,
    /// Parent node execution (None for the root).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    pub status: Status,
    /// Append-only record of start/resume decisions.
    #[serde(default)]
    pub executable_responses: Vec<ExecutableResponse>,
    /// Wait registration currently awaited (cleared when a resume is claimed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_callback: Option<String>,
    /// Outcome of the terminal step response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<serde_json::Value>,
    /// Failure details of the terminal step response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl NodeExecution {
    /// Create a queued node execution. The id must match the runtime id of the
    /// ambiance's current level.
    pub fn queued(id: Uuid, plan_node_id: impl Into<String>, ambiance: Ambiance, parent_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id,
            plan_node_id: plan_node_id.into(),
            ambiance,
            parent_id,
            status: Status::Queued,
            executable_responses: Vec::new(),
            pending_callback: None,
            outcome: None,
            failure: None,
            created_at: now,
            last_updated_at: now,
        }
    }

    pub fn latest_response(&self) -> Option<&ExecutableResponse> {
        self.executable_responses.last()
    }

    /// Identifier of the node (from the current ambiance level).
    pub fn identifier(&self) -> &str {
        self.ambiance
            .current_level()
            .map(|l| l.identifier.as_str())
            .unwrap_or(self.plan_node_id.as_str())
    }

    /// Fully-qualified name of the node.
    pub fn fqn(&self) -> String {
        self.ambiance.fqn()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
