//! Step responses and the payloads delivered through wait/notify.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::execution::Status;

// ---------------------------------------------------------------------------
// Failure information
// ---------------------------------------------------------------------------

/// Category of a failure, used by consumers deciding how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    /// The plan or step is misconfigured; retrying cannot help.
    Authoring,
    /// The step itself reported a failure.
    Application,
    /// The task executor or a worker failed.
    Infrastructure,
    /// A delegated task or wait ran out of time.
    Timeout,
    /// The execution was aborted.
    Aborted,
}

/// Structured failure data attached to a failed step response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub message: String,
    #[serde(default)]
    pub failure_types: Vec<FailureType>,
}

impl FailureInfo {
    pub fn new(message: impl Into<String>, failure_type: FailureType) -> Self {
        Self {
            message: message.into(),
            failure_types: vec![failure_type],
        }
    }
}

// ---------------------------------------------------------------------------
// StepResponse
// ---------------------------------------------------------------------------

/// Terminal result of a node, handed to the engine by a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResponse {
    /// Terminal status to apply.
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<serde_json::Value>,
}

impl StepResponse {
    pub fn succeeded() -> Self {
        Self {
            status: Status::Succeeded,
            failure: None,
            outcome: None,
        }
    }

    pub fn succeeded_with(outcome: serde_json::Value) -> Self {
        Self {
            status: Status::Succeeded,
            failure: None,
            outcome: Some(outcome),
        }
    }

    pub fn failed(failure: FailureInfo) -> Self {
        Self {
            status: Status::Failed,
            failure: Some(failure),
            outcome: None,
        }
    }

    pub fn with_status(status: Status) -> Self {
        Self {
            status,
            failure: None,
            outcome: None,
        }
    }

    pub fn with_outcome(mut self, outcome: serde_json::Value) -> Self {
        self.outcome = Some(outcome);
        self
    }
}

// ---------------------------------------------------------------------------
// ResponseData
// ---------------------------------------------------------------------------

/// Kind of infrastructure failure carried by an error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No worker advertises the capabilities a task requires.
    NoCapableWorker,
    /// The task did not complete within its timeout.
    Timeout,
    /// The worker failed while running the task.
    WorkerFailure,
}

impl ErrorKind {
    pub fn failure_type(&self) -> FailureType {
        match self {
            ErrorKind::Timeout => FailureType::Timeout,
            ErrorKind::NoCapableWorker | ErrorKind::WorkerFailure => FailureType::Infrastructure,
        }
    }
}

/// Terminal summary of a child node, delivered to its parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildResponse {
    pub node_execution_id: Uuid,
    pub identifier: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
}

/// Payload delivered for one correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseData {
    /// A child node reached a terminal status.
    Child(ChildResponse),
    /// A delegated task completed.
    Task { task_id: String, data: serde_json::Value },
    /// The task executor could not produce a result.
    Error { message: String, kind: ErrorKind },
    /// Payload from an external party resolving an async callback.
    Callback { data: serde_json::Value },
    /// Sentinel resolved by a chain that has nothing further to run.
    Suspended,
}

impl ResponseData {
    /// Status carried by the payload, if any.
    pub fn status(&self) -> Option<Status> {
        match self {
            ResponseData::Child(child) => Some(child.status),
            ResponseData::Suspended => Some(Status::Suspended),
            ResponseData::Error { .. } => Some(Status::Failed),
            ResponseData::Task { .. } | ResponseData::Callback { .. } => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ResponseData::Error { .. })
    }
}

/// Correlation id to payload, as assembled by wait/notify.
pub type ResponseMap = BTreeMap<String, ResponseData>;
