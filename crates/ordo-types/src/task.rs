//! Delegated task descriptions exchanged with the task executor.

use serde::{Deserialize, Serialize};

use crate::execution::TaskMode;

/// Default task timeout (10 minutes).
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 600;

fn default_timeout_secs() -> u64 {
    DEFAULT_TASK_TIMEOUT_SECS
}

/// Opaque description of work to run outside the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Task type a worker must know how to run.
    pub task_type: String,
    /// Serialized task parameters.
    #[serde(default)]
    pub parameters: serde_json::Value,
    /// How long the executor may take before reporting a timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Capabilities the worker must advertise.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
}

impl TaskRequest {
    pub fn new(task_type: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            task_type: task_type.into(),
            parameters,
            timeout_secs: DEFAULT_TASK_TIMEOUT_SECS,
            capabilities: Vec::new(),
        }
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }
}

/// Handle returned by the executor once a task is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedTask {
    /// Correlation id the executor will resolve with the result.
    pub task_id: String,
    pub mode: TaskMode,
}
