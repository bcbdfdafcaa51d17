//! In-process task executor.
//!
//! `LocalTaskExecutor` accepts every task, runs it on the tokio runtime with
//! the handler registered for its task type, and delivers the result by
//! resolving the task id through the wait/notify engine. Anything that goes
//! wrong after acceptance is reported as `ResponseData::Error`, never as a
//! `queue_task` failure.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use ordo_core::task::{TaskExecutor, TaskExecutorError};
use ordo_core::wait_notify::WaitNotifyEngine;
use ordo_types::ambiance::Ambiance;
use ordo_types::config::LocalExecutorConfig;
use ordo_types::execution::TaskMode;
use ordo_types::response::{ErrorKind, ResponseData};
use ordo_types::task::{QueuedTask, TaskRequest};
use uuid::Uuid;

/// Message delivered when no handler or capability matches a task.
pub const NO_CAPABLE_WORKER: &str = "no capable worker available";

/// Runs one task type.
pub trait TaskHandler: Send + Sync {
    fn run<'a>(
        &'a self,
        request: &'a TaskRequest,
        ambiance: &'a Ambiance,
    ) -> BoxFuture<'a, Result<serde_json::Value, String>>;
}

/// Adapts a plain function into a [`TaskHandler`].
pub struct FnHandler<F>(pub F);

impl<F> TaskHandler for FnHandler<F>
where
    F: Fn(&TaskRequest) -> Result<serde_json::Value, String> + Send + Sync,
{
    fn run<'a>(
        &'a self,
        request: &'a TaskRequest,
        _ambiance: &'a Ambiance,
    ) -> BoxFuture<'a, Result<serde_json::Value, String>> {
        let result = (self.0)(request);
        Box::pin(async move { result })
    }
}

/// Executor that runs tasks in the current process.
pub struct LocalTaskExecutor {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    capabilities: HashSet<String>,
    max_timeout: Option<Duration>,
    wait_notify: Arc<WaitNotifyEngine>,
}

impl LocalTaskExecutor {
    pub fn new(wait_notify: Arc<WaitNotifyEngine>) -> Self {
        Self {
            handlers: HashMap::new(),
            capabilities: HashSet::new(),
            max_timeout: None,
            wait_notify,
        }
    }

    /// Build an executor advertising the configured capabilities.
    pub fn from_config(config: &LocalExecutorConfig, wait_notify: Arc<WaitNotifyEngine>) -> Self {
        let mut executor = Self::new(wait_notify);
        executor.capabilities = config.capabilities.iter().cloned().collect();
        executor.max_timeout = config.max_timeout_secs.map(Duration::from_secs);
        executor
    }

    pub fn with_handler(mut self, task_type: impl Into<String>, handler: impl TaskHandler + 'static) -> Self {
        self.handlers.insert(task_type.into(), Arc::new(handler));
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    /// Task types this executor can run.
    pub fn task_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    fn timeout_for(&self, request: &TaskRequest) -> Duration {
        let requested = Duration::from_secs(request.timeout_secs);
        match self.max_timeout {
            Some(max) => requested.min(max),
            None => requested,
        }
    }

    fn handler_for(&self, request: &TaskRequest) -> Option<Arc<dyn TaskHandler>> {
        let capable = request
            .capabilities
            .iter()
            .all(|c| self.capabilities.contains(c));
        if !capable {
            return None;
        }
        self.handlers.get(&request.task_type).cloned()
    }
}

impl TaskExecutor for LocalTaskExecutor {
    fn name(&self) -> &str {
        "local"
    }

    async fn queue_task(
        &self,
        request: TaskRequest,
        ambiance: &Ambiance,
    ) -> Result<QueuedTask, TaskExecutorError> {
        let task_id = Uuid::now_v7().to_string();
        let handler = self.handler_for(&request);
        let timeout = self.timeout_for(&request);
        let wait_notify = Arc::clone(&self.wait_notify);
        let ambiance = ambiance.clone();
        let id = task_id.clone();

        tracing::debug!(
            task_id = %task_id,
            task_type = %request.task_type,
            timeout_secs = timeout.as_secs(),
            "queued local task"
        );

        tokio::spawn(async move {
            let payload = match handler {
                None => ResponseData::Error {
                    message: NO_CAPABLE_WORKER.to_string(),
                    kind: ErrorKind::NoCapableWorker,
                },
                Some(handler) => {
                    match tokio::time::timeout(timeout, handler.run(&request, &ambiance)).await {
                        Ok(Ok(data)) => ResponseData::Task {
                            task_id: id.clone(),
                            data,
                        },
                        Ok(Err(message)) => ResponseData::Error {
                            message,
                            kind: ErrorKind::WorkerFailure,
                        },
                        Err(_) => ResponseData::Error {
                            message: format!("task timed out after {}s", timeout.as_secs()),
                            kind: ErrorKind::Timeout,
                        },
                    }
                }
            };

            if payload.is_error() {
                tracing::warn!(task_id = %id, task_type = %request.task_type, ?payload, "local task failed");
            }
            if let Err(e) = wait_notify.resolve(&id, payload).await {
                tracing::error!(task_id = %id, error = %e, "failed to deliver task result");
            }
        });

        Ok(QueuedTask {
            task_id,
            mode: TaskMode::Local,
        })
    }
}
