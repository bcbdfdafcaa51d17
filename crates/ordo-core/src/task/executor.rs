//! Task executor trait definition.

use ordo_types::ambiance::Ambiance;
use ordo_types::task::{QueuedTask, TaskRequest};

#[derive(Debug, thiserror::Error)]
pub enum TaskExecutorError {
    #[error("no task executor configured")]
    NotConfigured,

    #[error("task rejected: {0}")]
    Rejected(String),

    #[error("task queue unavailable: {0}")]
    Unavailable(String),
}

/// Accepts delegated tasks on behalf of a node execution.
///
/// Accepting a task only means it was queued. Failures that happen after
/// acceptance, including "no capable worker", are reported through the
/// normal result path as `ResponseData::Error`.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait TaskExecutor: Send + Sync {
    /// Human-readable executor name.
    fn name(&self) -> &str;

    /// Queue `request` for the node described by `ambiance`.
    fn queue_task(
        &self,
        request: TaskRequest,
        ambiance: &Ambiance,
    ) -> impl std::future::Future<Output = Result<QueuedTask, TaskExecutorError>> + Send;
}
