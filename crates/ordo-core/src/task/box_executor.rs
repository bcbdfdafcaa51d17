//! BoxTaskExecutor -- object-safe dynamic dispatch wrapper for TaskExecutor.
//!
//! 1. `TaskExecutorDyn` is an object-safe mirror with boxed futures
//! 2. A blanket impl covers every `T: TaskExecutor`
//! 3. `BoxTaskExecutor` wraps `Box<dyn TaskExecutorDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use ordo_types::ambiance::Ambiance;
use ordo_types::task::{QueuedTask, TaskRequest};

use super::executor::{TaskExecutor, TaskExecutorError};

/// Object-safe version of [`TaskExecutor`].
pub trait TaskExecutorDyn: Send + Sync {
    fn name(&self) -> &str;

    fn queue_task_boxed<'a>(
        &'a self,
        request: TaskRequest,
        ambiance: &'a Ambiance,
    ) -> Pin<Box<dyn Future<Output = Result<QueuedTask, TaskExecutorError>> + Send + 'a>>;
}

impl<T: TaskExecutor> TaskExecutorDyn for T {
    fn name(&self) -> &str {
        TaskExecutor::name(self)
    }

    fn queue_task_boxed<'a>(
        &'a self,
        request: TaskRequest,
        ambiance: &'a Ambiance,
    ) -> Pin<Box<dyn Future<Output = Result<QueuedTask, TaskExecutorError>> + Send + 'a>> {
        Box::pin(self.queue_task(request, ambiance))
    }
}

/// Type-erased task executor, so the engine is not generic over it.
pub struct BoxTaskExecutor {
    inner: Box<dyn TaskExecutorDyn + Send + Sync>,
}

impl BoxTaskExecutor {
    pub fn new<T: TaskExecutor + 'static>(executor: T) -> Self {
        Self {
            inner: Box::new(executor),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn queue_task(
        &self,
        request: TaskRequest,
        ambiance: &Ambiance,
    ) -> Result<QueuedTask, TaskExecutorError> {
        self.inner.queue_task_boxed(request, ambiance).await
    }
}

impl std::fmt::Debug for BoxTaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxTaskExecutor")
            .field("name", &self.name())
            .finish()
    }
}
