//! Broadcast event bus for distributing `EngineEvent` to multiple subscribers.
//!
//! Built on `tokio::sync::broadcast`. Publishing with no active subscribers is
//! a no-op.

use std::time::Duration;

use ordo_types::event::EngineEvent;
use ordo_types::execution::Status;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Multi-consumer bus for node and plan execution events.
///
/// Cloning the bus clones the sender, allowing multiple producers and
/// consumers.
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create a new subscriber that will receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

/// Wait until `plan_execution_id` finishes, returning its terminal status.
///
/// Returns `None` on timeout or when the bus closes. Lagged receivers keep
/// waiting.
pub async fn wait_for_plan(
    events: &mut broadcast::Receiver<EngineEvent>,
    plan_execution_id: Uuid,
    timeout: Duration,
) -> Option<Status> {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(EngineEvent::PlanExecutionFinished {
                    plan_execution_id: id,
                    status,
                }) if id == plan_execution_id => return Some(status),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    };
    tokio::time::timeout(timeout, wait).await.ok().flatten()
}
