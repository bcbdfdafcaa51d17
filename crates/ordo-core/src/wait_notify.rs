//! Wait/notify engine: correlates callback ids with the node executions
//! suspended on them.
//!
//! A registration names a set of correlation ids (task ids, child node
//! execution ids, async callback ids). Responses resolved for those ids are
//! collected; once every id of a registration has a response, the
//! registration fires exactly once by sending `EngineMessage::Resume` into
//! the engine's queue. Responses that arrive before their registration are
//! retained. A correlation id belongs to a single registration.
//!
//! Delivered and cancelled ids are remembered so late duplicates are
//! dropped. That memory is bounded: only the most recent `retention` ids
//! are kept, older ones fall back on the repository's conditional resume.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ordo_types::response::{ResponseData, ResponseMap};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::engine::EngineMessage;

/// Delivered or cancelled correlation ids remembered for duplicate detection.
pub const DEFAULT_CONSUMED_RETENTION: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum WaitNotifyError {
    #[error("registration {0} has no correlation ids")]
    EmptyCorrelation(String),

    #[error("callback {0} is already registered")]
    DuplicateCallback(String),

    #[error("engine queue closed")]
    QueueClosed,
}

#[derive(Debug, Clone)]
struct Registration {
    node_execution_id: Uuid,
    correlation_ids: Vec<String>,
}

/// State of one correlation id.
#[derive(Debug)]
enum Slot {
    /// Resolved, waiting for its registration to fire.
    Pending(ResponseData),
    /// Delivered or cancelled; later resolves are duplicates.
    Consumed,
}

/// In-process wait/notify engine.
#[derive(Debug)]
pub struct WaitNotifyEngine {
    sender: mpsc::Sender<EngineMessage>,
    /// callback id -> registration
    registrations: DashMap<String, Registration>,
    /// correlation id -> callback ids waiting on it
    waiting: DashMap<String, Vec<String>>,
    /// correlation id -> pending response or consumed marker
    slots: DashMap<String, Slot>,
    /// consumed correlation ids, oldest first
    consumed: Mutex<VecDeque<String>>,
    retention: usize,
}

impl WaitNotifyEngine {
    /// Create the engine together with the bounded queue its resumes go to.
    pub fn channel(capacity: usize) -> (Arc<Self>, mpsc::Receiver<EngineMessage>) {
        Self::channel_with_retention(capacity, DEFAULT_CONSUMED_RETENTION)
    }

    /// Like `channel`, remembering at most `retention` consumed ids.
    pub fn channel_with_retention(
        capacity: usize,
        retention: usize,
    ) -> (Arc<Self>, mpsc::Receiver<EngineMessage>) {
        let (sender, receiver) = mpsc::channel(capacity);
        let engine = Self {
            sender,
            registrations: DashMap::new(),
            waiting: DashMap::new(),
            slots: DashMap::new(),
            consumed: Mutex::new(VecDeque::new()),
            retention,
        };
        (Arc::new(engine), receiver)
    }

    /// Sender side of the engine queue.
    pub fn sender(&self) -> &mpsc::Sender<EngineMessage> {
        &self.sender
    }

    /// Register `callback_id` for `node_execution_id`, firing once every
    /// correlation id has been resolved.
    pub async fn register_callback(
        &self,
        correlation_ids: Vec<String>,
        node_execution_id: Uuid,
        callback_id: String,
    ) -> Result<(), WaitNotifyError> {
        if correlation_ids.is_empty() {
            return Err(WaitNotifyError::EmptyCorrelation(callback_id));
        }

        match self.registrations.entry(callback_id.clone()) {
            Entry::Occupied(_) => return Err(WaitNotifyError::DuplicateCallback(callback_id)),
            Entry::Vacant(slot) => {
                slot.insert(Registration {
                    node_execution_id,
                    correlation_ids: correlation_ids.clone(),
                });
            }
        }
        for correlation_id in &correlation_ids {
            self.waiting
                .entry(correlation_id.clone())
                .or_default()
                .push(callback_id.clone());
        }

        tracing::debug!(
            node_execution_id = %node_execution_id,
            callback_id = %callback_id,
            correlations = correlation_ids.len(),
            "registered callback"
        );

        // Responses may already be here.
        self.try_fire(&callback_id).await?;
        Ok(())
    }

    /// Deliver `payload` for `correlation_id`.
    ///
    /// Returns `false` when the id was already resolved; the duplicate is
    /// dropped.
    pub async fn resolve(
        &self,
        correlation_id: &str,
        payload: ResponseData,
    ) -> Result<bool, WaitNotifyError> {
        match self.slots.entry(correlation_id.to_string()) {
            Entry::Occupied(_) => {
                tracing::debug!(correlation_id, "ignoring duplicate notify");
                return Ok(false);
            }
            Entry::Vacant(slot) => {
                slot.insert(Slot::Pending(payload));
            }
        }

        let callbacks = self
            .waiting
            .get(correlation_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        for callback_id in callbacks {
            self.try_fire(&callback_id).await?;
        }
        Ok(true)
    }

    /// Drop every registration held for `node_execution_id`, together with
    /// the responses already collected for it.
    pub fn cancel_for(&self, node_execution_id: Uuid) -> usize {
        let callback_ids: Vec<String> = self
            .registrations
            .iter()
            .filter(|entry| entry.value().node_execution_id == node_execution_id)
            .map(|entry| entry.key().clone())
            .collect();
        let mut removed = 0;
        for callback_id in callback_ids {
            if let Some((_, registration)) = self.registrations.remove(&callback_id) {
                self.unindex(&callback_id, &registration);
                for correlation_id in &registration.correlation_ids {
                    self.consume(correlation_id);
                }
                removed += 1;
            }
        }
        removed
    }

    /// Registrations that have not fired yet.
    pub fn pending_registrations(&self) -> usize {
        self.registrations.len()
    }

    /// Correlation ids currently tracked, pending or consumed.
    pub fn tracked_correlations(&self) -> usize {
        self.slots.len()
    }

    async fn try_fire(&self, callback_id: &str) -> Result<bool, WaitNotifyError> {
        let Some((_, registration)) = self.registrations.remove_if(callback_id, |_, reg| {
            reg.correlation_ids.iter().all(|id| {
                self.slots
                    .get(id)
                    .is_some_and(|slot| matches!(*slot, Slot::Pending(_)))
            })
        }) else {
            return Ok(false);
        };

        let mut responses = ResponseMap::new();
        for correlation_id in &registration.correlation_ids {
            if let Some(data) = self.consume(correlation_id) {
                responses.insert(correlation_id.clone(), data);
            }
        }
        self.unindex(callback_id, &registration);

        tracing::debug!(
            node_execution_id = %registration.node_execution_id,
            callback_id,
            "callback fired"
        );

        self.sender
            .send(EngineMessage::Resume {
                node_execution_id: registration.node_execution_id,
                callback_id: callback_id.to_string(),
                responses,
            })
            .await
            .map_err(|_| WaitNotifyError::QueueClosed)?;
        Ok(true)
    }

    /// Mark `correlation_id` consumed, returning its pending payload.
    fn consume(&self, correlation_id: &str) -> Option<ResponseData> {
        let previous = self
            .slots
            .insert(correlation_id.to_string(), Slot::Consumed);

        let evicted: Vec<String> = {
            let mut order = self
                .consumed
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            order.push_back(correlation_id.to_string());
            let excess = order.len().saturating_sub(self.retention);
            order.drain(..excess).collect()
        };
        for id in evicted {
            self.slots
                .remove_if(&id, |_, slot| matches!(slot, Slot::Consumed));
        }

        match previous {
            Some(Slot::Pending(data)) => Some(data),
            _ => None,
        }
    }

    fn unindex(&self, callback_id: &str, registration: &Registration) {
        for correlation_id in &registration.correlation_ids {
            if let Entry::Occupied(mut entry) = self.waiting.entry(correlation_id.clone()) {
                entry.get_mut().retain(|id| id != callback_id);
                if entry.get().is_empty() {
                    entry.remove();
                }
            }
        }
    }
}
