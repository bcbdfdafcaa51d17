//! In-memory `NodeExecutionRepository`.
//!
//! Each conditional write runs under the DashMap shard lock of the record it
//! touches, which gives the same single-winner guarantee as the SQLite
//! `UPDATE ... WHERE status IN (...)` statements.

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ordo_types::error::RepositoryError;
use ordo_types::execution::{ExecutableResponse, NodeExecution, Status};
use ordo_types::plan::Plan;
use ordo_types::response::StepResponse;
use uuid::Uuid;

use super::node_execution::NodeExecutionRepository;

/// DashMap-backed repository for tests and single-process runs.
#[derive(Debug, Default)]
pub struct InMemoryNodeExecutionRepository {
    nodes: DashMap<Uuid, NodeExecution>,
    plans: DashMap<Uuid, Plan>,
}

impl InMemoryNodeExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored node executions.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn collect_sorted<F>(&self, filter: F) -> Vec<NodeExecution>
    where
        F: Fn(&NodeExecution) -> bool,
    {
        let mut out: Vec<NodeExecution> = self
            .nodes
            .iter()
            .filter(|entry| filter(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        out
    }
}

impl NodeExecutionRepository for InMemoryNodeExecutionRepository {
    async fn create(&self, node: &NodeExecution) -> Result<(), RepositoryError> {
        match self.nodes.entry(node.id) {
            Entry::Occupied(_) => Err(RepositoryError::Conflict(format!(
                "node execution {} already exists",
                node.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(node.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<NodeExecution>, RepositoryError> {
        Ok(self.nodes.get(&id).map(|n| n.clone()))
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: &[Status],
        status: Status,
    ) -> Result<Option<NodeExecution>, RepositoryError> {
        let mut node = self.nodes.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        if !expected.contains(&node.status) {
            return Ok(None);
        }
        node.status = status;
        node.last_updated_at = Utc::now();
        Ok(Some(node.clone()))
    }

    async fn append_response(
        &self,
        id: Uuid,
        response: &ExecutableResponse,
    ) -> Result<(), RepositoryError> {
        let mut node = self.nodes.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        node.executable_responses.push(response.clone());
        node.last_updated_at = Utc::now();
        Ok(())
    }

    async fn mark_waiting(
        &self,
        id: Uuid,
        callback_id: &str,
        waiting_status: Option<Status>,
    ) -> Result<bool, RepositoryError> {
        let mut node = self.nodes.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        if node.status != Status::Running {
            return Ok(false);
        }
        node.pending_callback = Some(callback_id.to_string());
        if let Some(status) = waiting_status {
            node.status = status;
        }
        node.last_updated_at = Utc::now();
        Ok(true)
    }

    async fn claim_resume(
        &self,
        id: Uuid,
        callback_id: &str,
    ) -> Result<Option<NodeExecution>, RepositoryError> {
        let mut node = self.nodes.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        let resumable = node.status == Status::Running || node.status.is_waiting();
        if !resumable || node.pending_callback.as_deref() != Some(callback_id) {
            return Ok(None);
        }
        let before = node.clone();
        node.status = Status::Running;
        node.pending_callback = None;
        node.last_updated_at = Utc::now();
        Ok(Some(before))
    }

    async fn complete(
        &self,
        id: Uuid,
        expected: &[Status],
        response: &StepResponse,
    ) -> Result<Option<NodeExecution>, RepositoryError> {
        let mut node = self.nodes.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        if !expected.contains(&node.status) {
            return Ok(None);
        }
        node.status = response.status;
        node.outcome = response.outcome.clone();
        node.failure = response.failure.clone();
        node.pending_callback = None;
        node.last_updated_at = Utc::now();
        Ok(Some(node.clone()))
    }

    async fn list_children(&self, parent_id: Uuid) -> Result<Vec<NodeExecution>, RepositoryError> {
        Ok(self.collect_sorted(|n| n.parent_id == Some(parent_id)))
    }

    async fn list_by_plan_execution(
        &self,
        plan_execution_id: Uuid,
    ) -> Result<Vec<NodeExecution>, RepositoryError> {
        Ok(self.collect_sorted(|n| n.ambiance.plan_execution_id() == plan_execution_id))
    }

    async fn save_plan(&self, plan_execution_id: Uuid, plan: &Plan) -> Result<(), RepositoryError> {
        self.plans.insert(plan_execution_id, plan.clone());
        Ok(())
    }

    async fn get_plan(&self, plan_execution_id: Uuid) -> Result<Option<Plan>, RepositoryError> {
        Ok(self.plans.get(&plan_execution_id).map(|p| p.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use ordo_types::ambiance::{Ambiance, Level};
    use ordo_types::plan::{ExecutionMode, PlanNode};
    use ordo_types::response::{FailureInfo, FailureType};

    use super::*;

    fn sample_node(plan_execution_id: Uuid, parent_id: Option<Uuid>) -> NodeExecution {
        let id = Uuid::now_v7();
        let plan_node = PlanNode::new("a", "a", "SHELL", ExecutionMode::Task);
        let ambiance = Ambiance::new(plan_execution_id, Uuid::now_v7(), BTreeMap::new())
            .clone_for_child(Level::for_node(&plan_node, id));
        NodeExecution::queued(id, "a", ambiance, parent_id)
    }

    #[tokio::test]
    async fn create_rejects_duplicate_ids() {
        let repo = InMemoryNodeExecutionRepository::new();
        let node = sample_node(Uuid::now_v7(), None);
        repo.create(&node).await.unwrap();
        let err = repo.create(&node).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn update_status_is_conditional() {
        let repo = InMemoryNodeExecutionRepository::new();
        let node = sample_node(Uuid::now_v7(), None);
        repo.create(&node).await.unwrap();

        let updated = repo
            .update_status(node.id, &[Status::Queued], Status::Running)
            .await
            .unwrap();
        assert_eq!(updated.unwrap().status, Status::Running);

        let again = repo
            .update_status(node.id, &[Status::Queued], Status::Running)
            .await
            .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn update_status_missing_node_is_not_found() {
        let repo = InMemoryNodeExecutionRepository::new();
        let err = repo
            .update_status(Uuid::now_v7(), &[Status::Queued], Status::Running)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn duplicate_resume_claims_exactly_once() {
        let repo = Arc::new(InMemoryNodeExecutionRepository::new());
        let node = sample_node(Uuid::now_v7(), None);
        repo.create(&node).await.unwrap();
        repo.update_status(node.id, &[Status::Queued], Status::Running)
            .await
            .unwrap();
        assert!(repo
            .mark_waiting(node.id, "cb-1", Some(Status::TaskWaiting))
            .await
            .unwrap());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = Arc::clone(&repo);
            let id = node.id;
            handles.push(tokio::spawn(async move {
                repo.claim_resume(id, "cb-1").await.unwrap()
            }));
        }

        let mut claimed = 0;
        for handle in handles {
            if let Some(before) = handle.await.unwrap() {
                assert_eq!(before.status, Status::TaskWaiting);
                claimed += 1;
            }
        }
        assert_eq!(claimed, 1);

        let stored = repo.get(node.id).await.unwrap().unwrap();
        assert_eq!(stored.status, Status::Running);
        assert!(stored.pending_callback.is_none());
    }

    #[tokio::test]
    async fn claim_resume_requires_matching_callback() {
        let repo = InMemoryNodeExecutionRepository::new();
        let node = sample_node(Uuid::now_v7(), None);
        repo.create(&node).await.unwrap();
        repo.update_status(node.id, &[Status::Queued], Status::Running)
            .await
            .unwrap();
        repo.mark_waiting(node.id, "current", None).await.unwrap();

        assert!(repo.claim_resume(node.id, "stale").await.unwrap().is_none());
        assert!(repo.claim_resume(node.id, "current").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn mark_waiting_requires_running() {
        let repo = InMemoryNodeExecutionRepository::new();
        let node = sample_node(Uuid::now_v7(), None);
        repo.create(&node).await.unwrap();
        assert!(!repo.mark_waiting(node.id, "cb", None).await.unwrap());
    }

    #[tokio::test]
    async fn complete_records_outcome_and_failure() {
        let repo = InMemoryNodeExecutionRepository::new();
        let node = sample_node(Uuid::now_v7(), None);
        repo.create(&node).await.unwrap();
        repo.update_status(node.id, &[Status::Queued], Status::Running)
            .await
            .unwrap();

        let response = StepResponse::failed(FailureInfo::new("boom", FailureType::Application));
        let done = repo
            .complete(node.id, &[Status::Running], &response)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.status, Status::Failed);
        assert_eq!(done.failure.unwrap().message, "boom");

        let late = repo
            .complete(node.id, &[Status::Running], &StepResponse::succeeded())
            .await
            .unwrap();
        assert!(late.is_none());
    }

    #[tokio::test]
    async fn append_response_and_list_queries() {
        let repo = InMemoryNodeExecutionRepository::new();
        let plan_execution_id = Uuid::now_v7();
        let parent = sample_node(plan_execution_id, None);
        let child = sample_node(plan_execution_id, Some(parent.id));
        let other = sample_node(Uuid::now_v7(), None);
        for n in [&parent, &child, &other] {
            repo.create(n).await.unwrap();
        }

        repo.append_response(parent.id, &ExecutableResponse::Sync {})
            .await
            .unwrap();
        let stored = repo.get(parent.id).await.unwrap().unwrap();
        assert_eq!(stored.executable_responses.len(), 1);

        let children = repo.list_children(parent.id).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, child.id);

        let all = repo.list_by_plan_execution(plan_execution_id).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, parent.id);
    }
}
