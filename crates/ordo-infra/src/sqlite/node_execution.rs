//! SQLite node execution repository implementation.
//!
//! Implements `NodeExecutionRepository` from `ordo-core` using sqlx with split
//! read/write pools. Ambiances, executable responses, outcomes and failures are
//! stored as JSON text. Status changes are `UPDATE ... WHERE status IN (...)`
//! statements, so a losing writer sees zero affected rows instead of
//! overwriting the winner.

use chrono::{DateTime, SecondsFormat, Utc};
use ordo_core::repository::NodeExecutionRepository;
use ordo_types::error::RepositoryError;
use ordo_types::execution::{ExecutableResponse, NodeExecution, Status};
use ordo_types::plan::Plan;
use ordo_types::response::StepResponse;
use sqlx::Row;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::query::Query;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `NodeExecutionRepository`.
pub struct SqliteNodeExecutionRepository {
    pool: DatabasePool,
}

impl SqliteNodeExecutionRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    async fn exists(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let row = sqlx::query("SELECT 1 FROM node_executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(row.is_some())
    }

    /// Resolve a conditional update that matched no row: the record either
    /// does not exist or its status was not in the expected set.
    async fn unmatched(&self, id: Uuid) -> Result<Option<NodeExecution>, RepositoryError> {
        if self.exists(id).await? {
            Ok(None)
        } else {
            Err(RepositoryError::NotFound)
        }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct NodeExecutionRow {
    id: String,
    plan_node_id: String,
    parent_id: Option<String>,
    status: String,
    ambiance: String,
    executable_responses: String,
    pending_callback: Option<String>,
    outcome: Option<String>,
    failure: Option<String>,
    created_at: String,
    last_updated_at: String,
}

impl NodeExecutionRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            plan_node_id: row.try_get("plan_node_id")?,
            parent_id: row.try_get("parent_id")?,
            status: row.try_get("status")?,
            ambiance: row.try_get("ambiance")?,
            executable_responses: row.try_get("executable_responses")?,
            pending_callback: row.try_get("pending_callback")?,
            outcome: row.try_get("outcome")?,
            failure: row.try_get("failure")?,
            created_at: row.try_get("created_at")?,
            last_updated_at: row.try_get("last_updated_at")?,
        })
    }

    fn into_node_execution(self) -> Result<NodeExecution, RepositoryError> {
        let status: Status = self.status.parse().map_err(RepositoryError::Query)?;

        let ambiance = serde_json::from_str(&self.ambiance)
            .map_err(|e| RepositoryError::Query(format!("invalid ambiance JSON: {e}")))?;
        let executable_responses = serde_json::from_str(&self.executable_responses)
            .map_err(|e| RepositoryError::Query(format!("invalid executable_responses JSON: {e}")))?;

        let outcome = self
            .outcome
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid outcome JSON: {e}")))
            })
            .transpose()?;
        let failure = self
            .failure
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid failure JSON: {e}")))
            })
            .transpose()?;

        Ok(NodeExecution {
            id: parse_uuid(&self.id)?,
            plan_node_id: self.plan_node_id,
            ambiance,
            parent_id: self.parent_id.as_deref().map(parse_uuid).transpose()?,
            status,
            executable_responses,
            pending_callback: self.pending_callback,
            outcome,
            failure,
            created_at: parse_datetime(&self.created_at)?,
            last_updated_at: parse_datetime(&self.last_updated_at)?,
        })
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    Uuid::parse_str(s).map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-width UTC timestamps so `ORDER BY created_at` sorts chronologically.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(e.to_string()))
}

fn row_to_node(row: &SqliteRow) -> Result<NodeExecution, RepositoryError> {
    NodeExecutionRow::from_row(row)
        .map_err(|e| RepositoryError::Query(e.to_string()))?
        .into_node_execution()
}

fn rows_to_nodes(rows: &[SqliteRow]) -> Result<Vec<NodeExecution>, RepositoryError> {
    rows.iter().map(row_to_node).collect()
}

/// `?, ?, ?` for an `IN (...)` clause over `n` values.
fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn bind_statuses<'q>(
    mut query: Query<'q, sqlx::Sqlite, SqliteArguments<'q>>,
    statuses: &[Status],
) -> Query<'q, sqlx::Sqlite, SqliteArguments<'q>> {
    for status in statuses {
        query = query.bind(status.as_str());
    }
    query
}

// ---------------------------------------------------------------------------
// NodeExecutionRepository implementation
// ---------------------------------------------------------------------------

impl NodeExecutionRepository for SqliteNodeExecutionRepository {
    async fn create(&self, node: &NodeExecution) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO node_executions (id, plan_execution_id, plan_node_id, parent_id, status, ambiance, executable_responses, pending_callback, outcome, failure, created_at, last_updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(node.id.to_string())
        .bind(node.ambiance.plan_execution_id().to_string())
        .bind(&node.plan_node_id)
        .bind(node.parent_id.map(|p| p.to_string()))
        .bind(node.status.as_str())
        .bind(to_json(&node.ambiance)?)
        .bind(to_json(&node.executable_responses)?)
        .bind(&node.pending_callback)
        .bind(node.outcome.as_ref().map(to_json).transpose()?)
        .bind(node.failure.as_ref().map(to_json).transpose()?)
        .bind(format_datetime(&node.created_at))
        .bind(format_datetime(&node.last_updated_at))
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(
                RepositoryError::Conflict(format!("node execution {} already exists", node.id)),
            ),
            Err(e) => Err(RepositoryError::Query(e.to_string())),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<NodeExecution>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM node_executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.as_ref().map(row_to_node).transpose()
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: &[Status],
        status: Status,
    ) -> Result<Option<NodeExecution>, RepositoryError> {
        if expected.is_empty() {
            return self.unmatched(id).await;
        }

        let sql = format!(
            "UPDATE node_executions SET status = ?, last_updated_at = ?
             WHERE id = ? AND status IN ({}) RETURNING *",
            placeholders(expected.len())
        );
        let query = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(format_datetime(&Utc::now()))
            .bind(id.to_string());
        let row = bind_statuses(query, expected)
            .fetch_optional(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => row_to_node(&row).map(Some),
            None => self.unmatched(id).await,
        }
    }

    async fn append_response(
        &self,
        id: Uuid,
        response: &ExecutableResponse,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE node_executions
             SET executable_responses = json_insert(executable_responses, '$[#]', json(?)),
                 last_updated_at = ?
             WHERE id = ?",
        )
        .bind(to_json(response)?)
        .bind(format_datetime(&Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn mark_waiting(
        &self,
        id: Uuid,
        callback_id: &str,
        waiting_status: Option<Status>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE node_executions
             SET pending_callback = ?, status = COALESCE(?, status), last_updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(callback_id)
        .bind(waiting_status.map(|s| s.as_str()))
        .bind(format_datetime(&Utc::now()))
        .bind(id.to_string())
        .bind(Status::Running.as_str())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            if !self.exists(id).await? {
                return Err(RepositoryError::NotFound);
            }
            return Ok(false);
        }
        Ok(true)
    }

    async fn claim_resume(
        &self,
        id: Uuid,
        callback_id: &str,
    ) -> Result<Option<NodeExecution>, RepositoryError> {
        // The writer pool holds one connection, so the read and the
        // conditional update below cannot interleave with another claim.
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let row = sqlx::query("SELECT * FROM node_executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let before = match row {
            Some(row) => row_to_node(&row)?,
            None => return Err(RepositoryError::NotFound),
        };

        let resumable = before.status == Status::Running || before.status.is_waiting();
        if !resumable || before.pending_callback.as_deref() != Some(callback_id) {
            return Ok(None);
        }

        let mut claimable = vec![Status::Running];
        claimable.extend(Status::WAITING);
        let sql = format!(
            "UPDATE node_executions SET status = ?, pending_callback = NULL, last_updated_at = ?
             WHERE id = ? AND pending_callback = ? AND status IN ({})",
            placeholders(claimable.len())
        );
        let query = sqlx::query(&sql)
            .bind(Status::Running.as_str())
            .bind(format_datetime(&Utc::now()))
            .bind(id.to_string())
            .bind(callback_id);
        let result = bind_statuses(query, &claimable)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(before))
    }

    async fn complete(
        &self,
        id: Uuid,
        expected: &[Status],
        response: &StepResponse,
    ) -> Result<Option<NodeExecution>, RepositoryError> {
        if expected.is_empty() {
            return self.unmatched(id).await;
        }

        let sql = format!(
            "UPDATE node_executions
             SET status = ?, outcome = ?, failure = ?, pending_callback = NULL, last_updated_at = ?
             WHERE id = ? AND status IN ({}) RETURNING *",
            placeholders(expected.len())
        );
        let query = sqlx::query(&sql)
            .bind(response.status.as_str())
            .bind(response.outcome.as_ref().map(to_json).transpose()?)
            .bind(response.failure.as_ref().map(to_json).transpose()?)
            .bind(format_datetime(&Utc::now()))
            .bind(id.to_string());
        let row = bind_statuses(query, expected)
            .fetch_optional(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => row_to_node(&row).map(Some),
            None => self.unmatched(id).await,
        }
    }

    async fn list_children(&self, parent_id: Uuid) -> Result<Vec<NodeExecution>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM node_executions WHERE parent_id = ? ORDER BY created_at, id",
        )
        .bind(parent_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows_to_nodes(&rows)
    }

    async fn list_by_plan_execution(
        &self,
        plan_execution_id: Uuid,
    ) -> Result<Vec<NodeExecution>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM node_executions WHERE plan_execution_id = ? ORDER BY created_at, id",
        )
        .bind(plan_execution_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows_to_nodes(&rows)
    }

    async fn save_plan(&self, plan_execution_id: Uuid, plan: &Plan) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO plan_executions (plan_execution_id, plan_id, plan, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(plan_execution_id) DO UPDATE SET plan_id = excluded.plan_id, plan = excluded.plan",
        )
        .bind(plan_execution_id.to_string())
        .bind(plan.id.to_string())
        .bind(to_json(plan)?)
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn get_plan(&self, plan_execution_id: Uuid) -> Result<Option<Plan>, RepositoryError> {
        let row = sqlx::query("SELECT plan FROM plan_executions WHERE plan_execution_id = ?")
            .bind(plan_execution_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let json: String = row
                    .try_get("plan")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                serde_json::from_str(&json)
                    .map(Some)
                    .map_err(|e| RepositoryError::Query(format!("invalid plan JSON: {e}")))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use ordo_types::ambiance::{Ambiance, Level};
    use ordo_types::execution::{PassThroughData, TaskMode};
    use ordo_types::plan::{ExecutionMode, PlanNode};
    use ordo_types::response::{FailureInfo, FailureType};

    use super::*;

    async fn test_pool() -> (DatabasePool, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
        let pool = DatabasePool::new(&url).await.unwrap();
        (pool, dir)
    }

    fn sample_node(plan_execution_id: Uuid, parent_id: Option<Uuid>) -> NodeExecution {
        let id = Uuid::now_v7();
        let plan_node = PlanNode::new("build", "build", "SHELL", ExecutionMode::Task);
        let ambiance = Ambiance::new(plan_execution_id, Uuid::now_v7(), BTreeMap::new())
            .clone_for_child(Level::for_node(&plan_node, id));
        NodeExecution::queued(id, "build", ambiance, parent_id)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteNodeExecutionRepository::new(pool);

        let node = sample_node(Uuid::now_v7(), None);
        repo.create(&node).await.unwrap();

        let fetched = repo.get(node.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, node.id);
        assert_eq!(fetched.status, Status::Queued);
        assert_eq!(fetched.ambiance, node.ambiance);
        assert_eq!(fetched.identifier(), "build");
        assert!(fetched.executable_responses.is_empty());

        assert!(repo.get(Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_duplicate_is_conflict() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteNodeExecutionRepository::new(pool);

        let node = sample_node(Uuid::now_v7(), None);
        repo.create(&node).await.unwrap();
        let err = repo.create(&node).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_status_is_conditional() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteNodeExecutionRepository::new(pool);

        let node = sample_node(Uuid::now_v7(), None);
        repo.create(&node).await.unwrap();

        let running = repo
            .update_status(node.id, &[Status::Queued], Status::Running)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(running.status, Status::Running);

        let again = repo
            .update_status(node.id, &[Status::Queued], Status::Running)
            .await
            .unwrap();
        assert!(again.is_none());

        let err = repo
            .update_status(Uuid::now_v7(), &[Status::Queued], Status::Running)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_append_response_preserves_order() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteNodeExecutionRepository::new(pool);

        let node = sample_node(Uuid::now_v7(), None);
        repo.create(&node).await.unwrap();

        let first = ExecutableResponse::TaskChain {
            task_id: Some("t-1".to_string()),
            mode: TaskMode::Local,
            chain_end: false,
            pass_through_data: PassThroughData::new(vec![1, 2, 3]),
        };
        let second = ExecutableResponse::TaskChain {
            task_id: Some("t-2".to_string()),
            mode: TaskMode::Local,
            chain_end: true,
            pass_through_data: PassThroughData::new(vec![4]),
        };
        repo.append_response(node.id, &first).await.unwrap();
        repo.append_response(node.id, &second).await.unwrap();

        let stored = repo.get(node.id).await.unwrap().unwrap();
        assert_eq!(stored.executable_responses, vec![first, second.clone()]);
        assert_eq!(stored.latest_response(), Some(&second));

        let err = repo
            .append_response(Uuid::now_v7(), &ExecutableResponse::Sync {})
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_mark_waiting_and_claim_resume() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteNodeExecutionRepository::new(pool);

        let node = sample_node(Uuid::now_v7(), None);
        repo.create(&node).await.unwrap();
        assert!(!repo.mark_waiting(node.id, "cb", None).await.unwrap());

        repo.update_status(node.id, &[Status::Queued], Status::Running)
            .await
            .unwrap();
        assert!(repo
            .mark_waiting(node.id, "cb", Some(Status::ApprovalWaiting))
            .await
            .unwrap());

        let waiting = repo.get(node.id).await.unwrap().unwrap();
        assert_eq!(waiting.status, Status::ApprovalWaiting);
        assert_eq!(waiting.pending_callback.as_deref(), Some("cb"));

        assert!(repo.claim_resume(node.id, "other").await.unwrap().is_none());

        let before = repo.claim_resume(node.id, "cb").await.unwrap().unwrap();
        assert_eq!(before.status, Status::ApprovalWaiting);

        let after = repo.get(node.id).await.unwrap().unwrap();
        assert_eq!(after.status, Status::Running);
        assert!(after.pending_callback.is_none());

        assert!(repo.claim_resume(node.id, "cb").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_one_winner() {
        let (pool, _dir) = test_pool().await;
        let repo = Arc::new(SqliteNodeExecutionRepository::new(pool));

        let node = sample_node(Uuid::now_v7(), None);
        repo.create(&node).await.unwrap();
        repo.update_status(node.id, &[Status::Queued], Status::Running)
            .await
            .unwrap();
        repo.mark_waiting(node.id, "task-1", Some(Status::TaskWaiting))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..6 {
            let repo = Arc::clone(&repo);
            let id = node.id;
            handles.push(tokio::spawn(async move {
                repo.claim_resume(id, "task-1").await.unwrap()
            }));
        }

        let mut claimed = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                claimed += 1;
            }
        }
        assert_eq!(claimed, 1);
    }

    #[tokio::test]
    async fn test_complete_sets_terminal_fields() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteNodeExecutionRepository::new(pool);

        let node = sample_node(Uuid::now_v7(), None);
        repo.create(&node).await.unwrap();
        repo.update_status(node.id, &[Status::Queued], Status::Running)
            .await
            .unwrap();
        repo.mark_waiting(node.id, "cb", None).await.unwrap();

        let response = StepResponse::failed(FailureInfo::new("exit 1", FailureType::Application))
            .with_outcome(serde_json::json!({"exit_code": 1}));
        let done = repo
            .complete(node.id, &[Status::Running], &response)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.status, Status::Failed);
        assert_eq!(done.outcome, Some(serde_json::json!({"exit_code": 1})));
        assert_eq!(done.failure.unwrap().failure_types, vec![FailureType::Application]);
        assert!(done.pending_callback.is_none());

        let late = repo
            .complete(node.id, &[Status::Running], &StepResponse::succeeded())
            .await
            .unwrap();
        assert!(late.is_none());
    }

    #[tokio::test]
    async fn test_list_queries_are_oldest_first() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteNodeExecutionRepository::new(pool);

        let plan_execution_id = Uuid::now_v7();
        let parent = sample_node(plan_execution_id, None);
        repo.create(&parent).await.unwrap();

        let mut child_ids = Vec::new();
        for _ in 0..3 {
            let child = sample_node(plan_execution_id, Some(parent.id));
            repo.create(&child).await.unwrap();
            child_ids.push(child.id);
        }
        repo.create(&sample_node(Uuid::now_v7(), None)).await.unwrap();

        let children = repo.list_children(parent.id).await.unwrap();
        let listed: Vec<Uuid> = children.iter().map(|c| c.id).collect();
        assert_eq!(listed, child_ids);

        let all = repo.list_by_plan_execution(plan_execution_id).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].id, parent.id);
    }

    #[tokio::test]
    async fn test_save_and_get_plan() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteNodeExecutionRepository::new(pool);

        let plan = Plan::new(
            "root",
            vec![
                PlanNode::new("root", "pipeline", "SECTION_CHAIN", ExecutionMode::ChildChain)
                    .with_children(["a"]),
                PlanNode::new("a", "a", "SHELL", ExecutionMode::Sync),
            ],
        );
        let plan_execution_id = Uuid::now_v7();
        repo.save_plan(plan_execution_id, &plan).await.unwrap();

        let loaded = repo.get_plan(plan_execution_id).await.unwrap().unwrap();
        assert_eq!(loaded, plan);
        assert!(repo.get_plan(Uuid::now_v7()).await.unwrap().is_none());
    }
}
