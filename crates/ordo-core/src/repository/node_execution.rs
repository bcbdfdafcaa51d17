//! Node execution repository trait definition.

use ordo_types::error::RepositoryError;
use ordo_types::execution::{ExecutableResponse, NodeExecution, Status};
use ordo_types::plan::Plan;
use ordo_types::response::StepResponse;
use uuid::Uuid;

/// Storage for node executions and the plans they run.
///
/// Every mutation is a field-level update. Status changes are conditional:
/// they only apply when the persisted status is in the expected set, so two
/// writers racing on one node execution cannot both win.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait NodeExecutionRepository: Send + Sync + 'static {
    /// Insert a new node execution. Fails with `Conflict` if the id exists.
    fn create(
        &self,
        node: &NodeExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a node execution by id.
    fn get(
        &self,
        id: Uuid,
    ) -> impl std::future::Future<Output = Result<Option<NodeExecution>, RepositoryError>> + Send;

    /// Set the status if the current status is one of `expected`.
    ///
    /// Returns the updated record, or `None` if the condition did not hold.
    fn update_status(
        &self,
        id: Uuid,
        expected: &[Status],
        status: Status,
    ) -> impl std::future::Future<Output = Result<Option<NodeExecution>, RepositoryError>> + Send;

    /// Append to the executable response list.
    fn append_response(
        &self,
        id: Uuid,
        response: &ExecutableResponse,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Record the wait registration a running node is suspended on, and
    /// optionally move it to a waiting status.
    ///
    /// Only applies while the node is `Running`. Returns whether it applied.
    fn mark_waiting(
        &self,
        id: Uuid,
        callback_id: &str,
        waiting_status: Option<Status>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Claim the resume for `callback_id`: if the node is running or waiting
    /// and `pending_callback` equals `callback_id`, set it to `Running` and
    /// clear `pending_callback` in one write.
    ///
    /// Returns the record as it was before the claim, or `None` when the
    /// resume was already claimed or the node moved on.
    fn claim_resume(
        &self,
        id: Uuid,
        callback_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<NodeExecution>, RepositoryError>> + Send;

    /// Apply a terminal step response if the current status is one of
    /// `expected`: sets status, outcome and failure and clears
    /// `pending_callback`.
    fn complete(
        &self,
        id: Uuid,
        expected: &[Status],
        response: &StepResponse,
    ) -> impl std::future::Future<Output = Result<Option<NodeExecution>, RepositoryError>> + Send;

    /// Direct children of a node execution, oldest first.
    fn list_children(
        &self,
        parent_id: Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<NodeExecution>, RepositoryError>> + Send;

    /// Every node execution of a plan execution, oldest first.
    fn list_by_plan_execution(
        &self,
        plan_execution_id: Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<NodeExecution>, RepositoryError>> + Send;

    /// Store the plan a plan execution runs.
    fn save_plan(
        &self,
        plan_execution_id: Uuid,
        plan: &Plan,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Load the plan a plan execution runs.
    fn get_plan(
        &self,
        plan_execution_id: Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Plan>, RepositoryError>> + Send;
}
