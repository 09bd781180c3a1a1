//! Workflow execution repository trait.

use conductor_types::error::RepositoryError;
use conductor_types::execution::{ExecutionStatus, WorkflowExecution};
use uuid::Uuid;

/// Filter criteria for listing executions. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub workflow_id: Option<Uuid>,
    pub status: Option<ExecutionStatus>,
    pub correlation_id: Option<String>,
}

impl ExecutionFilter {
    pub fn for_workflow(workflow_id: Uuid) -> Self {
        Self {
            workflow_id: Some(workflow_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, execution: &WorkflowExecution) -> bool {
        self.workflow_id.is_none_or(|id| execution.workflow_id == id)
            && self.status.is_none_or(|s| execution.status == s)
            && self
                .correlation_id
                .as_ref()
                .is_none_or(|c| execution.correlation_id.as_ref() == Some(c))
    }
}

/// Repository trait for execution records.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait ExecutionRepository: Send + Sync {
    /// Insert a new execution. Fails with `Conflict` if the ID exists.
    fn save(
        &self,
        execution: &WorkflowExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowExecution>, RepositoryError>> + Send;

    /// List matching executions, newest first.
    fn list(
        &self,
        filter: &ExecutionFilter,
        limit: usize,
        offset: usize,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowExecution>, RepositoryError>> + Send;

    /// Replace an existing execution. Fails with `NotFound` if absent.
    fn update(
        &self,
        execution: &WorkflowExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Returns `true` if the execution existed.
    fn delete(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}
