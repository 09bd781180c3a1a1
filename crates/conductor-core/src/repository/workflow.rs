//! Workflow definition repository trait.

use conductor_types::error::RepositoryError;
use conductor_types::workflow::{Workflow, WorkflowStatus};
use uuid::Uuid;

/// Filter criteria for listing workflows. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct WorkflowFilter {
    pub status: Option<WorkflowStatus>,
    pub created_by: Option<String>,
    /// Workflows carrying this tag.
    pub tag: Option<String>,
    /// Case-insensitive substring of the name.
    pub name_contains: Option<String>,
}

impl WorkflowFilter {
    pub fn matches(&self, workflow: &Workflow) -> bool {
        self.status.is_none_or(|s| workflow.status == s)
            && self
                .created_by
                .as_ref()
                .is_none_or(|c| &workflow.created_by == c)
            && self.tag.as_ref().is_none_or(|t| workflow.tags.contains(t))
            && self.name_contains.as_ref().is_none_or(|n| {
                workflow.name.to_lowercase().contains(&n.to_lowercase())
            })
    }
}

/// Repository trait for workflow definitions.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowRepository: Send + Sync {
    /// Insert a new workflow. Fails with `Conflict` if the ID exists.
    fn save(
        &self,
        workflow: &Workflow,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Workflow>, RepositoryError>> + Send;

    /// List matching workflows, most recently updated first.
    fn list(
        &self,
        filter: &WorkflowFilter,
        limit: usize,
        offset: usize,
    ) -> impl std::future::Future<Output = Result<Vec<Workflow>, RepositoryError>> + Send;

    /// Replace an existing workflow. Fails with `NotFound` if absent.
    fn update(
        &self,
        workflow: &Workflow,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Returns `true` if the workflow existed.
    fn delete(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}
