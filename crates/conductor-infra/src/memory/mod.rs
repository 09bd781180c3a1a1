//! In-memory repositories backed by `DashMap`.
//!
//! Same contracts as the SQLite adapters (insert conflicts, update of a
//! missing record is `NotFound`, newest first). Used for ephemeral runs and
//! tests; nothing survives the process.

use conductor_core::repository::execution::{ExecutionFilter, ExecutionRepository};
use conductor_core::repository::workflow::{WorkflowFilter, WorkflowRepository};
use conductor_types::error::RepositoryError;
use conductor_types::execution::WorkflowExecution;
use conductor_types::workflow::Workflow;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

fn insert_new<T: Clone>(map: &DashMap<Uuid, T>, id: Uuid, value: &T) -> Result<(), RepositoryError> {
    match map.entry(id) {
        Entry::Occupied(_) => Err(RepositoryError::Conflict(format!("{id} already exists"))),
        Entry::Vacant(slot) => {
            slot.insert(value.clone());
            Ok(())
        }
    }
}

fn replace<T: Clone>(map: &DashMap<Uuid, T>, id: Uuid, value: &T) -> Result<(), RepositoryError> {
    match map.get_mut(&id) {
        Some(mut current) => {
            *current = value.clone();
            Ok(())
        }
        None => Err(RepositoryError::NotFound),
    }
}

#[derive(Debug, Default)]
pub struct InMemoryWorkflowRepository {
    workflows: DashMap<Uuid, Workflow>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn save(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        insert_new(&self.workflows, workflow.id, workflow)
    }

    async fn get(&self, id: &Uuid) -> Result<Option<Workflow>, RepositoryError> {
        Ok(self.workflows.get(id).map(|w| w.clone()))
    }

    async fn list(
        &self,
        filter: &WorkflowFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Workflow>, RepositoryError> {
        let mut matching: Vec<Workflow> = self
            .workflows
            .iter()
            .filter(|w| filter.matches(w.value()))
            .map(|w| w.value().clone())
            .collect();
        matching.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }

    async fn update(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        replace(&self.workflows, workflow.id, workflow)
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        Ok(self.workflows.remove(id).is_some())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryExecutionRepository {
    executions: DashMap<Uuid, WorkflowExecution>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionRepository for InMemoryExecutionRepository {
    async fn save(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        insert_new(&self.executions, execution.execution_id, execution)
    }

    async fn get(&self, execution_id: &Uuid) -> Result<Option<WorkflowExecution>, RepositoryError> {
        Ok(self.executions.get(execution_id).map(|e| e.clone()))
    }

    async fn list(
        &self,
        filter: &ExecutionFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let mut matching: Vec<WorkflowExecution> = self
            .executions
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }

    async fn update(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        replace(&self.executions, execution.execution_id, execution)
    }

    async fn delete(&self, execution_id: &Uuid) -> Result<bool, RepositoryError> {
        Ok(self.executions.remove(execution_id).is_some())
    }
}
