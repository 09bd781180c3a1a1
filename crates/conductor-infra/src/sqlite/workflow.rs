//! SQLite workflow and execution repositories.
//!
//! Both aggregates are stored as JSON blobs next to a few scalar columns
//! used for filtering and ordering. Reads go to the reader pool, writes to
//! the single-connection writer pool.

use chrono::{DateTime, Utc};
use conductor_core::repository::execution::{ExecutionFilter, ExecutionRepository};
use conductor_core::repository::workflow::{WorkflowFilter, WorkflowRepository};
use conductor_types::error::RepositoryError;
use conductor_types::execution::WorkflowExecution;
use conductor_types::workflow::Workflow;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn query_err(e: sqlx::Error) -> RepositoryError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepositoryError::Conflict(db.message().to_string())
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => RepositoryError::Connection,
        _ => RepositoryError::Query(e.to_string()),
    }
}

fn to_json<T: Serialize>(value: &T, what: &str) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(format!("serialize {what}: {e}")))
}

fn decode_blob<T: DeserializeOwned>(
    row: &sqlx::sqlite::SqliteRow,
    column: &str,
) -> Result<T, RepositoryError> {
    let blob: String = row.try_get(column).map_err(query_err)?;
    serde_json::from_str(&blob)
        .map_err(|e| RepositoryError::Query(format!("invalid {column} JSON: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn page_bounds(limit: usize, offset: usize) -> (i64, i64) {
    (
        i64::try_from(limit).unwrap_or(i64::MAX),
        i64::try_from(offset).unwrap_or(i64::MAX),
    )
}

// ---------------------------------------------------------------------------
// SqliteWorkflowRepository
// ---------------------------------------------------------------------------

pub struct SqliteWorkflowRepository {
    pool: DatabasePool,
}

impl SqliteWorkflowRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

impl WorkflowRepository for SqliteWorkflowRepository {
    async fn save(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        let definition = to_json(workflow, "workflow")?;
        sqlx::query(
            r#"INSERT INTO workflows (id, name, status, created_by, definition, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(workflow.id.to_string())
        .bind(&workflow.name)
        .bind(workflow.status.to_string())
        .bind(&workflow.created_by)
        .bind(&definition)
        .bind(format_datetime(&workflow.created_at))
        .bind(format_datetime(&workflow.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<Workflow>, RepositoryError> {
        let row = sqlx::query("SELECT definition FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;
        row.map(|r| decode_blob(&r, "definition")).transpose()
    }

    async fn list(
        &self,
        filter: &WorkflowFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Workflow>, RepositoryError> {
        // status and creator narrow in SQL; tag and name match on the decoded aggregate
        let status = filter.status.map(|s| s.to_string());
        let rows = sqlx::query(
            r#"SELECT definition FROM workflows
               WHERE (? IS NULL OR status = ?)
                 AND (? IS NULL OR created_by = ?)
               ORDER BY updated_at DESC"#,
        )
        .bind(&status)
        .bind(&status)
        .bind(&filter.created_by)
        .bind(&filter.created_by)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        let mut workflows = Vec::new();
        for row in rows {
            let workflow: Workflow = decode_blob(&row, "definition")?;
            if filter.matches(&workflow) {
                workflows.push(workflow);
            }
        }
        Ok(workflows.into_iter().skip(offset).take(limit).collect())
    }

    async fn update(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        let definition = to_json(workflow, "workflow")?;
        let result = sqlx::query(
            r#"UPDATE workflows
               SET name = ?, status = ?, created_by = ?, definition = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&workflow.name)
        .bind(workflow.status.to_string())
        .bind(&workflow.created_by)
        .bind(&definition)
        .bind(format_datetime(&Utc::now()))
        .bind(workflow.id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        Ok(result.rows_affected() > 0)
    }
}

// ---------------------------------------------------------------------------
// SqliteExecutionRepository
// ---------------------------------------------------------------------------

pub struct SqliteExecutionRepository {
    pool: DatabasePool,
}

impl SqliteExecutionRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

impl ExecutionRepository for SqliteExecutionRepository {
    async fn save(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        let record = to_json(execution, "execution")?;
        let now = format_datetime(&Utc::now());
        sqlx::query(
            r#"INSERT INTO workflow_executions
                 (id, workflow_id, status, correlation_id, record, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(execution.execution_id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(execution.status.to_string())
        .bind(&execution.correlation_id)
        .bind(&record)
        .bind(format_datetime(&execution.created_at))
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn get(&self, execution_id: &Uuid) -> Result<Option<WorkflowExecution>, RepositoryError> {
        let row = sqlx::query("SELECT record FROM workflow_executions WHERE id = ?")
            .bind(execution_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;
        row.map(|r| decode_blob(&r, "record")).transpose()
    }

    async fn list(
        &self,
        filter: &ExecutionFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let workflow_id = filter.workflow_id.map(|id| id.to_string());
        let status = filter.status.map(|s| s.to_string());
        let (limit, offset) = page_bounds(limit, offset);

        let rows = sqlx::query(
            r#"SELECT record FROM workflow_executions
               WHERE (? IS NULL OR workflow_id = ?)
                 AND (? IS NULL OR status = ?)
                 AND (? IS NULL OR correlation_id = ?)
               ORDER BY created_at DESC
               LIMIT ? OFFSET ?"#,
        )
        .bind(&workflow_id)
        .bind(&workflow_id)
        .bind(&status)
        .bind(&status)
        .bind(&filter.correlation_id)
        .bind(&filter.correlation_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter().map(|r| decode_blob(r, "record")).collect()
    }

    async fn update(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        let record = to_json(execution, "execution")?;
        let result = sqlx::query(
            r#"UPDATE workflow_executions
               SET status = ?, correlation_id = ?, record = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(execution.status.to_string())
        .bind(&execution.correlation_id)
        .bind(&record)
        .bind(format_datetime(&Utc::now()))
        .bind(execution.execution_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn delete(&self, execution_id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM workflow_executions WHERE id = ?")
            .bind(execution_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        Ok(result.rows_affected() > 0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
