//! Workflow execution records.
//!
//! A `WorkflowExecution` references its workflow by ID and is mutated only by
//! the execution flow that owns it. Once terminal, every mutator is rejected.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::action::ActionResult;
use crate::error::DomainError;

/// Status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Pending => write!(f, "pending"),
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Completed => write!(f, "completed"),
            ExecutionStatus::Failed => write!(f, "failed"),
            ExecutionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(format!("invalid execution status: '{other}'")),
        }
    }
}

/// One run of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    /// Resolved inputs. Frozen once the execution starts.
    pub parameters: HashMap<String, Value>,
    pub results: HashMap<String, ActionResult>,
    pub correlation_id: Option<String>,
    pub trace_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    /// Create a pending execution carrying the resolved parameters.
    pub fn new(workflow_id: Uuid, parameters: HashMap<String, Value>) -> Self {
        Self {
            execution_id: Uuid::now_v7(),
            workflow_id,
            status: ExecutionStatus::Pending,
            parameters,
            results: HashMap::new(),
            correlation_id: None,
            trace_id: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_correlation(
        mut self,
        correlation_id: Option<String>,
        trace_id: Option<String>,
    ) -> Self {
        self.correlation_id = correlation_id;
        self.trace_id = trace_id;
        self
    }

    fn ensure_not_terminal(&self) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            Err(DomainError::Terminal("execution"))
        } else {
            Ok(())
        }
    }

    fn rejected(&self, to: ExecutionStatus) -> DomainError {
        DomainError::InvalidTransition {
            entity: "execution",
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }

    /// pending -> running.
    pub fn start(&mut self) -> Result<(), DomainError> {
        self.ensure_not_terminal()?;
        if self.status != ExecutionStatus::Pending {
            return Err(self.rejected(ExecutionStatus::Running));
        }
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Replace the parameter snapshot. Only allowed before `start`.
    pub fn set_parameters(&mut self, parameters: HashMap<String, Value>) -> Result<(), DomainError> {
        self.ensure_not_terminal()?;
        if self.status != ExecutionStatus::Pending {
            return Err(DomainError::Terminal("parameter snapshot"));
        }
        self.parameters = parameters;
        Ok(())
    }

    /// Record one action's result while running.
    pub fn record_result(&mut self, result: ActionResult) -> Result<(), DomainError> {
        self.ensure_not_terminal()?;
        self.results.insert(result.action_id().to_string(), result);
        Ok(())
    }

    /// Record every result from a finished run.
    pub fn record_results(
        &mut self,
        results: impl IntoIterator<Item = ActionResult>,
    ) -> Result<(), DomainError> {
        self.ensure_not_terminal()?;
        for result in results {
            self.results.insert(result.action_id().to_string(), result);
        }
        Ok(())
    }

    /// running -> completed.
    pub fn complete(&mut self) -> Result<(), DomainError> {
        self.ensure_not_terminal()?;
        if self.status != ExecutionStatus::Running {
            return Err(self.rejected(ExecutionStatus::Completed));
        }
        self.finish(ExecutionStatus::Completed, None);
        Ok(())
    }

    /// running -> failed.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), DomainError> {
        self.ensure_not_terminal()?;
        if self.status != ExecutionStatus::Running {
            return Err(self.rejected(ExecutionStatus::Failed));
        }
        self.finish(ExecutionStatus::Failed, Some(message.into()));
        Ok(())
    }

    /// pending | running -> cancelled.
    pub fn cancel(&mut self) -> Result<(), DomainError> {
        self.ensure_not_terminal()?;
        self.finish(ExecutionStatus::Cancelled, None);
        Ok(())
    }

    fn finish(&mut self, status: ExecutionStatus, error_message: Option<String>) {
        self.status = status;
        self.error_message = error_message;
        self.completed_at = Some(Utc::now());
    }

    /// Wall-clock time between start and completion, if both happened.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}
