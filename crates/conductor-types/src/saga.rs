//! Saga instances: an ordered sequence of cross-service steps with a matching
//! reverse-order compensation path.
//!
//! The state machine lives on `SagaInstance`; the orchestrator in
//! conductor-core composes these transitions and performs the compensation
//! calls.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::DomainError;

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SagaStatus {
    #[default]
    Pending,
    Started,
    Compensating,
    Completed,
    Failed,
    Aborted,
}

impl SagaStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStatus::Completed | SagaStatus::Failed | SagaStatus::Aborted
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SagaStatus::Pending => write!(f, "pending"),
            SagaStatus::Started => write!(f, "started"),
            SagaStatus::Compensating => write!(f, "compensating"),
            SagaStatus::Completed => write!(f, "completed"),
            SagaStatus::Failed => write!(f, "failed"),
            SagaStatus::Aborted => write!(f, "aborted"),
        }
    }
}

impl FromStr for SagaStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(SagaStatus::Pending),
            "started" => Ok(SagaStatus::Started),
            "compensating" => Ok(SagaStatus::Compensating),
            "completed" => Ok(SagaStatus::Completed),
            "failed" => Ok(SagaStatus::Failed),
            "aborted" => Ok(SagaStatus::Aborted),
            other => Err(format!("invalid saga status: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStepStatus {
    #[default]
    Pending,
    Completed,
    Failed,
    Compensated,
    CompensationFailed,
}

impl fmt::Display for SagaStepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SagaStepStatus::Pending => write!(f, "pending"),
            SagaStepStatus::Completed => write!(f, "completed"),
            SagaStepStatus::Failed => write!(f, "failed"),
            SagaStepStatus::Compensated => write!(f, "compensated"),
            SagaStepStatus::CompensationFailed => write!(f, "compensation_failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// SagaStep
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaStep {
    pub step_id: String,
    pub service_name: String,
    pub operation: String,
    /// Operation that undoes `operation`. Steps without one are not compensated.
    pub compensation_operation: Option<String>,
    pub status: SagaStepStatus,
    pub executed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl SagaStep {
    pub fn new(
        step_id: impl Into<String>,
        service_name: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            service_name: service_name.into(),
            operation: operation.into(),
            compensation_operation: None,
            status: SagaStepStatus::Pending,
            executed_at: None,
            completed_at: None,
            error_message: None,
        }
    }

    pub fn with_compensation(mut self, operation: impl Into<String>) -> Self {
        self.compensation_operation = Some(operation.into());
        self
    }
}

// ---------------------------------------------------------------------------
// SagaInstance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaInstance {
    pub saga_id: Uuid,
    pub saga_type: String,
    pub correlation_id: String,
    steps: Vec<SagaStep>,
    pub status: SagaStatus,
    pub metadata: HashMap<String, Value>,
    pub current_step_index: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Step IDs in the order they completed.
    #[serde(default)]
    completion_log: Vec<String>,
}

impl SagaInstance {
    /// Create a pending saga. At least one step is required.
    pub fn new(
        saga_type: impl Into<String>,
        correlation_id: impl Into<String>,
        steps: Vec<SagaStep>,
        metadata: HashMap<String, Value>,
    ) -> Result<Self, DomainError> {
        if steps.is_empty() {
            return Err(DomainError::EmptySaga);
        }
        Ok(Self {
            saga_id: Uuid::now_v7(),
            saga_type: saga_type.into(),
            correlation_id: correlation_id.into(),
            steps,
            status: SagaStatus::Pending,
            metadata,
            current_step_index: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            completion_log: Vec::new(),
        })
    }

    pub fn steps(&self) -> &[SagaStep] {
        &self.steps
    }

    pub fn step(&self, step_id: &str) -> Option<&SagaStep> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    fn step_index(&self, step_id: &str) -> Result<usize, DomainError> {
        self.steps
            .iter()
            .position(|s| s.step_id == step_id)
            .ok_or_else(|| DomainError::StepNotFound(step_id.to_string()))
    }

    fn ensure_not_terminal(&self) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            Err(DomainError::Terminal("saga"))
        } else {
            Ok(())
        }
    }

    fn rejected(&self, to: SagaStatus) -> DomainError {
        DomainError::InvalidTransition {
            entity: "saga",
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }

    fn require(&self, from: SagaStatus, to: SagaStatus) -> Result<(), DomainError> {
        self.ensure_not_terminal()?;
        if self.status == from {
            Ok(())
        } else {
            Err(self.rejected(to))
        }
    }

    /// pending -> started, positioned at the first step.
    pub fn start(&mut self) -> Result<(), DomainError> {
        self.require(SagaStatus::Pending, SagaStatus::Started)?;
        self.status = SagaStatus::Started;
        self.started_at = Some(Utc::now());
        self.current_step_index = 0;
        Ok(())
    }

    /// Mark a step completed and advance past it. Saga must be started.
    pub fn complete_step(&mut self, step_id: &str) -> Result<(), DomainError> {
        self.require(SagaStatus::Started, SagaStatus::Started)?;
        let idx = self.step_index(step_id)?;
        let now = Utc::now();
        let step = &mut self.steps[idx];
        step.status = SagaStepStatus::Completed;
        step.executed_at.get_or_insert(now);
        step.completed_at = Some(now);
        step.error_message = None;
        self.current_step_index = self.current_step_index.max(idx + 1);
        self.completion_log.retain(|id| id != step_id);
        self.completion_log.push(step_id.to_string());
        Ok(())
    }

    /// Mark a step failed. Does not change the saga's own status.
    pub fn fail_step(&mut self, step_id: &str, reason: impl Into<String>) -> Result<(), DomainError> {
        self.require(SagaStatus::Started, SagaStatus::Started)?;
        let idx = self.step_index(step_id)?;
        let step = &mut self.steps[idx];
        step.status = SagaStepStatus::Failed;
        step.executed_at.get_or_insert_with(Utc::now);
        step.error_message = Some(reason.into());
        Ok(())
    }

    /// started -> compensating.
    pub fn begin_compensation(&mut self) -> Result<(), DomainError> {
        self.require(SagaStatus::Started, SagaStatus::Compensating)?;
        self.status = SagaStatus::Compensating;
        Ok(())
    }

    /// IDs of every step that ever completed, in reverse completion order.
    ///
    /// A step failed after completing is still listed: its effect was
    /// committed. Steps already compensated are not.
    pub fn compensation_order(&self) -> Vec<String> {
        self.completion_log
            .iter()
            .rev()
            .filter(|id| {
                self.step(id).is_some_and(|s| {
                    !matches!(
                        s.status,
                        SagaStepStatus::Compensated | SagaStepStatus::CompensationFailed
                    )
                })
            })
            .cloned()
            .collect()
    }

    /// Record the outcome of one compensation call. Saga must be compensating.
    pub fn record_compensation(
        &mut self,
        step_id: &str,
        outcome: Result<(), String>,
    ) -> Result<(), DomainError> {
        self.require(SagaStatus::Compensating, SagaStatus::Compensating)?;
        let idx = self.step_index(step_id)?;
        let step = &mut self.steps[idx];
        match outcome {
            Ok(()) => step.status = SagaStepStatus::Compensated,
            Err(e) => {
                step.status = SagaStepStatus::CompensationFailed;
                step.error_message = Some(e);
            }
        }
        Ok(())
    }

    /// started | compensating -> failed.
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<(), DomainError> {
        self.ensure_not_terminal()?;
        if !matches!(self.status, SagaStatus::Started | SagaStatus::Compensating) {
            return Err(self.rejected(SagaStatus::Failed));
        }
        self.status = SagaStatus::Failed;
        self.error_message = Some(reason.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// started -> completed.
    pub fn complete(&mut self) -> Result<(), DomainError> {
        self.require(SagaStatus::Started, SagaStatus::Completed)?;
        self.status = SagaStatus::Completed;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Any active state -> aborted.
    pub fn abort(&mut self, reason: impl Into<String>) -> Result<(), DomainError> {
        self.ensure_not_terminal()?;
        self.status = SagaStatus::Aborted;
        self.error_message = Some(reason.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_step() -> SagaInstance {
        SagaInstance::new(
            "order",
            "corr-1",
            vec![
                SagaStep::new("reserve", "inventory", "reserve").with_compensation("release"),
                SagaStep::new("charge", "billing", "charge").with_compensation("refund"),
            ],
            HashMap::new(),
        )
        .unwrap()
    }

    #[test]
    fn empty_saga_rejected() {
        let err = SagaInstance::new("order", "c", vec![], HashMap::new()).unwrap_err();
        assert_eq!(err, DomainError::EmptySaga);
    }

    #[test]
    fn start_only_from_pending() {
        let mut saga = two_step();
        saga.start().unwrap();
        assert_eq!(saga.status, SagaStatus::Started);
        assert!(saga.started_at.is_some());
        assert!(matches!(
            saga.start(),
            Err(DomainError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn step_mutations_require_started() {
        let mut saga = two_step();
        assert!(saga.complete_step("reserve").is_err());
        saga.start().unwrap();
        saga.complete_step("reserve").unwrap();
        assert_eq!(saga.current_step_index, 1);
        assert_eq!(saga.status, SagaStatus::Started);
        assert_eq!(
            saga.complete_step("missing"),
            Err(DomainError::StepNotFound("missing".to_string()))
        );
    }

    #[test]
    fn fail_step_keeps_saga_status() {
        let mut saga = two_step();
        saga.start().unwrap();
        saga.fail_step("charge", "card declined").unwrap();
        assert_eq!(saga.status, SagaStatus::Started);
        let step = saga.step("charge").unwrap();
        assert_eq!(step.status, SagaStepStatus::Failed);
        assert_eq!(step.error_message.as_deref(), Some("card declined"));
    }

    #[test]
    fn compensation_order_is_reverse_completion() {
        let mut saga = SagaInstance::new(
            "t",
            "c",
            vec![
                SagaStep::new("a", "s", "op"),
                SagaStep::new("b", "s", "op"),
                SagaStep::new("c", "s", "op"),
            ],
            HashMap::new(),
        )
        .unwrap();
        saga.start().unwrap();
        saga.complete_step("b").unwrap();
        saga.complete_step("a").unwrap();
        assert_eq!(saga.compensation_order(), vec!["a", "b"]);
    }

    #[test]
    fn step_failed_after_completing_is_still_compensated() {
        let mut saga = two_step();
        saga.start().unwrap();
        saga.complete_step("reserve").unwrap();
        saga.fail_step("reserve", "late failure").unwrap();
        assert_eq!(saga.compensation_order(), vec!["reserve"]);

        saga.begin_compensation().unwrap();
        saga.record_compensation("reserve", Ok(())).unwrap();
        assert!(saga.compensation_order().is_empty());
    }

    #[test]
    fn compensation_outcomes_recorded() {
        let mut saga = two_step();
        saga.start().unwrap();
        saga.complete_step("reserve").unwrap();
        saga.complete_step("charge").unwrap();
        saga.begin_compensation().unwrap();
        saga.record_compensation("charge", Ok(())).unwrap();
        saga.record_compensation("reserve", Err("timeout".into()))
            .unwrap();
        saga.mark_failed("compensated").unwrap();

        assert_eq!(saga.step("charge").unwrap().status, SagaStepStatus::Compensated);
        assert_eq!(
            saga.step("reserve").unwrap().status,
            SagaStepStatus::CompensationFailed
        );
        assert!(saga.status.is_terminal());
    }

    #[test]
    fn terminal_saga_is_immutable() {
        let mut saga = two_step();
        saga.start().unwrap();
        saga.complete().unwrap();
        assert_eq!(saga.abort("late"), Err(DomainError::Terminal("saga")));
        assert_eq!(saga.complete_step("reserve"), Err(DomainError::Terminal("saga")));
        assert_eq!(saga.status, SagaStatus::Completed);
    }

    #[test]
    fn abort_from_pending() {
        let mut saga = two_step();
        saga.abort("operator").unwrap();
        assert_eq!(saga.status, SagaStatus::Aborted);
        assert_eq!(saga.error_message.as_deref(), Some("operator"));
    }

    #[test]
    fn step_status_serializes_snake_case() {
        let json = serde_json::to_string(&SagaStepStatus::CompensationFailed).unwrap();
        assert_eq!(json, "\"compensation_failed\"");
    }
}
