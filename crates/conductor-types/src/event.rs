//! Lifecycle events broadcast by the orchestration kernel.
//!
//! `ConductorEvent` is the unified event type published on the event bus.
//! External history and streaming collaborators subscribe to it; the kernel
//! itself never stores events. All variants are Clone + Send + Sync for use
//! with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::ActionStatus;
use crate::saga::SagaStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConductorEvent {
    // -- Executions --
    ExecutionStarted {
        execution_id: Uuid,
        workflow_id: Uuid,
        workflow_name: String,
        correlation_id: Option<String>,
    },

    /// One action reached a terminal status.
    ActionFinished {
        execution_id: Uuid,
        action_id: String,
        status: ActionStatus,
        duration_ms: u64,
    },

    ExecutionCompleted {
        execution_id: Uuid,
        workflow_id: Uuid,
        actions_completed: u32,
    },

    ExecutionFailed {
        execution_id: Uuid,
        workflow_id: Uuid,
        error: String,
    },

    ExecutionCancelled {
        execution_id: Uuid,
        workflow_id: Uuid,
    },

    // -- Sagas --
    SagaTransitioned {
        saga_id: Uuid,
        saga_type: String,
        status: SagaStatus,
    },

    /// A compensation call finished for one step.
    StepCompensated {
        saga_id: Uuid,
        step_id: String,
        success: bool,
    },

    // -- Dead-letter ledger --
    DeadLettered {
        dlq_id: Uuid,
        event_id: String,
        event_type: String,
    },
}

impl ConductorEvent {
    /// The execution this event belongs to, if any.
    pub fn execution_id(&self) -> Option<Uuid> {
        match self {
            ConductorEvent::ExecutionStarted { execution_id, .. }
            | ConductorEvent::ActionFinished { execution_id, .. }
            | ConductorEvent::ExecutionCompleted { execution_id, .. }
            | ConductorEvent::ExecutionFailed { execution_id, .. }
            | ConductorEvent::ExecutionCancelled { execution_id, .. } => Some(*execution_id),
            ConductorEvent::SagaTransitioned { .. }
            | ConductorEvent::StepCompensated { .. }
            | ConductorEvent::DeadLettered { .. } => None,
        }
    }
}
