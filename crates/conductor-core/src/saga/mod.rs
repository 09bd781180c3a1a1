//! Saga orchestration: compensating-transaction state machine.

pub mod orchestrator;

pub use orchestrator::{CompensationHandler, SagaError, SagaOrchestrator, SagaStats};
