//! Saga orchestrator: owns saga instances and drives compensation.
//!
//! Active sagas live behind a per-saga `tokio::sync::Mutex` so every
//! operation is a single-writer read-modify-write, including the
//! compensation awaits inside `fail_step`. A saga that reaches a terminal
//! state is moved from the active map to the completed map and can no longer
//! be reached through the active lookups.

use std::collections::HashMap;
use std::sync::Arc;

use conductor_types::error::DomainError;
use conductor_types::event::ConductorEvent;
use conductor_types::saga::{SagaInstance, SagaStatus, SagaStep};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::event::bus::EventBus;

#[derive(Debug, Error)]
pub enum SagaError {
    #[error("saga not found or no longer active: {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Executes a step's `compensation_operation`.
///
/// Uses RPITIT for the async method, consistent with `ActionInvoker`.
pub trait CompensationHandler: Send + Sync {
    fn compensate(
        &self,
        saga: &SagaInstance,
        step: &SagaStep,
    ) -> impl std::future::Future<Output = Result<(), String>> + Send;
}

impl<T: CompensationHandler> CompensationHandler for Arc<T> {
    async fn compensate(&self, saga: &SagaInstance, step: &SagaStep) -> Result<(), String> {
        (**self).compensate(saga, step).await
    }
}

/// Counts of known sagas by status.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SagaStats {
    pub active: usize,
    pub completed: usize,
    pub by_status: HashMap<SagaStatus, usize>,
}

// ---------------------------------------------------------------------------
// SagaOrchestrator
// ---------------------------------------------------------------------------

pub struct SagaOrchestrator<H> {
    handler: H,
    active: DashMap<Uuid, Arc<Mutex<SagaInstance>>>,
    completed: DashMap<Uuid, SagaInstance>,
    events: Option<EventBus>,
}

impl<H: CompensationHandler> SagaOrchestrator<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            active: DashMap::new(),
            completed: DashMap::new(),
            events: None,
        }
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Register a new pending saga. Zero steps are rejected.
    pub fn create(
        &self,
        saga_type: impl Into<String>,
        correlation_id: impl Into<String>,
        steps: Vec<SagaStep>,
        metadata: HashMap<String, Value>,
    ) -> Result<SagaInstance, SagaError> {
        let saga = SagaInstance::new(saga_type, correlation_id, steps, metadata)?;
        tracing::info!(
            saga_id = %saga.saga_id,
            saga_type = %saga.saga_type,
            correlation_id = %saga.correlation_id,
            steps = saga.steps().len(),
            "saga created"
        );
        self.active
            .insert(saga.saga_id, Arc::new(Mutex::new(saga.clone())));
        Ok(saga)
    }

    pub async fn start(&self, saga_id: Uuid) -> Result<SagaInstance, SagaError> {
        let entry = self.active_entry(saga_id)?;
        let mut saga = entry.lock().await;
        saga.start()?;
        self.transitioned(&saga);
        Ok(saga.clone())
    }

    pub async fn complete_step(
        &self,
        saga_id: Uuid,
        step_id: &str,
    ) -> Result<SagaInstance, SagaError> {
        let entry = self.active_entry(saga_id)?;
        let mut saga = entry.lock().await;
        saga.complete_step(step_id)?;
        tracing::debug!(
            saga_id = %saga_id,
            step_id,
            current_step_index = saga.current_step_index,
            "saga step completed"
        );
        Ok(saga.clone())
    }

    /// Fail a step, compensate every completed step in reverse completion
    /// order, then mark the saga failed.
    ///
    /// A failed compensation marks its step `compensation_failed` and is
    /// named in the saga's error message; the remaining steps are still
    /// compensated.
    pub async fn fail_step(
        &self,
        saga_id: Uuid,
        step_id: &str,
        reason: impl Into<String>,
    ) -> Result<SagaInstance, SagaError> {
        let reason = reason.into();
        let entry = self.active_entry(saga_id)?;
        let mut saga = entry.lock().await;

        saga.fail_step(step_id, reason.clone())?;
        saga.begin_compensation()?;
        tracing::warn!(saga_id = %saga_id, step_id, %reason, "saga step failed, compensating");
        self.transitioned(&saga);

        let mut failures = Vec::new();
        for completed_id in saga.compensation_order() {
            let Some(step) = saga.step(&completed_id).cloned() else {
                continue;
            };
            let Some(operation) = step.compensation_operation.as_deref() else {
                tracing::debug!(saga_id = %saga_id, step_id = %completed_id, "no compensation, skipping");
                continue;
            };

            let outcome = self.handler.compensate(&saga, &step).await;
            match &outcome {
                Ok(()) => tracing::info!(
                    saga_id = %saga_id,
                    step_id = %completed_id,
                    operation,
                    "step compensated"
                ),
                Err(e) => {
                    tracing::error!(
                        saga_id = %saga_id,
                        step_id = %completed_id,
                        operation,
                        error = %e,
                        "compensation failed"
                    );
                    failures.push(format!("{completed_id} ({e})"));
                }
            }
            let success = outcome.is_ok();
            saga.record_compensation(&completed_id, outcome)?;
            self.publish(ConductorEvent::StepCompensated {
                saga_id,
                step_id: completed_id,
                success,
            });
        }

        let mut message = format!("step '{step_id}' failed: {reason}");
        if !failures.is_empty() {
            message.push_str(&format!("; compensation failed for {}", failures.join(", ")));
        }
        saga.mark_failed(message)?;
        self.transitioned(&saga);
        self.retire(&saga);
        Ok(saga.clone())
    }

    pub async fn complete(&self, saga_id: Uuid) -> Result<SagaInstance, SagaError> {
        let entry = self.active_entry(saga_id)?;
        let mut saga = entry.lock().await;
        saga.complete()?;
        self.transitioned(&saga);
        self.retire(&saga);
        Ok(saga.clone())
    }

    pub async fn abort(
        &self,
        saga_id: Uuid,
        reason: impl Into<String>,
    ) -> Result<SagaInstance, SagaError> {
        let entry = self.active_entry(saga_id)?;
        let mut saga = entry.lock().await;
        saga.abort(reason)?;
        self.transitioned(&saga);
        self.retire(&saga);
        Ok(saga.clone())
    }

    // -- Queries --

    /// Look up a saga, active or finished.
    pub async fn get(&self, saga_id: Uuid) -> Option<SagaInstance> {
        match self.get_active(saga_id).await {
            Some(saga) => Some(saga),
            None => self.completed.get(&saga_id).map(|s| s.clone()),
        }
    }

    /// Look up a saga that has not reached a terminal state.
    pub async fn get_active(&self, saga_id: Uuid) -> Option<SagaInstance> {
        let entry = self.active.get(&saga_id).map(|e| Arc::clone(e.value()))?;
        let saga = entry.lock().await;
        (!saga.status.is_terminal()).then(|| saga.clone())
    }

    pub async fn list_active(&self) -> Vec<SagaInstance> {
        let mut sagas = Vec::new();
        for entry in self.active_entries() {
            let saga = entry.lock().await;
            if !saga.status.is_terminal() {
                sagas.push(saga.clone());
            }
        }
        sagas.sort_by_key(|s| s.created_at);
        sagas
    }

    pub fn list_completed(&self) -> Vec<SagaInstance> {
        let mut sagas: Vec<SagaInstance> = self.completed.iter().map(|e| e.value().clone()).collect();
        sagas.sort_by_key(|s| s.completed_at);
        sagas
    }

    pub async fn stats(&self) -> SagaStats {
        let mut stats = SagaStats::default();
        for saga in self.list_active().await {
            stats.active += 1;
            *stats.by_status.entry(saga.status).or_default() += 1;
        }
        for entry in self.completed.iter() {
            stats.completed += 1;
            *stats.by_status.entry(entry.status).or_default() += 1;
        }
        stats
    }

    // -- Internals --

    fn active_entry(&self, saga_id: Uuid) -> Result<Arc<Mutex<SagaInstance>>, SagaError> {
        self.active
            .get(&saga_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or(SagaError::NotFound(saga_id))
    }

    /// Snapshot of the active entries; no shard guard outlives this call.
    fn active_entries(&self) -> Vec<Arc<Mutex<SagaInstance>>> {
        self.active.iter().map(|e| Arc::clone(e.value())).collect()
    }

    fn retire(&self, saga: &SagaInstance) {
        self.active.remove(&saga.saga_id);
        self.completed.insert(saga.saga_id, saga.clone());
    }

    fn transitioned(&self, saga: &SagaInstance) {
        tracing::info!(
            saga_id = %saga.saga_id,
            saga_type = %saga.saga_type,
            status = %saga.status,
            "saga transitioned"
        );
        self.publish(ConductorEvent::SagaTransitioned {
            saga_id: saga.saga_id,
            saga_type: saga.saga_type.clone(),
            status: saga.status,
        });
    }

    fn publish(&self, event: ConductorEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_types::saga::SagaStepStatus;
    use std::sync::Mutex as StdMutex;

    /// Records every compensation call (with the saga status observed at
    /// call time) and fails the listed steps.
    #[derive(Default)]
    struct Recorder {
        calls: StdMutex<Vec<(String, SagaStatus)>>,
        fail: Vec<String>,
    }

    impl Recorder {
        fn failing(step: &str) -> Self {
            Self {
                fail: vec![step.to_string()],
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<(String, SagaStatus)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CompensationHandler for Recorder {
        async fn compensate(&self, saga: &SagaInstance, step: &SagaStep) -> Result<(), String> {
            self.calls
                .lock()
                .unwrap()
                .push((step.step_id.clone(), saga.status));
            if self.fail.contains(&step.step_id) {
                Err("downstream unavailable".to_string())
            } else {
                Ok(())
            }
        }
    }

    fn steps() -> Vec<SagaStep> {
        vec![
            SagaStep::new("reserve", "inventory", "reserve").with_compensation("release"),
            SagaStep::new("notify", "mail", "send"),
            SagaStep::new("charge", "billing", "charge").with_compensation("refund"),
            SagaStep::new("ship", "shipping", "ship").with_compensation("recall"),
        ]
    }

    async fn started(orch: &SagaOrchestrator<Recorder>) -> Uuid {
        let saga = orch
            .create("order", "corr-1", steps(), HashMap::new())
            .unwrap();
        orch.start(saga.saga_id).await.unwrap();
        saga.saga_id
    }

    #[test]
    fn create_rejects_zero_steps() {
        let orch = SagaOrchestrator::new(Recorder::default());
        let err = orch
            .create("order", "corr", Vec::new(), HashMap::new())
            .unwrap_err();
        assert!(matches!(err, SagaError::Domain(DomainError::EmptySaga)));
    }

    #[tokio::test]
    async fn start_only_once() {
        let orch = SagaOrchestrator::new(Recorder::default());
        let id = started(&orch).await;
        assert!(matches!(
            orch.start(id).await,
            Err(SagaError::Domain(DomainError::InvalidTransition { .. }))
        ));
    }

    #[tokio::test]
    async fn happy_path_completes_and_retires() {
        let orch = SagaOrchestrator::new(Recorder::default());
        let id = started(&orch).await;
        for step in ["reserve", "notify", "charge", "ship"] {
            orch.complete_step(id, step).await.unwrap();
        }
        let done = orch.complete(id).await.unwrap();

        assert_eq!(done.status, SagaStatus::Completed);
        assert_eq!(done.current_step_index, 4);
        assert!(orch.get_active(id).await.is_none());
        assert_eq!(orch.get(id).await.unwrap().status, SagaStatus::Completed);
        assert!(matches!(orch.complete_step(id, "ship").await, Err(SagaError::NotFound(_))));
        assert!(orch.handler().calls().is_empty());
    }

    #[tokio::test]
    async fn failure_compensates_in_reverse_before_failing() {
        let orch = SagaOrchestrator::new(Recorder::default());
        let id = started(&orch).await;
        orch.complete_step(id, "reserve").await.unwrap();
        orch.complete_step(id, "notify").await.unwrap();
        orch.complete_step(id, "charge").await.unwrap();

        let saga = orch.fail_step(id, "ship", "carrier down").await.unwrap();

        // notify has no compensation; every call happened while compensating
        assert_eq!(
            orch.handler().calls(),
            vec![
                ("charge".to_string(), SagaStatus::Compensating),
                ("reserve".to_string(), SagaStatus::Compensating),
            ]
        );
        assert_eq!(saga.status, SagaStatus::Failed);
        assert_eq!(saga.step("reserve").unwrap().status, SagaStepStatus::Compensated);
        assert_eq!(saga.step("charge").unwrap().status, SagaStepStatus::Compensated);
        assert_eq!(saga.step("notify").unwrap().status, SagaStepStatus::Completed);
        assert_eq!(saga.step("ship").unwrap().status, SagaStepStatus::Failed);
        assert!(saga.error_message.unwrap().contains("carrier down"));
        assert_eq!(orch.list_completed().len(), 1);
    }

    #[tokio::test]
    async fn failing_a_completed_step_compensates_it() {
        let orch = SagaOrchestrator::new(Recorder::default());
        let saga = orch
            .create(
                "order",
                "corr-2",
                vec![
                    SagaStep::new("step1", "inventory", "reserve").with_compensation("undo1"),
                    SagaStep::new("step2", "billing", "charge").with_compensation("undo2"),
                ],
                HashMap::new(),
            )
            .unwrap();
        let id = saga.saga_id;
        orch.start(id).await.unwrap();
        orch.complete_step(id, "step1").await.unwrap();

        let saga = orch.fail_step(id, "step1", "late failure").await.unwrap();

        assert_eq!(
            orch.handler().calls(),
            vec![("step1".to_string(), SagaStatus::Compensating)]
        );
        assert_eq!(saga.step("step1").unwrap().status, SagaStepStatus::Compensated);
        assert_eq!(saga.step("step2").unwrap().status, SagaStepStatus::Pending);
        assert_eq!(saga.status, SagaStatus::Failed);
    }

    #[tokio::test]
    async fn failed_compensation_continues_with_rest() {
        let orch = SagaOrchestrator::new(Recorder::failing("charge"));
        let id = started(&orch).await;
        orch.complete_step(id, "reserve").await.unwrap();
        orch.complete_step(id, "charge").await.unwrap();

        let saga = orch.fail_step(id, "ship", "boom").await.unwrap();

        assert_eq!(orch.handler().calls().len(), 2);
        assert_eq!(
            saga.step("charge").unwrap().status,
            SagaStepStatus::CompensationFailed
        );
        assert_eq!(saga.step("reserve").unwrap().status, SagaStepStatus::Compensated);
        let message = saga.error_message.unwrap();
        assert!(message.contains("compensation failed for charge"));
        assert_eq!(saga.status, SagaStatus::Failed);
    }

    #[tokio::test]
    async fn abort_from_pending() {
        let orch = SagaOrchestrator::new(Recorder::default());
        let saga = orch.create("order", "corr", steps(), HashMap::new()).unwrap();
        let aborted = orch.abort(saga.saga_id, "operator").await.unwrap();
        assert_eq!(aborted.status, SagaStatus::Aborted);
        assert!(orch.list_active().await.is_empty());
        assert!(matches!(orch.abort(saga.saga_id, "again").await, Err(SagaError::NotFound(_))));
    }

    #[tokio::test]
    async fn stats_count_by_status() {
        let orch = SagaOrchestrator::new(Recorder::default());
        let a = started(&orch).await;
        started(&orch).await;
        orch.create("order", "corr", steps(), HashMap::new()).unwrap();
        orch.abort(a, "stop").await.unwrap();

        let stats = orch.stats().await;
        assert_eq!(stats.active, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.by_status[&SagaStatus::Started], 1);
        assert_eq!(stats.by_status[&SagaStatus::Pending], 1);
        assert_eq!(stats.by_status[&SagaStatus::Aborted], 1);
    }

    #[tokio::test]
    async fn transitions_are_published() {
        let bus = EventBus::new(32);
        let mut rx = bus.subscribe();
        let orch = SagaOrchestrator::new(Recorder::default()).with_event_bus(bus);
        let id = started(&orch).await;
        orch.complete_step(id, "reserve").await.unwrap();
        orch.fail_step(id, "notify", "x").await.unwrap();

        let mut statuses = Vec::new();
        let mut compensated = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                ConductorEvent::SagaTransitioned { status, .. } => statuses.push(status),
                ConductorEvent::StepCompensated { success, .. } => {
                    assert!(success);
                    compensated += 1;
                }
                _ => {}
            }
        }
        assert_eq!(
            statuses,
            vec![SagaStatus::Started, SagaStatus::Compensating, SagaStatus::Failed]
        );
        assert_eq!(compensated, 1);
    }
}
