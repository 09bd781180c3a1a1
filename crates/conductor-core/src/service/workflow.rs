//! Workflow use cases: definition lifecycle and execution.
//!
//! Definition and resolution errors are returned before an execution record
//! exists. Once an execution is persisted, this service is its only writer:
//! it starts the record, runs the executor, applies the terminal transition,
//! and persists the result.

use std::collections::HashMap;

use conductor_types::error::{DomainError, RepositoryError};
use conductor_types::event::ConductorEvent;
use conductor_types::execution::{ExecutionStatus, WorkflowExecution};
use conductor_types::workflow::{Workflow, WorkflowStatus};
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::bus::EventBus;
use crate::repository::execution::{ExecutionFilter, ExecutionRepository};
use crate::repository::workflow::{WorkflowFilter, WorkflowRepository};
use crate::workflow::executor::{ExecutionIds, ExecutorError, WorkflowExecutor};
use crate::workflow::invoker::ActionInvoker;
use crate::workflow::resolver::{self, ResolutionError};
use crate::workflow::validator::{self, ValidationReport};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("workflow is invalid: {0}")]
    Validation(ValidationReport),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    #[error("workflow '{name}' is {status} and cannot be executed")]
    NotExecutable { name: String, status: WorkflowStatus },
}

/// Input for one execution.
#[derive(Debug, Clone, Default)]
pub struct ExecuteRequest {
    pub parameters: HashMap<String, Value>,
    /// Fallback values consulted after provided values and defaults.
    pub context: Option<HashMap<String, Value>>,
    pub correlation_id: Option<String>,
    pub trace_id: Option<String>,
}

impl ExecuteRequest {
    pub fn with_parameters(parameters: HashMap<String, Value>) -> Self {
        Self {
            parameters,
            ..Default::default()
        }
    }
}

/// Generic over the repository ports and the action invoker so core never
/// depends on `conductor-infra`.
pub struct WorkflowService<W, E, I> {
    workflows: W,
    executions: E,
    executor: WorkflowExecutor<I>,
    events: EventBus,
    running: DashMap<Uuid, CancellationToken>,
}

impl<W, E, I> WorkflowService<W, E, I>
where
    W: WorkflowRepository,
    E: ExecutionRepository,
    I: ActionInvoker + 'static,
{
    pub fn new(workflows: W, executions: E, executor: WorkflowExecutor<I>, events: EventBus) -> Self {
        Self {
            workflows,
            executions,
            executor,
            events,
            running: DashMap::new(),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // -- Definitions --

    /// Validate, then persist. Invalid workflows are never stored.
    pub async fn create(&self, workflow: Workflow) -> Result<Workflow, ServiceError> {
        let report = validator::validate(&workflow);
        if !report.ok {
            tracing::warn!(workflow = %workflow.name, errors = report.errors.len(), "workflow rejected");
            return Err(ServiceError::Validation(report));
        }
        self.workflows.save(&workflow).await?;
        tracing::info!(workflow_id = %workflow.id, workflow = %workflow.name, "workflow created");
        Ok(workflow)
    }

    pub async fn get(&self, id: Uuid) -> Result<Workflow, ServiceError> {
        self.workflows
            .get(&id)
            .await?
            .ok_or(ServiceError::WorkflowNotFound(id))
    }

    pub async fn list(
        &self,
        filter: &WorkflowFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Workflow>, ServiceError> {
        Ok(self.workflows.list(filter, limit, offset).await?)
    }

    pub async fn activate(&self, id: Uuid) -> Result<Workflow, ServiceError> {
        self.transition(id, Workflow::activate).await
    }

    pub async fn deprecate(&self, id: Uuid) -> Result<Workflow, ServiceError> {
        self.transition(id, Workflow::deprecate).await
    }

    pub async fn archive(&self, id: Uuid) -> Result<Workflow, ServiceError> {
        self.transition(id, Workflow::archive).await
    }

    async fn transition(
        &self,
        id: Uuid,
        apply: fn(&mut Workflow) -> Result<(), DomainError>,
    ) -> Result<Workflow, ServiceError> {
        let mut workflow = self.get(id).await?;
        apply(&mut workflow)?;
        self.workflows.update(&workflow).await?;
        tracing::info!(workflow_id = %id, status = %workflow.status, "workflow status changed");
        Ok(workflow)
    }

    // -- Executions --

    /// Run an active workflow to completion and return the finished record.
    ///
    /// Action failures do not make this return `Err`; they are reported in
    /// the execution's status, results, and error message.
    pub async fn execute(
        &self,
        workflow_id: Uuid,
        request: ExecuteRequest,
    ) -> Result<WorkflowExecution, ServiceError> {
        let workflow = self.get(workflow_id).await?;
        if !workflow.status.is_executable() {
            return Err(ServiceError::NotExecutable {
                name: workflow.name,
                status: workflow.status,
            });
        }
        let report = validator::validate(&workflow);
        if !report.ok {
            return Err(ServiceError::Validation(report));
        }
        let resolved = resolver::resolve(&workflow, &request.parameters, request.context.as_ref())?;

        let mut execution = WorkflowExecution::new(workflow.id, resolved.clone())
            .with_correlation(request.correlation_id, request.trace_id);
        execution.start()?;
        self.executions.save(&execution).await?;

        let execution_id = execution.execution_id;
        let token = CancellationToken::new();
        self.running.insert(execution_id, token.clone());
        self.events.publish(ConductorEvent::ExecutionStarted {
            execution_id,
            workflow_id: workflow.id,
            workflow_name: workflow.name.clone(),
            correlation_id: execution.correlation_id.clone(),
        });

        let ids = ExecutionIds {
            execution_id,
            correlation_id: execution.correlation_id.clone(),
            trace_id: execution.trace_id.clone(),
        };
        let outcome = self.executor.execute(&workflow, resolved, ids, token).await;
        self.running.remove(&execution_id);

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(execution_id = %execution_id, error = %e, "executor fault");
                execution.fail(e.to_string())?;
                self.executions.update(&execution).await?;
                self.publish_finished(&execution);
                return Err(e.into());
            }
        };

        execution.record_results(outcome.results.into_values())?;
        match outcome.status {
            ExecutionStatus::Completed => execution.complete()?,
            ExecutionStatus::Cancelled => execution.cancel()?,
            _ => execution.fail(
                outcome
                    .error
                    .unwrap_or_else(|| "workflow execution failed".to_string()),
            )?,
        }
        self.executions.update(&execution).await?;
        self.publish_finished(&execution);
        Ok(execution)
    }

    /// Cancel an execution. In-flight runs in this process are signalled and
    /// finish as `cancelled`; a persisted non-terminal record with no live
    /// run is cancelled directly.
    pub async fn cancel(&self, execution_id: Uuid) -> Result<(), ServiceError> {
        if let Some(token) = self.running.get(&execution_id) {
            tracing::info!(execution_id = %execution_id, "cancelling running execution");
            token.cancel();
            return Ok(());
        }

        let mut execution = self
            .executions
            .get(&execution_id)
            .await?
            .ok_or(ServiceError::ExecutionNotFound(execution_id))?;
        execution.cancel()?;
        self.executions.update(&execution).await?;
        self.publish_finished(&execution);
        Ok(())
    }

    pub async fn execution(&self, execution_id: Uuid) -> Result<WorkflowExecution, ServiceError> {
        self.executions
            .get(&execution_id)
            .await?
            .ok_or(ServiceError::ExecutionNotFound(execution_id))
    }

    pub async fn executions(
        &self,
        filter: &ExecutionFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<WorkflowExecution>, ServiceError> {
        Ok(self.executions.list(filter, limit, offset).await?)
    }

    /// IDs of executions currently running in this process.
    pub fn running_executions(&self) -> Vec<Uuid> {
        self.running.iter().map(|e| *e.key()).collect()
    }

    fn publish_finished(&self, execution: &WorkflowExecution) {
        let execution_id = execution.execution_id;
        let workflow_id = execution.workflow_id;
        let event = match execution.status {
            ExecutionStatus::Completed => {
                let actions_completed = execution
                    .results
                    .values()
                    .filter(|r| r.is_successful())
                    .count() as u32;
                ConductorEvent::ExecutionCompleted {
                    execution_id,
                    workflow_id,
                    actions_completed,
                }
            }
            ExecutionStatus::Cancelled => ConductorEvent::ExecutionCancelled {
                execution_id,
                workflow_id,
            },
            _ => ConductorEvent::ExecutionFailed {
                execution_id,
                workflow_id,
                error: execution.error_message.clone().unwrap_or_default(),
            },
        };
        tracing::info!(
            execution_id = %execution_id,
            status = %execution.status,
            duration_ms = execution.duration_ms(),
            "execution finished"
        );
        self.events.publish(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::invoker::{InvocationContext, InvocationError};
    use conductor_types::action::{ActionStatus, ActionType, WorkflowAction};
    use conductor_types::parameter::{ParameterType, WorkflowParameter};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    // -- Fakes --

    #[derive(Default)]
    struct MemWorkflows(DashMap<Uuid, Workflow>);

    impl WorkflowRepository for MemWorkflows {
        async fn save(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
            self.0.insert(workflow.id, workflow.clone());
            Ok(())
        }
        async fn get(&self, id: &Uuid) -> Result<Option<Workflow>, RepositoryError> {
            Ok(self.0.get(id).map(|w| w.clone()))
        }
        async fn list(
            &self,
            filter: &WorkflowFilter,
            limit: usize,
            offset: usize,
        ) -> Result<Vec<Workflow>, RepositoryError> {
            Ok(self
                .0
                .iter()
                .filter(|w| filter.matches(w.value()))
                .map(|w| w.clone())
                .skip(offset)
                .take(limit)
                .collect())
        }
        async fn update(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
            self.0.insert(workflow.id, workflow.clone());
            Ok(())
        }
        async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
            Ok(self.0.remove(id).is_some())
        }
    }

    #[derive(Default)]
    struct MemExecutions(DashMap<Uuid, WorkflowExecution>);

    impl ExecutionRepository for MemExecutions {
        async fn save(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
            self.0.insert(execution.execution_id, execution.clone());
            Ok(())
        }
        async fn get(&self, id: &Uuid) -> Result<Option<WorkflowExecution>, RepositoryError> {
            Ok(self.0.get(id).map(|e| e.clone()))
        }
        async fn list(
            &self,
            filter: &ExecutionFilter,
            limit: usize,
            offset: usize,
        ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
            Ok(self
                .0
                .iter()
                .filter(|e| filter.matches(e.value()))
                .map(|e| e.clone())
                .skip(offset)
                .take(limit)
                .collect())
        }
        async fn update(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
            self.0.insert(execution.execution_id, execution.clone());
            Ok(())
        }
        async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
            Ok(self.0.remove(id).is_some())
        }
    }

    /// Echoes its parameters; `slow` actions sleep first, `fail` actions error.
    struct Echo {
        fail: Option<&'static str>,
        slow: Option<&'static str>,
    }

    impl ActionInvoker for Echo {
        async fn invoke(
            &self,
            action: &WorkflowAction,
            parameters: &HashMap<String, Value>,
            _context: &InvocationContext,
        ) -> Result<Value, InvocationError> {
            if self.slow == Some(action.action_id.as_str()) {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if self.fail == Some(action.action_id.as_str()) {
                return Err(InvocationError::Transport("connection refused".into()));
            }
            Ok(json!({ "echo": parameters }))
        }
    }

    type Service = WorkflowService<MemWorkflows, MemExecutions, Echo>;

    fn service(fail: Option<&'static str>, slow: Option<&'static str>) -> Service {
        let bus = EventBus::new(64);
        let executor = WorkflowExecutor::new(Echo { fail, slow }, 4).with_event_bus(bus.clone());
        WorkflowService::new(MemWorkflows::default(), MemExecutions::default(), executor, bus)
    }

    fn order_workflow() -> Workflow {
        let mut wf = Workflow::new("order", "alice");
        wf.parameters
            .push(WorkflowParameter::required("name", ParameterType::String));
        for (id, deps) in [("action1", vec![]), ("action2", vec!["action1"])] {
            wf.actions.push(
                WorkflowAction::new(id, ActionType::ServiceCall)
                    .with_config("service", json!("orders"))
                    .with_config("endpoint", json!("/x"))
                    .depends_on(deps),
            );
        }
        wf
    }

    fn request() -> ExecuteRequest {
        ExecuteRequest::with_parameters(HashMap::from([("name".to_string(), json!("x"))]))
    }

    async fn active(svc: &Service) -> Uuid {
        let wf = svc.create(order_workflow()).await.unwrap();
        svc.activate(wf.id).await.unwrap();
        wf.id
    }

    #[tokio::test]
    async fn invalid_workflow_is_not_stored() {
        let svc = service(None, None);
        let mut wf = order_workflow();
        wf.actions[1].depends_on = vec!["ghost".into()];
        let id = wf.id;

        assert!(matches!(svc.create(wf).await, Err(ServiceError::Validation(_))));
        assert!(matches!(svc.get(id).await, Err(ServiceError::WorkflowNotFound(_))));
    }

    #[tokio::test]
    async fn draft_cannot_execute() {
        let svc = service(None, None);
        let wf = svc.create(order_workflow()).await.unwrap();
        assert!(matches!(
            svc.execute(wf.id, request()).await,
            Err(ServiceError::NotExecutable { .. })
        ));
    }

    #[tokio::test]
    async fn execution_completes_and_persists() {
        let svc = service(None, None);
        let id = active(&svc).await;
        let mut rx = svc.events().subscribe();

        let execution = svc.execute(id, request()).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.results.len(), 2);
        assert!(execution.completed_at.is_some());
        let stored = svc.execution(execution.execution_id).await.unwrap();
        assert_eq!(stored, execution);

        let mut saw_completed = false;
        while let Ok(event) = rx.try_recv() {
            if let ConductorEvent::ExecutionCompleted { actions_completed, .. } = event {
                assert_eq!(actions_completed, 2);
                saw_completed = true;
            }
        }
        assert!(saw_completed);
    }

    #[tokio::test]
    async fn action_failure_fails_execution_not_call() {
        let svc = service(Some("action1"), None);
        let id = active(&svc).await;

        let execution = svc.execute(id, request()).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.results["action2"].status(), ActionStatus::Skipped);
        assert!(execution.error_message.unwrap().contains("action1"));
    }

    #[tokio::test]
    async fn missing_parameter_creates_no_execution() {
        let svc = service(None, None);
        let id = active(&svc).await;

        let err = svc.execute(id, ExecuteRequest::default()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Resolution(ResolutionError::MissingRequired(_))));
        let all = svc
            .executions(&ExecutionFilter::for_workflow(id), 10, 0)
            .await
            .unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_running_execution() {
        let svc = Arc::new(service(None, Some("action1")));
        let id = active(&svc).await;

        let runner = Arc::clone(&svc);
        let handle = tokio::spawn(async move { runner.execute(id, request()).await });
        tokio::time::sleep(Duration::from_secs(1)).await;

        let running = svc.running_executions();
        assert_eq!(running.len(), 1);
        svc.cancel(running[0]).await.unwrap();

        let execution = handle.await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Cancelled);
        assert!(svc.running_executions().is_empty());
        assert!(matches!(
            svc.cancel(execution.execution_id).await,
            Err(ServiceError::Domain(DomainError::Terminal(_)))
        ));
    }

    #[tokio::test]
    async fn lifecycle_transitions_persist() {
        let svc = service(None, None);
        let id = active(&svc).await;
        assert_eq!(svc.deprecate(id).await.unwrap().status, WorkflowStatus::Deprecated);
        assert_eq!(svc.archive(id).await.unwrap().status, WorkflowStatus::Archived);
        assert_eq!(svc.get(id).await.unwrap().status, WorkflowStatus::Archived);

        let filter = WorkflowFilter {
            status: Some(WorkflowStatus::Archived),
            ..Default::default()
        };
        assert_eq!(svc.list(&filter, 10, 0).await.unwrap().len(), 1);
    }
}
