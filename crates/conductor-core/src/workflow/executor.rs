//! Workflow executor: dynamic wave-based concurrent execution.
//!
//! Each round the executor computes the set of pending actions whose
//! dependencies all completed successfully, dispatches them concurrently on a
//! `JoinSet`, and waits for the whole wave before computing the next one.
//! When no action is ready but some remain, the remainder is unreachable and
//! is recorded `skipped`.
//!
//! # Per-action flow
//!
//! 1. Evaluate the guard against the wave-start snapshot (false -> skipped,
//!    error -> failure).
//! 2. Acquire a permit from the shared semaphore.
//! 3. Invoke through the `ActionInvoker`, raced against the cancellation
//!    token. The call is bounded by `timeout_seconds` for every allowed
//!    attempt plus the retry delays; per-attempt deadlines belong to
//!    `RetryingInvoker`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use conductor_types::action::{ActionResult, ActionStatus, WorkflowAction};
use conductor_types::event::ConductorEvent;
use conductor_types::execution::ExecutionStatus;
use conductor_types::workflow::Workflow;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::bus::EventBus;

use super::context::ExecutionContext;
use super::expression::GuardEvaluator;
use super::invoker::{ActionInvoker, InvocationContext, InvocationError, invocation_budget};

pub const DEFAULT_MAX_PARALLEL_ACTIONS: usize = 16;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Infrastructure faults only. Action failures are data in the outcome.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("action task failed to complete: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Identifiers threaded into every invocation.
#[derive(Debug, Clone, Default)]
pub struct ExecutionIds {
    pub execution_id: Uuid,
    pub correlation_id: Option<String>,
    pub trace_id: Option<String>,
}

/// Everything the owner of a `WorkflowExecution` needs to finish it.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub results: HashMap<String, ActionResult>,
    /// `Completed`, `Failed`, or `Cancelled`.
    pub status: ExecutionStatus,
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn result(&self, action_id: &str) -> Option<&ActionResult> {
        self.results.get(action_id)
    }

    pub fn count(&self, status: ActionStatus) -> usize {
        self.results.values().filter(|r| r.status() == status).count()
    }
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

pub struct WorkflowExecutor<I> {
    invoker: Arc<I>,
    permits: Arc<Semaphore>,
    events: Option<EventBus>,
}

impl<I: ActionInvoker + 'static> WorkflowExecutor<I> {
    /// `max_parallel_actions` bounds concurrent invocations (minimum 1).
    pub fn new(invoker: I, max_parallel_actions: usize) -> Self {
        Self {
            invoker: Arc::new(invoker),
            permits: Arc::new(Semaphore::new(max_parallel_actions.max(1))),
            events: None,
        }
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn invoker(&self) -> &I {
        &self.invoker
    }

    /// Run every action of `workflow` with already-resolved `parameters`.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        parameters: HashMap<String, Value>,
        ids: ExecutionIds,
        cancel: CancellationToken,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        tracing::info!(
            execution_id = %ids.execution_id,
            workflow = %workflow.name,
            actions = workflow.actions.len(),
            "starting workflow execution"
        );

        let parameters = Arc::new(parameters);
        let mut run = RunState {
            results: HashMap::new(),
            ctx: ExecutionContext::new(
                ids.execution_id,
                workflow.name.clone(),
                (*parameters).clone(),
            ),
            execution_id: ids.execution_id,
            events: self.events.as_ref(),
        };

        let mut pending: Vec<&WorkflowAction> = workflow.actions.iter().collect();
        let mut unreachable: Vec<String> = Vec::new();
        let mut wave = 0usize;

        while !pending.is_empty() {
            if cancel.is_cancelled() {
                for action in pending.drain(..) {
                    run.record(ActionResult::cancelled(&action.action_id, 0));
                }
                break;
            }

            let (ready, waiting): (Vec<&WorkflowAction>, Vec<&WorkflowAction>) = pending
                .into_iter()
                .partition(|a| dependencies_met(a, &run.results));

            if ready.is_empty() {
                let declared: HashSet<&str> =
                    workflow.actions.iter().map(|a| a.action_id.as_str()).collect();
                unreachable = run.skip_unreachable(waiting, &declared);
                break;
            }
            pending = waiting;

            tracing::debug!(
                execution_id = %ids.execution_id,
                wave,
                actions = ready.len(),
                "dispatching wave"
            );

            let snapshot = Arc::new(run.ctx.clone());
            let guards = evaluate_guards(&ready, &snapshot);
            let mut join_set = JoinSet::new();

            for (action, guard) in ready.into_iter().zip(guards) {
                match guard {
                    Guard::Run => {
                        let invoker = Arc::clone(&self.invoker);
                        let permits = Arc::clone(&self.permits);
                        let params = Arc::clone(&parameters);
                        let action = action.clone();
                        let ictx = InvocationContext {
                            execution_id: ids.execution_id,
                            correlation_id: ids.correlation_id.clone(),
                            trace_id: ids.trace_id.clone(),
                            snapshot: Arc::clone(&snapshot),
                            cancel: cancel.clone(),
                        };
                        join_set.spawn(run_action(invoker, permits, action, params, ictx));
                    }
                    Guard::Skip => run.record(ActionResult::skipped(
                        &action.action_id,
                        "guard condition evaluated to false",
                    )),
                    Guard::Error(msg) => run.record(ActionResult::failure(&action.action_id, msg, 0)),
                }
            }

            while let Some(joined) = join_set.join_next().await {
                run.record(joined?);
            }
            wave += 1;
        }

        let outcome = summarize(workflow, run.results, &unreachable, &cancel);
        tracing::info!(
            execution_id = %ids.execution_id,
            workflow = %workflow.name,
            status = %outcome.status,
            waves = wave,
            "workflow execution finished"
        );
        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

struct RunState<'a> {
    results: HashMap<String, ActionResult>,
    ctx: ExecutionContext,
    execution_id: Uuid,
    events: Option<&'a EventBus>,
}

impl RunState<'_> {
    fn record(&mut self, result: ActionResult) {
        tracing::debug!(
            execution_id = %self.execution_id,
            action_id = %result.action_id(),
            status = %result.status(),
            elapsed_ms = result.execution_time_ms(),
            "action finished"
        );
        if let Some(events) = self.events {
            events.publish(ConductorEvent::ActionFinished {
                execution_id: self.execution_id,
                action_id: result.action_id().to_string(),
                status: result.status(),
                duration_ms: result.execution_time_ms(),
            });
        }
        self.ctx.record(&result);
        self.results.insert(result.action_id().to_string(), result);
    }

    /// Skip everything that can no longer run. Actions behind a failed,
    /// skipped, or cancelled dependency are skipped first (transitively);
    /// whatever remains is blocked structurally (cycle or unknown
    /// dependency) and is returned.
    fn skip_unreachable(
        &mut self,
        mut waiting: Vec<&WorkflowAction>,
        declared: &HashSet<&str>,
    ) -> Vec<String> {
        loop {
            let before = waiting.len();
            let mut still_waiting = Vec::with_capacity(before);
            for action in waiting {
                let blocker = action.depends_on.iter().find_map(|dep| {
                    self.results
                        .get(dep)
                        .filter(|r| !r.is_successful())
                        .map(|r| (dep.clone(), r.status()))
                });
                match blocker {
                    Some((dep, status)) => self.record(ActionResult::skipped(
                        &action.action_id,
                        format!("dependency '{dep}' did not complete ({status})"),
                    )),
                    None => still_waiting.push(action),
                }
            }
            waiting = still_waiting;
            if waiting.len() == before {
                break;
            }
        }

        waiting
            .into_iter()
            .map(|action| {
                let reason = match action
                    .depends_on
                    .iter()
                    .find(|d| !declared.contains(d.as_str()))
                {
                    Some(dep) => format!("unknown dependency '{dep}'"),
                    None => "blocked by dependency cycle".to_string(),
                };
                tracing::warn!(
                    execution_id = %self.execution_id,
                    action_id = %action.action_id,
                    %reason,
                    "action unreachable"
                );
                self.record(ActionResult::skipped(&action.action_id, reason));
                action.action_id.clone()
            })
            .collect()
    }
}

fn dependencies_met(action: &WorkflowAction, results: &HashMap<String, ActionResult>) -> bool {
    action
        .depends_on
        .iter()
        .all(|dep| results.get(dep).is_some_and(ActionResult::is_successful))
}

#[derive(Debug, Clone)]
enum Guard {
    Run,
    Skip,
    Error(String),
}

/// Guards for one wave, all against the same snapshot.
fn evaluate_guards(actions: &[&WorkflowAction], snapshot: &ExecutionContext) -> Vec<Guard> {
    if actions.iter().all(|a| a.condition.is_none()) {
        return vec![Guard::Run; actions.len()];
    }

    let evaluator = GuardEvaluator::new();
    let ctx = snapshot.to_expression_context();
    actions
        .iter()
        .map(|action| match &action.condition {
            None => Guard::Run,
            Some(expr) => match evaluator.evaluate_bool(expr, &ctx) {
                Ok(true) => Guard::Run,
                Ok(false) => Guard::Skip,
                Err(e) => Guard::Error(e.to_string()),
            },
        })
        .collect()
}

async fn run_action<I: ActionInvoker>(
    invoker: Arc<I>,
    permits: Arc<Semaphore>,
    action: WorkflowAction,
    parameters: Arc<HashMap<String, Value>>,
    ctx: InvocationContext,
) -> ActionResult {
    let id = action.action_id.as_str();

    let _permit = tokio::select! {
        _ = ctx.cancel.cancelled() => return ActionResult::cancelled(id, 0),
        permit = permits.acquire_owned() => match permit {
            Ok(p) => p,
            Err(_) => return ActionResult::failure(id, "executor permit pool closed", 0),
        },
    };

    let started = Instant::now();
    let limit = invocation_budget(&action);
    let outcome = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => None,
        r = tokio::time::timeout(limit, invoker.invoke(&action, &parameters, &ctx)) => Some(r),
    };
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match outcome {
        None | Some(Ok(Err(InvocationError::Cancelled))) => ActionResult::cancelled(id, elapsed_ms),
        Some(Ok(Ok(output))) => ActionResult::success(id, output, elapsed_ms),
        Some(Ok(Err(e))) => ActionResult::failure(id, e.to_string(), elapsed_ms),
        Some(Err(_elapsed)) => ActionResult::failure(
            id,
            InvocationError::Timeout(limit.as_secs()).to_string(),
            elapsed_ms,
        ),
    }
}

fn summarize(
    workflow: &Workflow,
    results: HashMap<String, ActionResult>,
    unreachable: &[String],
    cancel: &CancellationToken,
) -> ExecutionOutcome {
    let any_cancelled = results
        .values()
        .any(|r| r.status() == ActionStatus::Cancelled);
    if cancel.is_cancelled() && any_cancelled {
        return ExecutionOutcome {
            results,
            status: ExecutionStatus::Cancelled,
            error: Some("execution cancelled".to_string()),
        };
    }

    let failed: Vec<&str> = workflow
        .actions
        .iter()
        .filter(|a| !a.continue_on_error)
        .filter(|a| {
            results
                .get(&a.action_id)
                .is_some_and(|r| r.status() == ActionStatus::Failed)
        })
        .map(|a| a.action_id.as_str())
        .collect();

    let mut problems = Vec::new();
    if !failed.is_empty() {
        problems.push(format!("actions failed: {}", failed.join(", ")));
    }
    if !unreachable.is_empty() {
        problems.push(format!("actions unreachable: {}", unreachable.join(", ")));
    }

    if problems.is_empty() {
        ExecutionOutcome {
            results,
            status: ExecutionStatus::Completed,
            error: None,
        }
    } else {
        ExecutionOutcome {
            results,
            status: ExecutionStatus::Failed,
            error: Some(problems.join("; ")),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_types::action::ActionType;
    use conductor_types::parameter::{ParameterType, WorkflowParameter};
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::workflow::invoker::RetryingInvoker;

    /// Fake invoker: fails listed actions, sleeps for listed delays, and
    /// reports which prior outputs it could see.
    #[derive(Default)]
    struct Scripted {
        fail: HashSet<String>,
        delays: HashMap<String, Duration>,
        calls: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl Scripted {
        fn failing(ids: &[&str]) -> Self {
            Self {
                fail: ids.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }
        }

        fn slow(ids: &[&str], secs: u64) -> Self {
            Self {
                delays: ids
                    .iter()
                    .map(|s| (s.to_string(), Duration::from_secs(secs)))
                    .collect(),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ActionInvoker for Scripted {
        async fn invoke(
            &self,
            action: &WorkflowAction,
            parameters: &HashMap<String, Value>,
            context: &InvocationContext,
        ) -> Result<Value, InvocationError> {
            self.calls.lock().unwrap().push(action.action_id.clone());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if let Some(delay) = self.delays.get(&action.action_id) {
                tokio::time::sleep(*delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail.contains(&action.action_id) {
                return Err(InvocationError::Service {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            let mut seen: Vec<&String> = context.snapshot.outputs().keys().collect();
            seen.sort();
            Ok(json!({
                "action": action.action_id,
                "seen": seen,
                "name": parameters.get("name"),
            }))
        }
    }

    fn service_call(id: &str, deps: &[&str]) -> WorkflowAction {
        WorkflowAction::new(id, ActionType::ServiceCall)
            .with_config("service", json!("users"))
            .with_config("endpoint", json!("/run"))
            .depends_on(deps.iter().copied())
    }

    fn two_step() -> Workflow {
        let mut wf = Workflow::new("two-step", "alice");
        wf.parameters
            .push(WorkflowParameter::required("name", ParameterType::String));
        wf.actions = vec![
            service_call("action1", &[]),
            service_call("action2", &["action1"]),
        ];
        wf
    }

    fn params() -> HashMap<String, Value> {
        HashMap::from([("name".to_string(), json!("x"))])
    }

    async fn run(executor: &WorkflowExecutor<Scripted>, wf: &Workflow) -> ExecutionOutcome {
        executor
            .execute(wf, params(), ExecutionIds::default(), CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn chained_actions_complete_in_order() {
        let executor = WorkflowExecutor::new(Scripted::default(), 4);
        let outcome = run(&executor, &two_step()).await;

        assert_eq!(outcome.status, ExecutionStatus::Completed);
        assert!(outcome.error.is_none());
        assert_eq!(outcome.results.len(), 2);
        for id in ["action1", "action2"] {
            assert_eq!(outcome.result(id).unwrap().status(), ActionStatus::Completed);
        }
        // action2 ran after action1's output was recorded
        let out2 = outcome.result("action2").unwrap().output().unwrap();
        assert_eq!(out2["seen"], json!(["action1"]));
        assert_eq!(out2["name"], json!("x"));
        assert_eq!(executor.invoker().calls(), vec!["action1", "action2"]);
    }

    #[tokio::test]
    async fn failed_dependency_skips_dependent() {
        let executor = WorkflowExecutor::new(Scripted::failing(&["action1"]), 4);
        let outcome = run(&executor, &two_step()).await;

        assert_eq!(outcome.status, ExecutionStatus::Failed);
        assert_eq!(outcome.result("action1").unwrap().status(), ActionStatus::Failed);
        let skipped = outcome.result("action2").unwrap();
        assert_eq!(skipped.status(), ActionStatus::Skipped);
        assert!(skipped.error_message().unwrap().contains("action1"));
        assert!(outcome.error.unwrap().contains("action1"));
        assert_eq!(executor.invoker().calls(), vec!["action1"]);
    }

    #[tokio::test]
    async fn skips_propagate_transitively() {
        let mut wf = two_step();
        wf.actions.push(service_call("action3", &["action2"]));
        let executor = WorkflowExecutor::new(Scripted::failing(&["action1"]), 4);
        let outcome = run(&executor, &wf).await;

        let third = outcome.result("action3").unwrap();
        assert_eq!(third.status(), ActionStatus::Skipped);
        assert!(third.error_message().unwrap().contains("action2"));
        assert_eq!(outcome.error.as_deref(), Some("actions failed: action1"));
    }

    #[tokio::test]
    async fn continue_on_error_keeps_run_completed() {
        let mut wf = two_step();
        wf.actions[0].continue_on_error = true;
        wf.actions.push(service_call("independent", &[]));
        let executor = WorkflowExecutor::new(Scripted::failing(&["action1"]), 4);
        let outcome = run(&executor, &wf).await;

        assert_eq!(outcome.status, ExecutionStatus::Completed);
        assert_eq!(outcome.count(ActionStatus::Failed), 1);
        assert_eq!(outcome.result("action2").unwrap().status(), ActionStatus::Skipped);
        assert_eq!(
            outcome.result("independent").unwrap().status(),
            ActionStatus::Completed
        );
    }

    #[tokio::test]
    async fn guards_skip_or_run() {
        let mut wf = two_step();
        wf.actions[1] = service_call("action2", &["action1"])
            .with_condition("actions.action1.output.action == 'action1'");
        wf.actions.push(
            service_call("never", &["action1"]).with_condition("parameters.name == 'y'"),
        );
        let executor = WorkflowExecutor::new(Scripted::default(), 4);
        let outcome = run(&executor, &wf).await;

        assert_eq!(outcome.status, ExecutionStatus::Completed);
        assert_eq!(outcome.result("action2").unwrap().status(), ActionStatus::Completed);
        assert_eq!(outcome.result("never").unwrap().status(), ActionStatus::Skipped);
        assert!(!executor.invoker().calls().contains(&"never".to_string()));
    }

    #[tokio::test]
    async fn guard_error_is_failure() {
        let mut wf = two_step();
        wf.actions[0] = service_call("action1", &[]).with_condition("(parameters.name == 'x'");
        let executor = WorkflowExecutor::new(Scripted::default(), 4);
        let outcome = run(&executor, &wf).await;

        assert_eq!(outcome.result("action1").unwrap().status(), ActionStatus::Failed);
        assert_eq!(outcome.status, ExecutionStatus::Failed);
        assert!(executor.invoker().calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_records_failure() {
        let mut wf = two_step();
        wf.actions[0].timeout_seconds = 1;
        let executor = WorkflowExecutor::new(Scripted::slow(&["action1"], 30), 4);
        let outcome = run(&executor, &wf).await;

        let first = outcome.result("action1").unwrap();
        assert_eq!(first.status(), ActionStatus::Failed);
        assert!(first.error_message().unwrap().contains("timed out"));
        assert_eq!(outcome.result("action2").unwrap().status(), ActionStatus::Skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_action_does_not_block_siblings() {
        let mut wf = Workflow::new("siblings", "alice");
        let mut hung = service_call("hung", &[]);
        hung.timeout_seconds = 5;
        wf.actions = vec![hung, service_call("fast", &[]), service_call("after_fast", &["fast"])];
        let executor = WorkflowExecutor::new(Scripted::slow(&["hung"], 60), 4);
        let outcome = run(&executor, &wf).await;

        assert_eq!(outcome.result("fast").unwrap().status(), ActionStatus::Completed);
        assert_eq!(
            outcome.result("after_fast").unwrap().status(),
            ActionStatus::Completed
        );
        assert_eq!(outcome.result("hung").unwrap().status(), ActionStatus::Failed);
    }

    #[tokio::test]
    async fn cycle_marks_actions_skipped_and_fails() {
        let mut wf = Workflow::new("cyclic", "alice");
        wf.actions = vec![
            service_call("root", &[]),
            service_call("a", &["b"]),
            service_call("b", &["a"]),
        ];
        let executor = WorkflowExecutor::new(Scripted::default(), 4);
        let outcome = run(&executor, &wf).await;

        assert_eq!(outcome.result("root").unwrap().status(), ActionStatus::Completed);
        for id in ["a", "b"] {
            let r = outcome.result(id).unwrap();
            assert_eq!(r.status(), ActionStatus::Skipped);
            assert!(r.error_message().unwrap().contains("cycle"));
        }
        assert_eq!(outcome.status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn pre_cancelled_run_dispatches_nothing() {
        let executor = WorkflowExecutor::new(Scripted::default(), 4);
        let token = CancellationToken::new();
        token.cancel();
        let outcome = executor
            .execute(&two_step(), params(), ExecutionIds::default(), token)
            .await
            .unwrap();

        assert_eq!(outcome.status, ExecutionStatus::Cancelled);
        assert_eq!(outcome.count(ActionStatus::Cancelled), 2);
        assert!(executor.invoker().calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_in_flight_call() {
        let executor = WorkflowExecutor::new(Scripted::slow(&["action1"], 120), 4);
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let outcome = executor
            .execute(&two_step(), params(), ExecutionIds::default(), token)
            .await
            .unwrap();

        assert_eq!(outcome.status, ExecutionStatus::Cancelled);
        assert_eq!(outcome.result("action1").unwrap().status(), ActionStatus::Cancelled);
        assert_eq!(outcome.result("action2").unwrap().status(), ActionStatus::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_bounded_by_semaphore() {
        let mut wf = Workflow::new("fan-out", "alice");
        wf.actions = (0..6).map(|i| service_call(&format!("a{i}"), &[])).collect();
        let ids: Vec<String> = (0..6).map(|i| format!("a{i}")).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let executor = WorkflowExecutor::new(Scripted::slow(&refs, 2), 2);
        let outcome = run(&executor, &wf).await;

        assert_eq!(outcome.count(ActionStatus::Completed), 6);
        assert_eq!(executor.invoker().max_in_flight.load(Ordering::SeqCst), 2);
    }

    /// Hangs on its first call and answers every later one.
    #[derive(Default)]
    struct StallsOnce {
        calls: AtomicUsize,
    }

    impl ActionInvoker for StallsOnce {
        async fn invoke(
            &self,
            _action: &WorkflowAction,
            _parameters: &HashMap<String, Value>,
            _context: &InvocationContext,
        ) -> Result<Value, InvocationError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_secs(600)).await;
            }
            Ok(json!({ "ok": true }))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_hung_attempt_completes_action() {
        let mut wf = Workflow::new("stall", "alice");
        let mut action = service_call("reserve", &[]);
        action.retry_count = 2;
        action.timeout_seconds = 5;
        wf.actions = vec![action];
        let executor = WorkflowExecutor::new(RetryingInvoker::new(StallsOnce::default()), 4);

        let outcome = executor
            .execute(&wf, params(), ExecutionIds::default(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, ExecutionStatus::Completed);
        assert_eq!(outcome.result("reserve").unwrap().status(), ActionStatus::Completed);
        assert_eq!(executor.invoker().inner().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn action_events_published() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let executor = WorkflowExecutor::new(Scripted::default(), 4).with_event_bus(bus);
        run(&executor, &two_step()).await;

        let mut finished = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, ConductorEvent::ActionFinished { .. }) {
                finished += 1;
            }
        }
        assert_eq!(finished, 2);
    }
}
