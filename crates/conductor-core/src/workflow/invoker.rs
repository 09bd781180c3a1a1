//! Action invocation port.
//!
//! The executor reaches the outside world only through `ActionInvoker`.
//! Retrying is the invoker's contract: wrap any invoker in `RetryingInvoker`
//! to honor an action's `retry_count` and `retry_delay_seconds`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use conductor_types::action::WorkflowAction;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::context::ExecutionContext;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvocationError {
    /// Network-level failure reaching the target.
    #[error("transport error: {0}")]
    Transport(String),

    /// The target answered with a failure status.
    #[error("service returned {status}: {body}")]
    Service { status: u16, body: String },

    /// The action's config cannot be used (missing service, bad method, ...).
    #[error("invalid action config: {0}")]
    Config(String),

    #[error("action type '{0}' is not supported by this invoker")]
    Unsupported(String),

    #[error("invocation timed out after {0}s")]
    Timeout(u64),

    #[error("invocation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl InvocationError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            InvocationError::Transport(_)
            | InvocationError::Timeout(_)
            | InvocationError::Other(_) => true,
            InvocationError::Service { status, .. } => *status >= 500 || *status == 429,
            InvocationError::Config(_)
            | InvocationError::Unsupported(_)
            | InvocationError::Cancelled => false,
        }
    }
}

// ---------------------------------------------------------------------------
// InvocationContext
// ---------------------------------------------------------------------------

/// Everything an invocation may need besides the action and its parameters.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub execution_id: Uuid,
    pub correlation_id: Option<String>,
    pub trace_id: Option<String>,
    /// Outputs of earlier waves, as seen at the start of this wave.
    pub snapshot: Arc<ExecutionContext>,
    pub cancel: CancellationToken,
}

impl InvocationContext {
    pub fn prior_output(&self, action_id: &str) -> Option<&Value> {
        self.snapshot.output(action_id)
    }
}

// ---------------------------------------------------------------------------
// ActionInvoker trait
// ---------------------------------------------------------------------------

/// Performs one action.
///
/// Uses RPITIT (return-position `impl Trait` in traits) for async methods,
/// consistent with the repository traits.
pub trait ActionInvoker: Send + Sync {
    fn invoke(
        &self,
        action: &WorkflowAction,
        parameters: &HashMap<String, Value>,
        context: &InvocationContext,
    ) -> impl std::future::Future<Output = Result<Value, InvocationError>> + Send;
}

impl<T: ActionInvoker> ActionInvoker for Arc<T> {
    async fn invoke(
        &self,
        action: &WorkflowAction,
        parameters: &HashMap<String, Value>,
        context: &InvocationContext,
    ) -> Result<Value, InvocationError> {
        (**self).invoke(action, parameters, context).await
    }
}

// ---------------------------------------------------------------------------
// RetryingInvoker
// ---------------------------------------------------------------------------

/// Longest time a full retry sequence for `action` may take: every attempt
/// running to `timeout_seconds` plus every delay between them.
pub fn invocation_budget(action: &WorkflowAction) -> Duration {
    let attempts = u64::from(action.retry_count).saturating_add(1);
    let secs = action
        .timeout_seconds
        .saturating_mul(attempts)
        .saturating_add(action.retry_delay_seconds.saturating_mul(attempts - 1));
    Duration::from_secs(secs)
}

/// Retries retryable failures up to `action.retry_count` extra times, waiting
/// `action.retry_delay_seconds` between attempts. Waits are cancellable.
///
/// Each attempt is bounded by `action.timeout_seconds`; an attempt that runs
/// past it fails with `InvocationError::Timeout` and is retried like any
/// other retryable failure.
pub struct RetryingInvoker<I> {
    inner: I,
}

impl<I: ActionInvoker> RetryingInvoker<I> {
    pub fn new(inner: I) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &I {
        &self.inner
    }
}

impl<I: ActionInvoker> ActionInvoker for RetryingInvoker<I> {
    async fn invoke(
        &self,
        action: &WorkflowAction,
        parameters: &HashMap<String, Value>,
        context: &InvocationContext,
    ) -> Result<Value, InvocationError> {
        let max_attempts = action.retry_count.saturating_add(1);
        let delay = Duration::from_secs(action.retry_delay_seconds);
        let limit = Duration::from_secs(action.timeout_seconds);
        let mut attempt = 1;

        loop {
            let result = tokio::time::timeout(limit, self.inner.invoke(action, parameters, context))
                .await
                .unwrap_or(Err(InvocationError::Timeout(action.timeout_seconds)));
            match result {
                Ok(output) => return Ok(output),
                Err(e) if attempt < max_attempts && e.is_retryable() => {
                    tracing::warn!(
                        execution_id = %context.execution_id,
                        action_id = %action.action_id,
                        attempt,
                        max_attempts,
                        error = %e,
                        "action invocation failed, retrying"
                    );
                    tokio::select! {
                        _ = context.cancel.cancelled() => return Err(InvocationError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
