//! Workflow actions and their per-execution results.
//!
//! A `WorkflowAction` is one node of the workflow dependency graph. An
//! `ActionResult` records what happened when the executor processed that node
//! during one execution.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default per-action timeout (5 minutes).
pub const DEFAULT_ACTION_TIMEOUT_SECS: u64 = 300;

/// Default delay between invocation retries.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 1;

// ---------------------------------------------------------------------------
// ActionType
// ---------------------------------------------------------------------------

/// The kind of work an action performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    ServiceCall,
    PromptExecution,
    ConditionalBranch,
    Loop,
    Wait,
    TransformData,
    Notification,
    ExternalApiCall,
}

impl ActionType {
    /// Configuration keys that must be present for this action type.
    pub fn required_config_keys(&self) -> &'static [&'static str] {
        match self {
            ActionType::ServiceCall => &["service", "endpoint"],
            ActionType::PromptExecution => &["prompt_id"],
            ActionType::ExternalApiCall => &["url", "method"],
            _ => &[],
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionType::ServiceCall => "service_call",
            ActionType::PromptExecution => "prompt_execution",
            ActionType::ConditionalBranch => "conditional_branch",
            ActionType::Loop => "loop",
            ActionType::Wait => "wait",
            ActionType::TransformData => "transform_data",
            ActionType::Notification => "notification",
            ActionType::ExternalApiCall => "external_api_call",
        };
        f.write_str(s)
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "service_call" => Ok(ActionType::ServiceCall),
            "prompt_execution" => Ok(ActionType::PromptExecution),
            "conditional_branch" => Ok(ActionType::ConditionalBranch),
            "loop" => Ok(ActionType::Loop),
            "wait" => Ok(ActionType::Wait),
            "transform_data" => Ok(ActionType::TransformData),
            "notification" => Ok(ActionType::Notification),
            "external_api_call" => Ok(ActionType::ExternalApiCall),
            other => Err(format!("invalid action type: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowAction
// ---------------------------------------------------------------------------

fn default_timeout_seconds() -> u64 {
    DEFAULT_ACTION_TIMEOUT_SECS
}

fn default_retry_delay_seconds() -> u64 {
    DEFAULT_RETRY_DELAY_SECS
}

/// A unit of work in a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowAction {
    /// Unique within a workflow.
    pub action_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    /// Type-specific configuration (e.g. `service` + `endpoint` for service calls).
    #[serde(default)]
    pub config: HashMap<String, Value>,
    /// Action IDs that must complete successfully before this one runs.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Invocation retries after the first attempt.
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Guard expression; the action is skipped when it evaluates false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Action to consult when this one fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<String>,
    /// A failure of this action does not fail the whole execution.
    #[serde(default)]
    pub continue_on_error: bool,
}

impl WorkflowAction {
    /// Create an action with default retry/timeout policy and no dependencies.
    pub fn new(action_id: impl Into<String>, action_type: ActionType) -> Self {
        let action_id = action_id.into();
        Self {
            name: action_id.clone(),
            action_id,
            action_type,
            config: HashMap::new(),
            depends_on: Vec::new(),
            retry_count: 0,
            retry_delay_seconds: DEFAULT_RETRY_DELAY_SECS,
            timeout_seconds: DEFAULT_ACTION_TIMEOUT_SECS,
            condition: None,
            on_error: None,
            continue_on_error: false,
        }
    }

    /// Builder-style config entry.
    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// Builder-style dependency list.
    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Builder-style guard condition.
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Read a string config value.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }

    /// Config keys required by the action type but absent (or null) here.
    pub fn missing_config_keys(&self) -> Vec<&'static str> {
        self.action_type
            .required_config_keys()
            .iter()
            .copied()
            .filter(|key| self.config.get(*key).is_none_or(Value::is_null))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// ActionStatus
// ---------------------------------------------------------------------------

/// Status of one action within one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

impl ActionStatus {
    /// Only completed actions satisfy a dependent's `depends_on`.
    pub fn is_successful(&self) -> bool {
        matches!(self, ActionStatus::Completed)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ActionStatus::Pending | ActionStatus::Running)
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionStatus::Pending => write!(f, "pending"),
            ActionStatus::Running => write!(f, "running"),
            ActionStatus::Completed => write!(f, "completed"),
            ActionStatus::Failed => write!(f, "failed"),
            ActionStatus::Skipped => write!(f, "skipped"),
            ActionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionResult
// ---------------------------------------------------------------------------

/// Outcome of processing one action.
///
/// Only constructible through `success`, `failure`, `skipped`, and
/// `cancelled`, each of which fixes status and timestamps together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    action_id: String,
    status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    execution_time_ms: u64,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
}

impl ActionResult {
    fn finished(
        action_id: impl Into<String>,
        status: ActionStatus,
        output: Option<Value>,
        error_message: Option<String>,
        execution_time_ms: u64,
    ) -> Self {
        let completed_at = Utc::now();
        let elapsed = i64::try_from(execution_time_ms).unwrap_or(i64::MAX);
        let started_at = completed_at
            .checked_sub_signed(Duration::milliseconds(elapsed))
            .unwrap_or(completed_at);
        Self {
            action_id: action_id.into(),
            status,
            output,
            error_message,
            execution_time_ms,
            started_at,
            completed_at,
        }
    }

    /// The action ran and produced `output`.
    pub fn success(action_id: impl Into<String>, output: Value, execution_time_ms: u64) -> Self {
        Self::finished(
            action_id,
            ActionStatus::Completed,
            Some(output),
            None,
            execution_time_ms,
        )
    }

    /// The action ran and failed (error or timeout).
    pub fn failure(
        action_id: impl Into<String>,
        error_message: impl Into<String>,
        execution_time_ms: u64,
    ) -> Self {
        Self::finished(
            action_id,
            ActionStatus::Failed,
            None,
            Some(error_message.into()),
            execution_time_ms,
        )
    }

    /// The action did not run: guard false or dependencies unsatisfied.
    pub fn skipped(action_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::finished(action_id, ActionStatus::Skipped, None, Some(reason.into()), 0)
    }

    /// The execution was cancelled before or while the action ran.
    pub fn cancelled(action_id: impl Into<String>, execution_time_ms: u64) -> Self {
        Self::finished(
            action_id,
            ActionStatus::Cancelled,
            None,
            Some("execution cancelled".to_string()),
            execution_time_ms,
        )
    }

    pub fn action_id(&self) -> &str {
        &self.action_id
    }

    pub fn status(&self) -> ActionStatus {
        self.status
    }

    pub fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn execution_time_ms(&self) -> u64 {
        self.execution_time_ms
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }

    pub fn is_successful(&self) -> bool {
        self.status.is_successful()
    }
}
