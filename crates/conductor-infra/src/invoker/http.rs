//! HTTP-backed `ActionInvoker`.
//!
//! Remote action types (`service_call`, `external_api_call`,
//! `prompt_execution`, `notification` with a webhook) become HTTP requests;
//! the rest (`wait`, `transform_data`, `conditional_branch`, `loop`) are
//! evaluated locally. `{{ ... }}` placeholders in the action config are
//! resolved against the wave snapshot before dispatch.
//!
//! Correlation and trace IDs travel as `X-Correlation-ID` / `X-Trace-ID`.

use std::collections::HashMap;
use std::time::Duration;

use conductor_core::workflow::expression::GuardEvaluator;
use conductor_core::workflow::invoker::{ActionInvoker, InvocationContext, InvocationError};
use conductor_types::action::{ActionType, WorkflowAction};
use conductor_types::config::ConductorConfig;
use reqwest::Method;
use serde_json::{Map, Value, json};

pub const CORRELATION_HEADER: &str = "X-Correlation-ID";
pub const TRACE_HEADER: &str = "X-Trace-ID";
pub const EXECUTION_HEADER: &str = "X-Execution-ID";

/// Error bodies are cut to this many characters in failure messages.
const MAX_ERROR_BODY_CHARS: usize = 512;

pub struct HttpActionInvoker {
    http: reqwest::Client,
    services: HashMap<String, String>,
    prompt_service_url: Option<String>,
}

impl HttpActionInvoker {
    pub fn new(config: &ConductorConfig) -> Result<Self, InvocationError> {
        let http = reqwest::Client::builder()
            .user_agent(config.http.user_agent.clone())
            .timeout(Duration::from_secs(config.http.request_timeout_seconds))
            .build()
            .map_err(|e| InvocationError::Config(format!("http client: {e}")))?;
        Ok(Self {
            http,
            services: config.services.clone(),
            prompt_service_url: config.prompt_service_url.clone(),
        })
    }

    fn service_url(&self, service: &str, endpoint: &str) -> Result<String, InvocationError> {
        let base = self
            .services
            .get(service)
            .ok_or_else(|| InvocationError::Config(format!("unknown service '{service}'")))?;
        Ok(join_url(base, endpoint))
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        headers: &[(String, String)],
        body: Option<&Value>,
        ctx: &InvocationContext,
    ) -> Result<Value, InvocationError> {
        let mut request = self
            .http
            .request(method.clone(), url)
            .header(EXECUTION_HEADER, ctx.execution_id.to_string());
        if let Some(id) = &ctx.correlation_id {
            request = request.header(CORRELATION_HEADER, id);
        }
        if let Some(id) = &ctx.trace_id {
            request = request.header(TRACE_HEADER, id);
        }
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        tracing::debug!(execution_id = %ctx.execution_id, %method, url, "sending action request");
        let response = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(InvocationError::Cancelled),
            r = request.send() => r.map_err(|e| InvocationError::Transport(e.to_string()))?,
        };

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| InvocationError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(InvocationError::Service {
                status: status.as_u16(),
                body: text.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }
        Ok(parse_body(text))
    }

    async fn service_call(
        &self,
        config: &Map<String, Value>,
        parameters: &HashMap<String, Value>,
        ctx: &InvocationContext,
    ) -> Result<Value, InvocationError> {
        let url = self.service_url(required_str(config, "service")?, required_str(config, "endpoint")?)?;
        let method = method_of(config, Method::POST)?;
        let body = config
            .get("body")
            .cloned()
            .unwrap_or_else(|| json!({ "parameters": parameters }));
        self.send(method, &url, &headers_of(config)?, Some(&body), ctx).await
    }

    async fn external_api_call(
        &self,
        config: &Map<String, Value>,
        ctx: &InvocationContext,
    ) -> Result<Value, InvocationError> {
        let url = required_str(config, "url")?;
        let method = method_of(config, Method::GET)?;
        self.send(method, url, &headers_of(config)?, config.get("body"), ctx)
            .await
    }

    async fn prompt_execution(
        &self,
        config: &Map<String, Value>,
        parameters: &HashMap<String, Value>,
        ctx: &InvocationContext,
    ) -> Result<Value, InvocationError> {
        let base = self
            .prompt_service_url
            .as_deref()
            .ok_or_else(|| InvocationError::Config("prompt_service_url is not configured".into()))?;
        let prompt_id = required_str(config, "prompt_id")?;
        let url = join_url(base, &format!("/prompts/{prompt_id}/execute"));
        let variables = config
            .get("variables")
            .cloned()
            .unwrap_or_else(|| json!(parameters));
        let body = json!({ "variables": variables });
        self.send(Method::POST, &url, &[], Some(&body), ctx).await
    }

    async fn notification(
        &self,
        action: &WorkflowAction,
        config: &Map<String, Value>,
        ctx: &InvocationContext,
    ) -> Result<Value, InvocationError> {
        let message = config.get("message").cloned().unwrap_or(Value::Null);
        let channel = config.get("channel").cloned().unwrap_or(Value::Null);
        match config.get("webhook_url").and_then(Value::as_str) {
            Some(url) => {
                let body = json!({ "message": message, "channel": channel });
                self.send(Method::POST, url, &[], Some(&body), ctx).await?;
                Ok(json!({ "delivered": true }))
            }
            None => {
                tracing::info!(
                    execution_id = %ctx.execution_id,
                    action_id = %action.action_id,
                    %message,
                    "notification (no webhook configured)"
                );
                Ok(json!({ "delivered": false, "logged": true }))
            }
        }
    }
}

impl ActionInvoker for HttpActionInvoker {
    async fn invoke(
        &self,
        action: &WorkflowAction,
        parameters: &HashMap<String, Value>,
        context: &InvocationContext,
    ) -> Result<Value, InvocationError> {
        let raw = Value::Object(action.config.clone().into_iter().collect());
        let config = match context.snapshot.resolve_value(&raw) {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        match action.action_type {
            ActionType::ServiceCall => self.service_call(&config, parameters, context).await,
            ActionType::ExternalApiCall => self.external_api_call(&config, context).await,
            ActionType::PromptExecution => self.prompt_execution(&config, parameters, context).await,
            ActionType::Notification => self.notification(action, &config, context).await,
            ActionType::Wait => wait(&config, context).await,
            ActionType::TransformData => transform(&config),
            ActionType::ConditionalBranch => branch(&config, context),
            ActionType::Loop => loop_items(&config),
        }
    }
}

// ---------------------------------------------------------------------------
// Local action types
// ---------------------------------------------------------------------------

async fn wait(config: &Map<String, Value>, ctx: &InvocationContext) -> Result<Value, InvocationError> {
    let seconds = match config.get("seconds") {
        None => 0.0,
        Some(v) => v
            .as_f64()
            .ok_or_else(|| InvocationError::Config("'seconds' must be a number".into()))?,
    };
    let duration = Duration::try_from_secs_f64(seconds).map_err(|e| {
        InvocationError::Config(format!("'seconds' is not a usable duration ({seconds}): {e}"))
    })?;
    tokio::select! {
        _ = ctx.cancel.cancelled() => Err(InvocationError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(json!({ "waited_seconds": seconds })),
    }
}

/// Output is the `mapping` object with its placeholders already resolved.
fn transform(config: &Map<String, Value>) -> Result<Value, InvocationError> {
    match config.get("mapping") {
        Some(mapping @ Value::Object(_)) => Ok(mapping.clone()),
        _ => Err(InvocationError::Config(
            "transform_data requires a 'mapping' object".into(),
        )),
    }
}

fn branch(config: &Map<String, Value>, ctx: &InvocationContext) -> Result<Value, InvocationError> {
    let expression = required_str(config, "expression")?;
    let condition_met = GuardEvaluator::new()
        .evaluate_bool(expression, &ctx.snapshot.to_expression_context())
        .map_err(|e| InvocationError::Other(e.to_string()))?;
    let key = if condition_met { "then" } else { "else" };
    Ok(json!({
        "condition_met": condition_met,
        "branch": key,
        "selected": config.get(key).cloned().unwrap_or(Value::Null),
    }))
}

fn loop_items(config: &Map<String, Value>) -> Result<Value, InvocationError> {
    match config.get("items") {
        Some(Value::Array(items)) => Ok(json!({ "iterations": items.len(), "items": items })),
        _ => Err(InvocationError::Config("loop requires an 'items' array".into())),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn required_str<'a>(config: &'a Map<String, Value>, key: &str) -> Result<&'a str, InvocationError> {
    config
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| InvocationError::Config(format!("missing string config '{key}'")))
}

fn method_of(config: &Map<String, Value>, default: Method) -> Result<Method, InvocationError> {
    match config.get("method").and_then(Value::as_str) {
        None => Ok(default),
        Some(m) => Method::from_bytes(m.to_ascii_uppercase().as_bytes())
            .map_err(|_| InvocationError::Config(format!("invalid HTTP method '{m}'"))),
    }
}

fn headers_of(config: &Map<String, Value>) -> Result<Vec<(String, String)>, InvocationError> {
    match config.get("headers") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Object(map)) => Ok(map
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => (k.clone(), s.clone()),
                other => (k.clone(), other.to_string()),
            })
            .collect()),
        Some(_) => Err(InvocationError::Config("'headers' must be an object".into())),
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// JSON bodies decode as JSON, anything else is returned as a string.
fn parse_body(text: String) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}
