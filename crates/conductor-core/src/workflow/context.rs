//! Execution context: the data surface visible to guards and invocations.
//!
//! `ExecutionContext` accumulates action outputs and statuses as waves
//! finish. The executor takes a snapshot at the start of each wave, so every
//! action in a wave sees exactly the results of earlier waves.

use std::collections::HashMap;

use conductor_types::action::{ActionResult, ActionStatus};
use serde_json::{Map, Value, json};
use uuid::Uuid;

/// Maximum serialized size of a single action output kept in the context (1 MB).
pub const MAX_ACTION_OUTPUT_SIZE: usize = 1_048_576;

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: Uuid,
    pub workflow_name: String,
    pub parameters: HashMap<String, Value>,
    outputs: HashMap<String, Value>,
    statuses: HashMap<String, ActionStatus>,
}

impl ExecutionContext {
    pub fn new(
        execution_id: Uuid,
        workflow_name: impl Into<String>,
        parameters: HashMap<String, Value>,
    ) -> Self {
        Self {
            execution_id,
            workflow_name: workflow_name.into(),
            parameters,
            outputs: HashMap::new(),
            statuses: HashMap::new(),
        }
    }

    /// Record a finished action. Oversized outputs are replaced with a marker.
    pub fn record(&mut self, result: &ActionResult) {
        let id = result.action_id().to_string();
        self.statuses.insert(id.clone(), result.status());

        let Some(output) = result.output() else {
            return;
        };
        let size = serde_json::to_vec(output).map(|v| v.len()).unwrap_or(0);
        if size > MAX_ACTION_OUTPUT_SIZE {
            tracing::warn!(
                action_id = %id,
                size,
                max = MAX_ACTION_OUTPUT_SIZE,
                "action output exceeds size limit, truncating in context"
            );
            self.outputs.insert(
                id,
                json!({ "_truncated": true, "_original_size": size }),
            );
        } else {
            self.outputs.insert(id, output.clone());
        }
    }

    pub fn output(&self, action_id: &str) -> Option<&Value> {
        self.outputs.get(action_id)
    }

    pub fn outputs(&self) -> &HashMap<String, Value> {
        &self.outputs
    }

    pub fn status(&self, action_id: &str) -> Option<ActionStatus> {
        self.statuses.get(action_id).copied()
    }

    /// JSON object guards evaluate against:
    ///
    /// ```json
    /// {
    ///   "actions": { "<id>": { "status": "completed", "output": ... } },
    ///   "parameters": { ... },
    ///   "workflow": { "name": "...", "execution_id": "..." }
    /// }
    /// ```
    pub fn to_expression_context(&self) -> Value {
        let mut actions = Map::new();
        for (id, status) in &self.statuses {
            actions.insert(
                id.clone(),
                json!({
                    "status": status.to_string(),
                    "output": self.outputs.get(id).cloned().unwrap_or(Value::Null),
                }),
            );
        }

        json!({
            "actions": actions,
            "parameters": self.parameters,
            "workflow": {
                "name": self.workflow_name,
                "execution_id": self.execution_id.to_string(),
            }
        })
    }

    /// Replace `{{ path.to.value }}` placeholders with values from the
    /// expression context. Unknown paths are left untouched. A string that is
    /// exactly one placeholder resolves to the referenced value itself, so
    /// objects and numbers keep their JSON type.
    pub fn resolve_template(&self, template: &str) -> Value {
        let ctx = self.to_expression_context();

        let trimmed = template.trim();
        if let Some(v) = single_placeholder(trimmed).and_then(|path| lookup(&ctx, path)) {
            return v.clone();
        }

        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            let Some(len) = rest[start..].find("}}") else {
                break;
            };
            let end = start + len + 2;
            let path = rest[start + 2..end - 2].trim();
            out.push_str(&rest[..start]);
            match lookup(&ctx, path) {
                Some(Value::String(s)) => out.push_str(s),
                Some(v) => out.push_str(&v.to_string()),
                None => out.push_str(&rest[start..end]),
            }
            rest = &rest[end..];
        }
        out.push_str(rest);
        Value::String(out)
    }

    /// Apply `resolve_template` to every string inside `value`.
    pub fn resolve_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) if s.contains("{{") => self.resolve_template(s),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.resolve_value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

fn single_placeholder(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

/// Dotted path lookup; numeric segments index arrays.
pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |cur, seg| match cur {
        Value::Object(map) => map.get(seg),
        Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
