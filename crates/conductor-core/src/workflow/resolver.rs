//! Parameter resolution: turn caller input into the concrete map an
//! execution runs with.
//!
//! Per declared parameter the precedence is provided value, then default,
//! then a valid context value. Missing required parameters and invalid
//! provided values abort the whole resolution.

use std::collections::HashMap;

use conductor_types::parameter::ParameterError;
use conductor_types::workflow::Workflow;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolutionError {
    #[error("required parameter not provided: '{0}'")]
    MissingRequired(String),

    #[error("invalid value for parameter '{name}': {source}")]
    InvalidValue {
        name: String,
        #[source]
        source: ParameterError,
    },
}

/// Resolve `provided` (and optionally `context`) against the workflow's
/// declared parameters.
///
/// Optional parameters with no value resolve to `null`. Keys in `provided`
/// that the workflow does not declare are ignored.
pub fn resolve(
    workflow: &Workflow,
    provided: &HashMap<String, Value>,
    context: Option<&HashMap<String, Value>>,
) -> Result<HashMap<String, Value>, ResolutionError> {
    let mut resolved = HashMap::with_capacity(workflow.parameters.len());

    for param in &workflow.parameters {
        let value = if let Some(value) = provided.get(&param.name) {
            param
                .validate_value(value)
                .map_err(|source| ResolutionError::InvalidValue {
                    name: param.name.clone(),
                    source,
                })?;
            value.clone()
        } else if let Some(default) = &param.default_value {
            default.clone()
        } else if let Some(value) = context
            .and_then(|ctx| ctx.get(&param.name))
            .filter(|v| param.validate_value(v).is_ok())
        {
            value.clone()
        } else if param.required {
            return Err(ResolutionError::MissingRequired(param.name.clone()));
        } else {
            Value::Null
        };
        resolved.insert(param.name.clone(), value);
    }

    for key in provided.keys() {
        if workflow.get_parameter(key).is_none() {
            tracing::debug!(
                workflow = %workflow.name,
                parameter = %key,
                "ignoring undeclared parameter"
            );
        }
    }

    Ok(resolved)
}
