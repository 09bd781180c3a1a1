//! Typed workflow parameters and value validation.
//!
//! A `WorkflowParameter` declares the name, type, and constraints of one input
//! a workflow accepts. `validate_value` is the single source of truth for
//! whether a JSON value satisfies a parameter; the workflow aggregate, the
//! validator, and the parameter resolver all go through it.

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ---------------------------------------------------------------------------
// ParameterType
// ---------------------------------------------------------------------------

/// The JSON shape a parameter value must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Integer,
    Float,
    Boolean,
    Array,
    Object,
    /// A file reference, carried as a path or URI string.
    File,
}

impl ParameterType {
    /// Whether `value` has the JSON shape this type requires.
    ///
    /// Integers must be JSON integers; `1.0` is a float, not an integer.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParameterType::String | ParameterType::File => value.is_string(),
            ParameterType::Integer => value.is_i64() || value.is_u64(),
            ParameterType::Float => value.is_number(),
            ParameterType::Boolean => value.is_boolean(),
            ParameterType::Array => value.is_array(),
            ParameterType::Object => value.is_object(),
        }
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterType::String => write!(f, "string"),
            ParameterType::Integer => write!(f, "integer"),
            ParameterType::Float => write!(f, "float"),
            ParameterType::Boolean => write!(f, "boolean"),
            ParameterType::Array => write!(f, "array"),
            ParameterType::Object => write!(f, "object"),
            ParameterType::File => write!(f, "file"),
        }
    }
}

impl FromStr for ParameterType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "string" => Ok(ParameterType::String),
            "integer" => Ok(ParameterType::Integer),
            "float" => Ok(ParameterType::Float),
            "boolean" => Ok(ParameterType::Boolean),
            "array" => Ok(ParameterType::Array),
            "object" => Ok(ParameterType::Object),
            "file" => Ok(ParameterType::File),
            other => Err(format!("invalid parameter type: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// ValidationRules
// ---------------------------------------------------------------------------

/// Optional constraints applied after the type check.
///
/// Length bounds apply to strings (character count) and arrays (element
/// count). `pattern` applies to strings and must match the whole value.
/// `minimum`/`maximum` apply to numbers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
}

impl ValidationRules {
    fn is_empty(&self) -> bool {
        self == &ValidationRules::default()
    }
}

// ---------------------------------------------------------------------------
// ParameterError
// ---------------------------------------------------------------------------

/// Why a value was rejected by a parameter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParameterError {
    #[error("parameter '{name}' expects {expected}, got {actual}")]
    TypeMismatch {
        name: String,
        expected: ParameterType,
        actual: String,
    },

    #[error("parameter '{name}' value is not one of the allowed values")]
    NotAllowed { name: String },

    #[error("parameter '{name}' length {length} is below minimum {min}")]
    TooShort { name: String, length: usize, min: usize },

    #[error("parameter '{name}' length {length} exceeds maximum {max}")]
    TooLong { name: String, length: usize, max: usize },

    #[error("parameter '{name}' value does not match pattern '{pattern}'")]
    PatternMismatch { name: String, pattern: String },

    #[error("parameter '{name}' has an invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        name: String,
        pattern: String,
        reason: String,
    },

    #[error("parameter '{name}' value {value} is outside [{min}, {max}]")]
    OutOfRange {
        name: String,
        value: f64,
        min: String,
        max: String,
    },

    #[error("parameter '{name}' has an invalid default: {reason}")]
    InvalidDefault { name: String, reason: String },
}

// ---------------------------------------------------------------------------
// WorkflowParameter
// ---------------------------------------------------------------------------

/// One declared input of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowParameter {
    /// Unique within a workflow.
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "ValidationRules::is_empty")]
    pub validation_rules: ValidationRules,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl WorkflowParameter {
    /// A required parameter of the given type with no default or rules.
    pub fn required(name: impl Into<String>, param_type: ParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: true,
            default_value: None,
            allowed_values: None,
            validation_rules: ValidationRules::default(),
            description: None,
        }
    }

    /// An optional parameter of the given type with no default or rules.
    pub fn optional(name: impl Into<String>, param_type: ParameterType) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type)
        }
    }

    /// Builder-style default value.
    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Builder-style allowed-value set.
    pub fn with_allowed_values(mut self, values: Vec<Value>) -> Self {
        self.allowed_values = Some(values);
        self
    }

    /// Builder-style validation rules.
    pub fn with_rules(mut self, rules: ValidationRules) -> Self {
        self.validation_rules = rules;
        self
    }

    /// Check `value` against this parameter's type, allowed values, and rules.
    pub fn validate_value(&self, value: &Value) -> Result<(), ParameterError> {
        if !self.param_type.matches(value) {
            return Err(ParameterError::TypeMismatch {
                name: self.name.clone(),
                expected: self.param_type,
                actual: json_kind(value).to_string(),
            });
        }

        if let Some(allowed) = &self.allowed_values {
            if !allowed.iter().any(|a| a == value) {
                return Err(ParameterError::NotAllowed {
                    name: self.name.clone(),
                });
            }
        }

        let rules = &self.validation_rules;

        let length = match value {
            Value::String(s) => Some(s.chars().count()),
            Value::Array(items) => Some(items.len()),
            _ => None,
        };
        if let Some(length) = length {
            if let Some(min) = rules.min_length {
                if length < min {
                    return Err(ParameterError::TooShort {
                        name: self.name.clone(),
                        length,
                        min,
                    });
                }
            }
            if let Some(max) = rules.max_length {
                if length > max {
                    return Err(ParameterError::TooLong {
                        name: self.name.clone(),
                        length,
                        max,
                    });
                }
            }
        }

        if let (Some(pattern), Value::String(s)) = (&rules.pattern, value) {
            let re = Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
                ParameterError::InvalidPattern {
                    name: self.name.clone(),
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                }
            })?;
            if !re.is_match(s) {
                return Err(ParameterError::PatternMismatch {
                    name: self.name.clone(),
                    pattern: pattern.clone(),
                });
            }
        }

        if let Some(n) = value.as_f64() {
            let below = rules.minimum.is_some_and(|min| n < min);
            let above = rules.maximum.is_some_and(|max| n > max);
            if below || above {
                return Err(ParameterError::OutOfRange {
                    name: self.name.clone(),
                    value: n,
                    min: rules
                        .minimum
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "-inf".to_string()),
                    max: rules
                        .maximum
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "inf".to_string()),
                });
            }
        }

        Ok(())
    }

    /// Check that the default value (if any) satisfies the parameter itself.
    pub fn validate_default(&self) -> Result<(), ParameterError> {
        match &self.default_value {
            Some(default) => {
                self.validate_value(default)
                    .map_err(|e| ParameterError::InvalidDefault {
                        name: self.name.clone(),
                        reason: e.to_string(),
                    })
            }
            None => Ok(()),
        }
    }

    /// Definition-time checks: the pattern compiles and the default is valid.
    pub fn validate_definition(&self) -> Result<(), ParameterError> {
        if let Some(pattern) = &self.validation_rules.pattern {
            Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
                ParameterError::InvalidPattern {
                    name: self.name.clone(),
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                }
            })?;
        }
        self.validate_default()
    }
}

/// Short name for the JSON kind of a value, used in error messages.
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
