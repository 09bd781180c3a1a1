use thiserror::Error;

use crate::parameter::ParameterError;

/// Rejections raised by aggregate methods and state machines.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DomainError {
    #[error("duplicate parameter name: '{0}'")]
    DuplicateParameter(String),

    #[error("duplicate action ID: '{0}'")]
    DuplicateAction(String),

    #[error("parameter '{0}' not found")]
    ParameterNotFound(String),

    #[error("action '{0}' not found")]
    ActionNotFound(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(#[from] ParameterError),

    #[error("workflow must have at least one action to be activated")]
    NoActions,

    #[error("cannot modify workflow in '{0}' status")]
    NotModifiable(String),

    #[error("invalid transition for {entity}: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("{0} is in a terminal state and cannot be modified")]
    Terminal(&'static str),

    #[error("saga must have at least one step")]
    EmptySaga,

    #[error("saga step '{0}' not found")]
    StepNotFound(String),
}

/// Errors from repository operations (used by trait definitions in conductor-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_error_display() {
        let err = DomainError::InvalidTransition {
            entity: "saga",
            from: "completed".to_string(),
            to: "started".to_string(),
        };
        assert_eq!(err.to_string(), "invalid transition for saga: completed -> started");
    }

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }
}
