//! Workflow aggregate root.
//!
//! A `Workflow` owns an ordered list of parameters and actions. Mutation goes
//! through methods that enforce the aggregate invariants (unique parameter
//! names, unique action IDs, activation requires at least one action) and the
//! lifecycle (draft -> active -> deprecated/archived, with reactivation).
//!
//! Fields stay public so definitions can be loaded from YAML/JSON files; the
//! validator re-checks every invariant before a loaded workflow is persisted.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::WorkflowAction;
use crate::error::DomainError;
use crate::parameter::WorkflowParameter;

// ---------------------------------------------------------------------------
// WorkflowStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a workflow definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    #[default]
    Draft,
    Active,
    Archived,
    Deprecated,
}

impl WorkflowStatus {
    /// Parameters and actions may only change while draft or active.
    pub fn is_modifiable(&self) -> bool {
        matches!(self, WorkflowStatus::Draft | WorkflowStatus::Active)
    }

    /// Only active workflows accept execution requests.
    pub fn is_executable(&self) -> bool {
        matches!(self, WorkflowStatus::Active)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowStatus::Draft => write!(f, "draft"),
            WorkflowStatus::Active => write!(f, "active"),
            WorkflowStatus::Archived => write!(f, "archived"),
            WorkflowStatus::Deprecated => write!(f, "deprecated"),
        }
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(WorkflowStatus::Draft),
            "active" => Ok(WorkflowStatus::Active),
            "archived" => Ok(WorkflowStatus::Archived),
            "deprecated" => Ok(WorkflowStatus::Deprecated),
            other => Err(format!("invalid workflow status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

fn default_version() -> u32 {
    1
}

/// A multi-step workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// UUIDv7 assigned on creation.
    #[serde(default = "Uuid::now_v7")]
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_by: String,
    #[serde(default)]
    pub status: WorkflowStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<WorkflowParameter>,
    #[serde(default)]
    pub actions: Vec<WorkflowAction>,
    /// Incremented on every structural change.
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Create an empty draft workflow.
    pub fn new(name: impl Into<String>, created_by: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            description: String::new(),
            created_by: created_by.into(),
            status: WorkflowStatus::Draft,
            tags: Vec::new(),
            parameters: Vec::new(),
            actions: Vec::new(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }

    fn ensure_modifiable(&self) -> Result<(), DomainError> {
        if self.status.is_modifiable() {
            Ok(())
        } else {
            Err(DomainError::NotModifiable(self.status.to_string()))
        }
    }

    pub fn get_parameter(&self, name: &str) -> Option<&WorkflowParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn get_action(&self, action_id: &str) -> Option<&WorkflowAction> {
        self.actions.iter().find(|a| a.action_id == action_id)
    }

    /// Add a parameter. Its name must be new and its default must be valid.
    pub fn add_parameter(&mut self, parameter: WorkflowParameter) -> Result<(), DomainError> {
        self.ensure_modifiable()?;
        if self.get_parameter(&parameter.name).is_some() {
            return Err(DomainError::DuplicateParameter(parameter.name));
        }
        parameter.validate_default()?;
        self.parameters.push(parameter);
        self.touch();
        Ok(())
    }

    /// Remove a parameter by name, returning it.
    pub fn remove_parameter(&mut self, name: &str) -> Result<WorkflowParameter, DomainError> {
        self.ensure_modifiable()?;
        let idx = self
            .parameters
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| DomainError::ParameterNotFound(name.to_string()))?;
        let removed = self.parameters.remove(idx);
        self.touch();
        Ok(removed)
    }

    /// Add an action. Its ID must be new.
    ///
    /// Dependencies are not checked here because actions may be added in any
    /// order; the validator rejects dangling references and cycles.
    pub fn add_action(&mut self, action: WorkflowAction) -> Result<(), DomainError> {
        self.ensure_modifiable()?;
        if self.get_action(&action.action_id).is_some() {
            return Err(DomainError::DuplicateAction(action.action_id));
        }
        self.actions.push(action);
        self.touch();
        Ok(())
    }

    /// Remove an action by ID, returning it.
    pub fn remove_action(&mut self, action_id: &str) -> Result<WorkflowAction, DomainError> {
        self.ensure_modifiable()?;
        let idx = self
            .actions
            .iter()
            .position(|a| a.action_id == action_id)
            .ok_or_else(|| DomainError::ActionNotFound(action_id.to_string()))?;
        let removed = self.actions.remove(idx);
        self.touch();
        Ok(removed)
    }

    fn transition(&mut self, to: WorkflowStatus) -> Result<(), DomainError> {
        use WorkflowStatus::*;

        let allowed = match (self.status, to) {
            (Draft | Archived | Deprecated, Active) => true,
            (Active, Deprecated) => true,
            (Draft | Active | Deprecated, Archived) => true,
            _ => false,
        };
        if !allowed {
            return Err(DomainError::InvalidTransition {
                entity: "workflow",
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Make the workflow executable. Also the reactivation path from
    /// archived or deprecated.
    pub fn activate(&mut self) -> Result<(), DomainError> {
        if self.actions.is_empty() {
            return Err(DomainError::NoActions);
        }
        self.transition(WorkflowStatus::Active)
    }

    pub fn deprecate(&mut self) -> Result<(), DomainError> {
        self.transition(WorkflowStatus::Deprecated)
    }

    pub fn archive(&mut self) -> Result<(), DomainError> {
        self.transition(WorkflowStatus::Archived)
    }

    /// Names appearing more than once in `parameters`.
    pub fn duplicate_parameter_names(&self) -> Vec<&str> {
        duplicates(self.parameters.iter().map(|p| p.name.as_str()))
    }

    /// IDs appearing more than once in `actions`.
    pub fn duplicate_action_ids(&self) -> Vec<&str> {
        duplicates(self.actions.iter().map(|a| a.action_id.as_str()))
    }
}

fn duplicates<'a>(items: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut seen = HashSet::new();
    let mut dups = Vec::new();
    for item in items {
        if !seen.insert(item) && !dups.contains(&item) {
            dups.push(item);
        }
    }
    dups
}
