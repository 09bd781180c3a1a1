//! Static analysis of workflow definitions.
//!
//! `validate` runs every check and accumulates defects into one report, so a
//! caller sees all of them at once. It never mutates the workflow.

use std::collections::{HashMap, HashSet};
use std::fmt;

use conductor_types::parameter::ParameterError;
use conductor_types::workflow::Workflow;
use serde::Serialize;
use thiserror::Error;

use super::expression::GuardEvaluator;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("workflow name must not be empty")]
    EmptyName,

    #[error("workflow creator must not be empty")]
    EmptyCreator,

    #[error("duplicate parameter name: '{0}'")]
    DuplicateParameter(String),

    #[error(transparent)]
    InvalidParameter(#[from] ParameterError),

    #[error("duplicate action ID: '{0}'")]
    DuplicateAction(String),

    #[error("action '{0}' has an empty name")]
    EmptyActionName(String),

    #[error("action '{0}' must have timeout_seconds > 0")]
    ZeroTimeout(String),

    #[error("action '{action}' ({action_type}) is missing required config key '{key}'")]
    MissingConfig {
        action: String,
        action_type: String,
        key: &'static str,
    },

    #[error("action '{action}' depends on unknown action '{dependency}'")]
    UnknownDependency { action: String, dependency: String },

    #[error("action '{action}' has on_error referencing unknown action '{target}'")]
    UnknownErrorHandler { action: String, target: String },

    #[error("action '{0}' cannot be its own on_error handler")]
    SelfErrorHandler(String),

    #[error("action '{action}' has an invalid condition: {reason}")]
    InvalidCondition { action: String, reason: String },

    #[error("dependency cycle detected: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

/// Outcome of `validate`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub ok: bool,
    #[serde(serialize_with = "as_messages")]
    pub errors: Vec<ValidationError>,
}

fn as_messages<S: serde::Serializer>(errors: &[ValidationError], s: S) -> Result<S::Ok, S::Error> {
    s.collect_seq(errors.iter().map(ToString::to_string))
}

impl ValidationReport {
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }

    pub fn has_cycle(&self) -> bool {
        self.errors
            .iter()
            .any(|e| matches!(e, ValidationError::Cycle(_)))
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ok {
            return write!(f, "valid");
        }
        write!(f, "{}", self.messages().join("; "))
    }
}

/// Validate a workflow definition.
///
/// Checks, in order: header fields, parameters, per-action fields and config,
/// references (`depends_on`, `on_error`), guard syntax, and finally
/// dependency cycles.
pub fn validate(workflow: &Workflow) -> ValidationReport {
    let mut errors = Vec::new();

    if workflow.name.trim().is_empty() {
        errors.push(ValidationError::EmptyName);
    }
    if workflow.created_by.trim().is_empty() {
        errors.push(ValidationError::EmptyCreator);
    }

    // Parameters
    for name in workflow.duplicate_parameter_names() {
        errors.push(ValidationError::DuplicateParameter(name.to_string()));
    }
    for param in &workflow.parameters {
        if let Err(e) = param.validate_definition() {
            errors.push(e.into());
        }
    }

    // Actions
    for id in workflow.duplicate_action_ids() {
        errors.push(ValidationError::DuplicateAction(id.to_string()));
    }
    for action in &workflow.actions {
        if action.name.trim().is_empty() {
            errors.push(ValidationError::EmptyActionName(action.action_id.clone()));
        }
        if action.timeout_seconds == 0 {
            errors.push(ValidationError::ZeroTimeout(action.action_id.clone()));
        }
        for key in action.missing_config_keys() {
            errors.push(ValidationError::MissingConfig {
                action: action.action_id.clone(),
                action_type: action.action_type.to_string(),
                key,
            });
        }
    }

    // References
    let ids: HashSet<&str> = workflow.actions.iter().map(|a| a.action_id.as_str()).collect();
    for action in &workflow.actions {
        for dep in &action.depends_on {
            if !ids.contains(dep.as_str()) {
                errors.push(ValidationError::UnknownDependency {
                    action: action.action_id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
        if let Some(target) = &action.on_error {
            if target == &action.action_id {
                errors.push(ValidationError::SelfErrorHandler(action.action_id.clone()));
            } else if !ids.contains(target.as_str()) {
                errors.push(ValidationError::UnknownErrorHandler {
                    action: action.action_id.clone(),
                    target: target.clone(),
                });
            }
        }
    }

    // Guards
    let evaluator = GuardEvaluator::new();
    for action in &workflow.actions {
        if let Some(condition) = &action.condition {
            if let Err(e) = evaluator.check_syntax(condition) {
                errors.push(ValidationError::InvalidCondition {
                    action: action.action_id.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    for cycle in find_cycles(workflow) {
        errors.push(ValidationError::Cycle(cycle));
    }

    ValidationReport {
        ok: errors.is_empty(),
        errors,
    }
}

// ---------------------------------------------------------------------------
// Cycle detection
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Depth-first search with an explicit recursion stack. A node reached while
/// still on the stack closes a cycle; the returned path starts and ends on
/// that node. Unknown dependencies are ignored here (reported separately).
pub fn find_cycles(workflow: &Workflow) -> Vec<Vec<String>> {
    let index: HashMap<&str, usize> = workflow
        .actions
        .iter()
        .enumerate()
        .map(|(i, a)| (a.action_id.as_str(), i))
        .collect();
    let edges: Vec<Vec<usize>> = workflow
        .actions
        .iter()
        .map(|a| {
            a.depends_on
                .iter()
                .filter_map(|d| index.get(d.as_str()).copied())
                .collect()
        })
        .collect();

    let mut marks = vec![Mark::Unvisited; edges.len()];
    let mut stack: Vec<usize> = Vec::new();
    let mut cycles = Vec::new();

    for root in 0..edges.len() {
        if marks[root] == Mark::Unvisited {
            visit(root, &edges, &mut marks, &mut stack, &mut cycles);
        }
    }

    cycles
        .into_iter()
        .map(|cycle| {
            cycle
                .into_iter()
                .map(|i| workflow.actions[i].action_id.clone())
                .collect()
        })
        .collect()
}

fn visit(
    node: usize,
    edges: &[Vec<usize>],
    marks: &mut [Mark],
    stack: &mut Vec<usize>,
    cycles: &mut Vec<Vec<usize>>,
) {
    marks[node] = Mark::OnStack;
    stack.push(node);

    for &next in &edges[node] {
        match marks[next] {
            Mark::Unvisited => visit(next, edges, marks, stack, cycles),
            Mark::OnStack => {
                if let Some(pos) = stack.iter().position(|&n| n == next) {
                    let mut path = stack[pos..].to_vec();
                    path.push(next);
                    cycles.push(path);
                }
            }
            Mark::Done => {}
        }
    }

    stack.pop();
    marks[node] = Mark::Done;
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_types::action::{ActionType, WorkflowAction};
    use conductor_types::parameter::{ParameterType, WorkflowParameter};
    use serde_json::json;

    fn call(id: &str, deps: &[&str]) -> WorkflowAction {
        WorkflowAction::new(id, ActionType::ServiceCall)
            .with_config("service", json!("users"))
            .with_config("endpoint", json!("/lookup"))
            .depends_on(deps.iter().copied())
    }

    fn workflow(actions: Vec<WorkflowAction>) -> Workflow {
        let mut wf = Workflow::new("wf", "alice");
        wf.actions = actions;
        wf
    }

    #[test]
    fn valid_workflow_passes() {
        let mut wf = workflow(vec![call("a", &[]), call("b", &["a"])]);
        wf.parameters
            .push(WorkflowParameter::required("name", ParameterType::String));
        let report = validate(&wf);
        assert!(report.ok, "{report}");
        assert!(report.errors.is_empty());
    }

    #[test]
    fn cycle_is_reported_with_path() {
        let wf = workflow(vec![call("a", &["c"]), call("b", &["a"]), call("c", &["b"])]);
        let report = validate(&wf);
        assert!(!report.ok);
        assert!(report.has_cycle());
        let msg = report.to_string();
        assert!(msg.contains("cycle"), "got: {msg}");
        assert!(msg.contains("a -> c -> b -> a"), "got: {msg}");
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let wf = workflow(vec![call("a", &["a"])]);
        assert_eq!(find_cycles(&wf), vec![vec!["a".to_string(), "a".to_string()]]);
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let wf = workflow(vec![
            call("a", &[]),
            call("b", &["a"]),
            call("c", &["a"]),
            call("d", &["b", "c"]),
        ]);
        assert!(find_cycles(&wf).is_empty());
    }

    #[test]
    fn errors_accumulate() {
        let mut wf = Workflow::new("", "");
        let mut no_timeout = WorkflowAction::new("t", ActionType::Wait);
        no_timeout.timeout_seconds = 0;
        no_timeout.name = String::new();
        wf.actions = vec![
            WorkflowAction::new("svc", ActionType::ServiceCall).depends_on(["ghost"]),
            WorkflowAction::new("p", ActionType::PromptExecution),
            no_timeout,
        ];
        wf.parameters.push(
            WorkflowParameter::optional("n", ParameterType::Integer).with_default(json!("x")),
        );

        let report = validate(&wf);
        assert!(!report.ok);
        let errs = &report.errors;
        assert!(errs.contains(&ValidationError::EmptyName));
        assert!(errs.contains(&ValidationError::EmptyCreator));
        assert!(errs.contains(&ValidationError::EmptyActionName("t".into())));
        assert!(errs.contains(&ValidationError::ZeroTimeout("t".into())));
        assert!(errs.contains(&ValidationError::UnknownDependency {
            action: "svc".into(),
            dependency: "ghost".into()
        }));
        assert!(errs
            .iter()
            .any(|e| matches!(e, ValidationError::MissingConfig { key: "prompt_id", .. })));
        assert_eq!(
            errs.iter()
                .filter(|e| matches!(e, ValidationError::MissingConfig { action, .. } if action == "svc"))
                .count(),
            2
        );
        assert!(errs
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidParameter(_))));
    }

    #[test]
    fn duplicates_reported() {
        let mut wf = workflow(vec![call("a", &[]), call("a", &[])]);
        wf.parameters = vec![
            WorkflowParameter::required("p", ParameterType::String),
            WorkflowParameter::required("p", ParameterType::String),
        ];
        let report = validate(&wf);
        assert!(report
            .errors
            .contains(&ValidationError::DuplicateAction("a".into())));
        assert!(report
            .errors
            .contains(&ValidationError::DuplicateParameter("p".into())));
    }

    #[test]
    fn on_error_references_checked() {
        let mut a = call("a", &[]);
        a.on_error = Some("a".into());
        let mut b = call("b", &[]);
        b.on_error = Some("nowhere".into());
        let mut c = call("c", &[]);
        c.on_error = Some("a".into());
        let report = validate(&workflow(vec![a, b, c]));
        assert_eq!(report.errors.len(), 2);
        assert!(report
            .errors
            .contains(&ValidationError::SelfErrorHandler("a".into())));
    }

    #[test]
    fn malformed_guard_rejected() {
        let wf = workflow(vec![call("a", &[]).with_condition("(actions.x.output == 1")]);
        let report = validate(&wf);
        assert!(matches!(
            report.errors.as_slice(),
            [ValidationError::InvalidCondition { .. }]
        ));
    }

    #[test]
    fn report_serializes_messages() {
        let report = validate(&workflow(vec![call("a", &["a"])]));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["ok"], false);
        assert!(json["errors"][0].as_str().unwrap().contains("cycle"));
    }
}
