//! Static execution plan preview.
//!
//! Uses `petgraph` to model action dependencies as a directed graph.
//! Topological sort rejects cycles, and depth-based grouping produces the
//! waves the executor would dispatch if every action succeeded. The executor
//! itself computes waves dynamically from results; this plan is only a
//! preview (CLI `plan`, tests).

use std::collections::HashMap;

use conductor_types::action::WorkflowAction;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    #[error("action '{action}' depends on unknown action '{dependency}'")]
    UnknownDependency { action: String, dependency: String },

    #[error("cycle detected involving action '{0}'")]
    CycleDetected(String),
}

// ---------------------------------------------------------------------------
// Execution plan (wave computation)
// ---------------------------------------------------------------------------

/// Group actions into waves of mutually independent work.
///
/// 1. Build a `DiGraph` with action IDs as nodes and `depends_on` edges.
/// 2. Run `petgraph::algo::toposort` to verify acyclicity.
/// 3. Compute each node's depth (max dependency depth + 1).
/// 4. Group actions by depth, preserving declaration order within a wave.
pub fn build_execution_plan(
    actions: &[WorkflowAction],
) -> Result<Vec<Vec<&WorkflowAction>>, PlanError> {
    if actions.is_empty() {
        return Ok(vec![]);
    }

    let by_id: HashMap<&str, &WorkflowAction> =
        actions.iter().map(|a| (a.action_id.as_str(), a)).collect();

    let mut graph = DiGraph::<&str, ()>::new();
    let nodes: HashMap<&str, _> = actions
        .iter()
        .map(|a| (a.action_id.as_str(), graph.add_node(a.action_id.as_str())))
        .collect();

    // Edge from dependency -> dependent
    for action in actions {
        let to = nodes[action.action_id.as_str()];
        for dep in &action.depends_on {
            let from = nodes
                .get(dep.as_str())
                .ok_or_else(|| PlanError::UnknownDependency {
                    action: action.action_id.clone(),
                    dependency: dep.clone(),
                })?;
            graph.add_edge(*from, to, ());
        }
    }

    let sorted = toposort(&graph, None)
        .map_err(|cycle| PlanError::CycleDetected(graph[cycle.node_id()].to_string()))?;

    let mut depths: HashMap<&str, usize> = HashMap::new();
    for node in sorted {
        let id = graph[node];
        let depth = by_id[id]
            .depends_on
            .iter()
            .map(|dep| depths.get(dep.as_str()).copied().unwrap_or(0) + 1)
            .max()
            .unwrap_or(0);
        depths.insert(id, depth);
    }

    let max_depth = depths.values().copied().max().unwrap_or(0);
    let mut waves: Vec<Vec<&WorkflowAction>> = vec![vec![]; max_depth + 1];
    for action in actions {
        waves[depths[action.action_id.as_str()]].push(action);
    }

    Ok(waves)
}
