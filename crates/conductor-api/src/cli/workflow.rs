//! Workflow definition commands: validate, plan, import, list, show, and
//! lifecycle transitions.

use std::path::Path;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color};
use console::style;
use serde_json::json;
use uuid::Uuid;

use conductor_core::repository::workflow::WorkflowFilter;
use conductor_core::service::ServiceError;
use conductor_core::workflow::dag::build_execution_plan;
use conductor_core::workflow::definition::{LoadOptions, load_workflow_file_with};
use conductor_core::workflow::validator;
use conductor_types::config::ConductorConfig;
use conductor_types::workflow::{Workflow, WorkflowStatus};

use super::output::{Output, format_time, short_id, table, workflow_status_cell};
use crate::state::AppState;

fn load_options(config: &ConductorConfig) -> LoadOptions {
    LoadOptions {
        default_timeout_seconds: config.executor.default_timeout_seconds,
    }
}

fn load(file: &Path, config: &ConductorConfig) -> Result<Workflow> {
    load_workflow_file_with(file, &load_options(config))
        .with_context(|| format!("failed to load workflow file {}", file.display()))
}

// ---------------------------------------------------------------------------
// Offline commands
// ---------------------------------------------------------------------------

pub fn validate(file: &Path, config: &ConductorConfig, out: Output) -> Result<()> {
    let workflow = load(file, config)?;
    let report = validator::validate(&workflow);

    if out.json {
        out.print_json(&json!({
            "file": file.display().to_string(),
            "name": workflow.name,
            "ok": report.ok,
            "errors": report.messages(),
        }))?;
    } else if out.is_text() {
        println!();
        if report.ok {
            println!(
                "  {} '{}' is valid ({} parameters, {} actions)",
                style("✓").green().bold(),
                style(&workflow.name).cyan(),
                workflow.parameters.len(),
                workflow.actions.len()
            );
        } else {
            println!(
                "  {} '{}' has {} problem(s):",
                style("✗").red().bold(),
                style(&workflow.name).cyan(),
                report.errors.len()
            );
            for message in report.messages() {
                println!("    - {message}");
            }
        }
        println!();
    }

    if !report.ok {
        bail!("workflow '{}' is invalid", workflow.name);
    }
    Ok(())
}

pub fn plan(file: &Path, config: &ConductorConfig, out: Output) -> Result<()> {
    let workflow = load(file, config)?;
    let waves = build_execution_plan(&workflow.actions)
        .with_context(|| format!("cannot plan workflow '{}'", workflow.name))?;

    if out.json {
        let waves: Vec<Vec<&str>> = waves
            .iter()
            .map(|wave| wave.iter().map(|a| a.action_id.as_str()).collect())
            .collect();
        return out.print_json(&json!({ "name": workflow.name, "waves": waves }));
    }
    if !out.is_text() {
        return Ok(());
    }

    let mut t = table(vec![
        Cell::new("Wave").fg(Color::Cyan),
        Cell::new("Action"),
        Cell::new("Type"),
        Cell::new("Depends on"),
        Cell::new("Guard"),
    ]);
    for (i, wave) in waves.iter().enumerate() {
        for action in wave {
            t.add_row(vec![
                Cell::new(i + 1),
                Cell::new(&action.action_id),
                Cell::new(action.action_type),
                Cell::new(action.depends_on.join(", ")),
                Cell::new(action.condition.as_deref().unwrap_or("-")),
            ]);
        }
    }

    println!();
    println!(
        "  Plan for '{}' ({} waves)",
        style(&workflow.name).cyan(),
        waves.len()
    );
    println!();
    println!("{t}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Stored workflows
// ---------------------------------------------------------------------------

pub async fn import(state: &AppState, file: &Path, activate: bool, out: Output) -> Result<()> {
    let workflow = load(file, &state.config)?;
    let mut workflow = match state.workflows.create(workflow).await {
        Ok(wf) => wf,
        Err(ServiceError::Validation(report)) => {
            if out.is_text() {
                for message in report.messages() {
                    eprintln!("  {} {message}", style("✗").red());
                }
            }
            bail!("workflow is invalid: {report}");
        }
        Err(e) => return Err(e).context("failed to import workflow"),
    };
    if activate {
        workflow = state.workflows.activate(workflow.id).await?;
    }

    if out.json {
        out.print_json(&json!({
            "id": workflow.id,
            "name": workflow.name,
            "status": workflow.status,
            "actions": workflow.actions.len(),
        }))?;
    } else if out.is_text() {
        println!();
        println!(
            "  {} Imported workflow '{}'",
            style("*").green().bold(),
            style(&workflow.name).cyan()
        );
        println!("  ID: {}", workflow.id);
        println!("  Status: {}", workflow.status);
        println!("  Actions: {}", workflow.actions.len());
        if workflow.status == WorkflowStatus::Draft {
            println!();
            println!(
                "  Activate with: {}",
                style(format!("cndr activate {}", workflow.id)).dim()
            );
        }
        println!();
    }
    Ok(())
}

pub async fn list(
    state: &AppState,
    status: Option<&str>,
    tag: Option<String>,
    limit: usize,
    out: Output,
) -> Result<()> {
    let status = status
        .map(|s| s.parse::<WorkflowStatus>().map_err(anyhow::Error::msg))
        .transpose()?;
    let filter = WorkflowFilter {
        status,
        tag,
        ..Default::default()
    };
    let workflows = state.workflows.list(&filter, limit, 0).await?;

    if out.json {
        let rows: Vec<_> = workflows
            .iter()
            .map(|w| {
                json!({
                    "id": w.id,
                    "name": w.name,
                    "status": w.status,
                    "version": w.version,
                    "actions": w.actions.len(),
                    "tags": w.tags,
                    "created_by": w.created_by,
                })
            })
            .collect();
        return out.print_json(&rows);
    }
    if !out.is_text() {
        return Ok(());
    }

    if workflows.is_empty() {
        println!();
        println!("  No workflows stored.");
        println!(
            "  Import one with: {}",
            style("cndr import <file.yaml>").dim()
        );
        println!();
        return Ok(());
    }

    let mut t = table(vec![
        Cell::new("ID").fg(Color::Cyan),
        Cell::new("Name"),
        Cell::new("Status"),
        Cell::new("Version"),
        Cell::new("Actions"),
        Cell::new("Tags"),
    ]);
    for w in &workflows {
        t.add_row(vec![
            Cell::new(short_id(&w.id)),
            Cell::new(&w.name),
            workflow_status_cell(w.status),
            Cell::new(w.version),
            Cell::new(w.actions.len()),
            Cell::new(w.tags.join(", ")),
        ]);
    }
    println!();
    println!("{t}");
    println!();
    Ok(())
}

pub async fn show(state: &AppState, id: Uuid, out: Output) -> Result<()> {
    let workflow = state.workflows.get(id).await?;
    if out.json {
        return out.print_json(&workflow);
    }
    if !out.is_text() {
        return Ok(());
    }

    println!();
    println!("  {} {}", style("Workflow:").bold(), style(&workflow.name).cyan());
    println!("  ID: {}", workflow.id);
    println!("  Status: {}", workflow.status);
    println!("  Version: {}", workflow.version);
    println!("  Created by: {}", workflow.created_by);
    println!("  Updated: {}", format_time(workflow.updated_at));
    if !workflow.description.is_empty() {
        println!("  {}", style(&workflow.description).dim());
    }

    if !workflow.parameters.is_empty() {
        let mut t = table(vec![
            Cell::new("Parameter").fg(Color::Cyan),
            Cell::new("Type"),
            Cell::new("Required"),
            Cell::new("Default"),
        ]);
        for p in &workflow.parameters {
            t.add_row(vec![
                Cell::new(&p.name),
                Cell::new(p.param_type),
                Cell::new(if p.required { "yes" } else { "no" }),
                Cell::new(
                    p.default_value
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_else(|| "-".to_string()),
                ),
            ]);
        }
        println!();
        println!("{t}");
    }

    let mut t = table(vec![
        Cell::new("Action").fg(Color::Cyan),
        Cell::new("Type"),
        Cell::new("Depends on"),
        Cell::new("Retries"),
        Cell::new("Timeout (s)"),
    ]);
    for a in &workflow.actions {
        t.add_row(vec![
            Cell::new(&a.action_id),
            Cell::new(a.action_type),
            Cell::new(a.depends_on.join(", ")),
            Cell::new(a.retry_count),
            Cell::new(a.timeout_seconds),
        ]);
    }
    println!();
    println!("{t}");
    println!();
    Ok(())
}

/// Which lifecycle transition to apply.
#[derive(Debug, Clone, Copy)]
pub enum Transition {
    Activate,
    Deprecate,
    Archive,
}

pub async fn transition(state: &AppState, id: Uuid, to: Transition, out: Output) -> Result<()> {
    let workflow = match to {
        Transition::Activate => state.workflows.activate(id).await,
        Transition::Deprecate => state.workflows.deprecate(id).await,
        Transition::Archive => state.workflows.archive(id).await,
    }
    .with_context(|| format!("failed to change status of workflow {id}"))?;

    if out.json {
        out.print_json(&json!({ "id": workflow.id, "status": workflow.status }))?;
    } else if out.is_text() {
        println!(
            "  {} '{}' is now {}",
            style("*").green().bold(),
            style(&workflow.name).cyan(),
            workflow.status
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAIN: &str = r#"
name: chain
created_by: ops
actions:
  - action_id: first
    name: First
    type: wait
  - action_id: second
    name: Second
    type: wait
    depends_on: [first]
"#;

    const BROKEN: &str = r#"
name: broken
created_by: ops
actions:
  - action_id: a
    name: A
    type: wait
    depends_on: [b]
  - action_id: b
    name: B
    type: wait
    depends_on: [a]
"#;

    fn quiet() -> Output {
        Output {
            json: false,
            quiet: true,
        }
    }

    fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn validate_accepts_chain_and_rejects_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConductorConfig::default();

        let ok = write(&dir, "chain.yaml", CHAIN);
        assert!(validate(&ok, &config, quiet()).is_ok());

        let bad = write(&dir, "broken.yaml", BROKEN);
        let err = validate(&bad, &config, quiet()).unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn plan_fails_on_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConductorConfig::default();
        assert!(plan(&write(&dir, "chain.yaml", CHAIN), &config, quiet()).is_ok());
        assert!(plan(&write(&dir, "broken.yaml", BROKEN), &config, quiet()).is_err());
    }

    #[test]
    fn configured_timeout_applies_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ConductorConfig::default();
        config.executor.default_timeout_seconds = 12;
        let wf = load(&write(&dir, "chain.yaml", CHAIN), &config).unwrap();
        assert!(wf.actions.iter().all(|a| a.timeout_seconds == 12));
    }
}
