//! Execution commands: run, executions, execution, cancel.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color};
use console::style;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use uuid::Uuid;

use conductor_core::repository::execution::ExecutionFilter;
use conductor_core::service::ExecuteRequest;
use conductor_types::event::ConductorEvent;
use conductor_types::execution::{ExecutionStatus, WorkflowExecution};

use super::output::{
    Output, action_status_cell, execution_status_cell, format_time, preview, short_id, table,
};
use crate::state::AppState;

/// How long to wait for buffered progress lines after a run returns.
const PROGRESS_DRAIN: Duration = Duration::from_millis(500);

/// Parse `name=value` pairs. Values that parse as JSON keep their type
/// (`qty=3` is a number); anything else is a string.
pub fn parse_params(raw: &[String]) -> Result<HashMap<String, Value>> {
    raw.iter()
        .map(|pair| {
            let (name, value) = pair
                .split_once('=')
                .with_context(|| format!("invalid parameter '{pair}', expected NAME=VALUE"))?;
            let name = name.trim();
            if name.is_empty() {
                bail!("invalid parameter '{pair}', name is empty");
            }
            let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
            Ok((name.to_string(), value))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

pub async fn run(
    state: &AppState,
    workflow_id: Uuid,
    params: &[String],
    correlation_id: Option<String>,
    trace_id: Option<String>,
    out: Output,
) -> Result<()> {
    let request = ExecuteRequest {
        parameters: parse_params(params)?,
        context: None,
        correlation_id,
        trace_id,
    };
    let service = &state.workflows;

    let progress = out
        .is_text()
        .then(|| tokio::spawn(print_progress(service.events().subscribe())));

    let execution = {
        let run = service.execute(workflow_id, request);
        tokio::pin!(run);
        tokio::select! {
            result = &mut run => result,
            _ = tokio::signal::ctrl_c() => {
                if out.is_text() {
                    eprintln!("  {} cancelling...", style("!").yellow().bold());
                }
                for execution_id in service.running_executions() {
                    service.cancel(execution_id).await?;
                }
                run.await
            }
        }
    }
    .with_context(|| format!("failed to execute workflow {workflow_id}"))?;

    if let Some(handle) = progress {
        let _ = tokio::time::timeout(PROGRESS_DRAIN, handle).await;
    }

    render_execution(&execution, out)?;
    if execution.status != ExecutionStatus::Completed {
        bail!("execution {} ended with status {}", execution.execution_id, execution.status);
    }
    Ok(())
}

/// Print one line per finished action until the execution ends.
async fn print_progress(mut events: broadcast::Receiver<ConductorEvent>) {
    loop {
        match events.recv().await {
            Ok(ConductorEvent::ExecutionStarted {
                execution_id,
                workflow_name,
                ..
            }) => {
                println!();
                println!(
                    "  Running '{}' ({})",
                    style(workflow_name).cyan(),
                    short_id(&execution_id)
                );
                println!();
            }
            Ok(ConductorEvent::ActionFinished {
                action_id,
                status,
                duration_ms,
                ..
            }) => {
                let mark = if status.is_successful() {
                    style("✓").green()
                } else {
                    style("✗").red()
                };
                println!("  {mark} {action_id} {status} ({duration_ms} ms)");
            }
            Ok(
                ConductorEvent::ExecutionCompleted { .. }
                | ConductorEvent::ExecutionFailed { .. }
                | ConductorEvent::ExecutionCancelled { .. },
            ) => break,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::debug!(skipped = n, "progress output lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

pub async fn list(
    state: &AppState,
    workflow_id: Uuid,
    status: Option<&str>,
    limit: usize,
    out: Output,
) -> Result<()> {
    let mut filter = ExecutionFilter::for_workflow(workflow_id);
    filter.status = status
        .map(|s| s.parse::<ExecutionStatus>().map_err(anyhow::Error::msg))
        .transpose()?;
    let executions = state.workflows.executions(&filter, limit, 0).await?;

    if out.json {
        let rows: Vec<_> = executions.iter().map(summary_json).collect();
        return out.print_json(&rows);
    }
    if !out.is_text() {
        return Ok(());
    }

    if executions.is_empty() {
        println!();
        println!("  No executions for workflow {workflow_id}.");
        println!();
        return Ok(());
    }

    let mut t = table(vec![
        Cell::new("Execution").fg(Color::Cyan),
        Cell::new("Status"),
        Cell::new("Actions"),
        Cell::new("Started"),
        Cell::new("Duration"),
        Cell::new("Correlation"),
    ]);
    for e in &executions {
        t.add_row(vec![
            Cell::new(short_id(&e.execution_id)),
            execution_status_cell(e.status),
            Cell::new(e.results.len()),
            Cell::new(e.started_at.map(format_time).unwrap_or_else(|| "-".into())),
            Cell::new(
                e.duration_ms()
                    .map(|ms| format!("{ms} ms"))
                    .unwrap_or_else(|| "-".into()),
            ),
            Cell::new(e.correlation_id.as_deref().unwrap_or("-")),
        ]);
    }
    println!();
    println!("{t}");
    println!();
    Ok(())
}

pub async fn show(state: &AppState, execution_id: Uuid, out: Output) -> Result<()> {
    let execution = state.workflows.execution(execution_id).await?;
    render_execution(&execution, out)
}

pub async fn cancel(state: &AppState, execution_id: Uuid, out: Output) -> Result<()> {
    state
        .workflows
        .cancel(execution_id)
        .await
        .with_context(|| format!("failed to cancel execution {execution_id}"))?;

    if out.json {
        out.print_json(&json!({ "execution_id": execution_id, "status": ExecutionStatus::Cancelled }))?;
    } else if out.is_text() {
        println!("  {} Cancelled execution {execution_id}", style("*").green().bold());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn summary_json(e: &WorkflowExecution) -> Value {
    json!({
        "execution_id": e.execution_id,
        "workflow_id": e.workflow_id,
        "status": e.status,
        "actions": e.results.len(),
        "started_at": e.started_at,
        "completed_at": e.completed_at,
        "duration_ms": e.duration_ms(),
        "correlation_id": e.correlation_id,
        "error": e.error_message,
    })
}

fn render_execution(execution: &WorkflowExecution, out: Output) -> Result<()> {
    if out.json {
        return out.print_json(execution);
    }
    if !out.is_text() {
        return Ok(());
    }

    println!();
    println!(
        "  {} {}",
        style("Execution:").bold(),
        style(execution.execution_id).cyan()
    );
    println!("  Workflow: {}", execution.workflow_id);
    println!("  Status: {}", execution.status);
    if let Some(started) = execution.started_at {
        println!("  Started: {}", format_time(started));
    }
    if let Some(ms) = execution.duration_ms() {
        println!("  Duration: {ms} ms");
    }
    if let Some(id) = &execution.correlation_id {
        println!("  Correlation: {id}");
    }
    if let Some(err) = &execution.error_message {
        println!("  Error: {}", style(err).red());
    }

    if !execution.results.is_empty() {
        let mut results: Vec<_> = execution.results.values().collect();
        results.sort_by(|a, b| a.action_id().cmp(b.action_id()));

        let mut t = table(vec![
            Cell::new("Action").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Time (ms)"),
            Cell::new("Output / error"),
        ]);
        for r in results {
            let detail = match (r.output(), r.error_message()) {
                (_, Some(err)) => err.to_string(),
                (Some(output), None) => preview(output, 60),
                (None, None) => "-".to_string(),
            };
            t.add_row(vec![
                Cell::new(r.action_id()),
                action_status_cell(r.status()),
                Cell::new(r.execution_time_ms()),
                Cell::new(detail),
            ]);
        }
        println!();
        println!("{t}");
    }
    println!();
    Ok(())
}
