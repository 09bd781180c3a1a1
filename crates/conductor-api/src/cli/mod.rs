//! CLI command definitions for the `cndr` binary.
//!
//! Commands that only read a definition file (`validate`, `plan`) work
//! offline; everything else opens the data directory.

pub mod execution;
pub mod output;
pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use uuid::Uuid;

/// Define, run, and inspect dependency-ordered workflows.
#[derive(Parser)]
#[command(name = "cndr", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed logging (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a workflow file and report every problem found.
    Validate {
        /// Path to a `.yaml`, `.yml`, or `.json` workflow file.
        file: PathBuf,
    },

    /// Show the wave-by-wave execution plan of a workflow file.
    Plan {
        file: PathBuf,
    },

    /// Validate a workflow file and store it as a draft.
    Import {
        file: PathBuf,

        /// Activate the workflow right after importing it.
        #[arg(long)]
        activate: bool,
    },

    /// List stored workflows.
    #[command(alias = "ls")]
    List {
        /// Only workflows in this status (draft, active, deprecated, archived).
        #[arg(long)]
        status: Option<String>,

        /// Only workflows carrying this tag.
        #[arg(long)]
        tag: Option<String>,

        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Show one stored workflow.
    Show {
        id: Uuid,
    },

    /// Make a draft or deprecated workflow executable.
    Activate {
        id: Uuid,
    },

    /// Stop new executions of an active workflow.
    Deprecate {
        id: Uuid,
    },

    /// Archive a workflow permanently.
    Archive {
        id: Uuid,
    },

    /// Execute an active workflow and wait for it to finish.
    Run {
        id: Uuid,

        /// Input parameter as `name=value`; values are parsed as JSON when
        /// possible, otherwise taken as strings. Repeatable.
        #[arg(short, long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,

        #[arg(long)]
        correlation_id: Option<String>,

        #[arg(long)]
        trace_id: Option<String>,
    },

    /// List executions of a workflow, newest first.
    Executions {
        workflow_id: Uuid,

        /// Only executions in this status.
        #[arg(long)]
        status: Option<String>,

        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Show one execution with its per-action results.
    Execution {
        id: Uuid,
    },

    /// Mark a stored, unfinished execution as cancelled.
    Cancel {
        id: Uuid,
    },

    /// Generate shell completions.
    Completions {
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_collects_repeated_params() {
        let id = Uuid::now_v7();
        let cli = Cli::try_parse_from([
            "cndr",
            "--json",
            "run",
            &id.to_string(),
            "-p",
            "order_id=ord-1",
            "--param",
            "qty=3",
            "--correlation-id",
            "c-1",
        ])
        .unwrap();

        assert!(cli.json);
        match cli.command {
            Commands::Run {
                id: parsed,
                params,
                correlation_id,
                trace_id,
            } => {
                assert_eq!(parsed, id);
                assert_eq!(params, vec!["order_id=ord-1", "qty=3"]);
                assert_eq!(correlation_id.as_deref(), Some("c-1"));
                assert!(trace_id.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn verbosity_counts() {
        let cli = Cli::try_parse_from(["cndr", "-vv", "validate", "wf.yaml"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }
}
