//! Conductor CLI entry point.
//!
//! Binary name: `cndr`
//!
//! Parses arguments, sets up logging, loads configuration from the data
//! directory, then dispatches to a command handler. Commands that only read a
//! workflow file never open the database.

mod cli;
mod state;

use anyhow::Context;
use clap::Parser;
use clap_complete::generate;
use conductor_infra::config::{load_config, resolve_data_dir};
use conductor_observe::{LogOptions, init_tracing, shutdown_tracing};

use cli::output::Output;
use cli::workflow::Transition;
use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut log = LogOptions::default().with_verbosity(cli.verbose);
    if cli.quiet && cli.verbose == 0 {
        log.default_level = "error".to_string();
    }
    log.enable_otel = cli.otel;
    init_tracing(&log).map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    let result = dispatch(cli).await;
    shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let out = Output {
        json: cli.json,
        quiet: cli.quiet,
    };

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "cndr", &mut std::io::stdout());
        return Ok(());
    }

    let data_dir = resolve_data_dir().context("cannot locate the data directory")?;
    let config = load_config(&data_dir).await;

    match &cli.command {
        Commands::Validate { file } => return cli::workflow::validate(file, &config, out),
        Commands::Plan { file } => return cli::workflow::plan(file, &config, out),
        _ => {}
    }

    let state = AppState::init(&data_dir, config).await?;
    let result = match cli.command {
        Commands::Import { file, activate } => {
            cli::workflow::import(&state, &file, activate, out).await
        }
        Commands::List { status, tag, limit } => {
            cli::workflow::list(&state, status.as_deref(), tag, limit, out).await
        }
        Commands::Show { id } => cli::workflow::show(&state, id, out).await,
        Commands::Activate { id } => {
            cli::workflow::transition(&state, id, Transition::Activate, out).await
        }
        Commands::Deprecate { id } => {
            cli::workflow::transition(&state, id, Transition::Deprecate, out).await
        }
        Commands::Archive { id } => {
            cli::workflow::transition(&state, id, Transition::Archive, out).await
        }
        Commands::Run {
            id,
            params,
            correlation_id,
            trace_id,
        } => cli::execution::run(&state, id, &params, correlation_id, trace_id, out).await,
        Commands::Executions {
            workflow_id,
            status,
            limit,
        } => cli::execution::list(&state, workflow_id, status.as_deref(), limit, out).await,
        Commands::Execution { id } => cli::execution::show(&state, id, out).await,
        Commands::Cancel { id } => cli::execution::cancel(&state, id, out).await,
        Commands::Validate { .. } | Commands::Plan { .. } | Commands::Completions { .. } => {
            unreachable!("handled above")
        }
    };

    state.db_pool.close().await;
    result
}
