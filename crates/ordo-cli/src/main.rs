//! Ordo command-line entry point.
//!
//! Binary name: `ordo`
//!
//! Parses CLI arguments, loads configuration, installs tracing, then
//! dispatches to the command handler.

mod cli;
mod demo;
mod state;

use clap::Parser;
use ordo_infra::config::{default_data_dir, load_engine_config};
use ordo_observe::tracing_setup::{TracingOptions, filter_for_verbosity, init_tracing, shutdown_tracing};

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    let config = load_engine_config(&data_dir).await;

    init_tracing(&TracingOptions {
        default_filter: filter_for_verbosity(cli.verbose, cli.quiet).to_string(),
        json: cli.log_json,
        enable_otel: cli.otel || config.enable_otel,
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = match cli.command {
        Commands::RollbackPlan { file, stage_fqn } => {
            cli::rollback::handle_rollback_plan(&file, stage_fqn.as_deref(), cli.json)
        }
        Commands::Executions { plan_execution_id } => {
            let state = AppState::init(data_dir, config).await?;
            cli::executions::handle_executions(&state, &plan_execution_id, cli.json).await
        }
        Commands::Demo { fail } => {
            let state = AppState::init(data_dir, config).await?;
            cli::demo::handle_demo(&state, fail, cli.json).await
        }
    };

    shutdown_tracing();
    result
}
