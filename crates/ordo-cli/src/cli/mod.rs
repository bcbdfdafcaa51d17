//! CLI command definitions for the `ordo` binary.

pub mod demo;
pub mod executions;
pub mod rollback;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Run and inspect durable node executions.
#[derive(Parser)]
#[command(name = "ordo", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    /// Data directory holding `ordo.toml` and `ordo.db`.
    #[arg(long, env = "ORDO_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the rollback plan of a stage from its YAML definition.
    #[command(name = "rollback-plan")]
    RollbackPlan {
        /// Path to the stage YAML file.
        file: PathBuf,

        /// Fully-qualified name of the stage in the forward plan
        /// (default: `pipeline.stages.<identifier>`).
        #[arg(long)]
        stage_fqn: Option<String>,
    },

    /// List the node executions of a plan execution.
    #[command(alias = "ls")]
    Executions {
        /// Plan execution UUID.
        plan_execution_id: String,
    },

    /// Run the bundled demo pipeline against the local database.
    Demo {
        /// Make the deploy step fail for lack of a capable worker.
        #[arg(long)]
        fail: bool,
    },
}
