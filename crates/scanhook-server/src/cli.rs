use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Webhook-driven dependency scan orchestrator.
#[derive(Parser, Debug)]
#[command(name = "scanhookd")]
#[command(version = scanhook_core::VERSION)]
#[command(about = "Dependency scan orchestrator daemon", long_about = None)]
pub struct Cli {
    /// Path to the configuration file (YAML or JSON).
    #[arg(short, long, global = true, default_value = "config.yaml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Default)]
pub enum Commands {
    /// Run the orchestrator in the foreground (default if no command given).
    #[default]
    Run,

    /// Print build metadata.
    Version {
        #[arg(long)]
        branch: bool,
        #[arg(long)]
        commit: bool,
        #[arg(long)]
        tag: bool,
        #[arg(long)]
        arch: bool,
    },
}
