//! K20s resource optimizer CLI
//!
//! Offline tooling for the optimizer: dry-run a profile against sample
//! utilization and compute vertical resizes.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{evaluate, resize};

/// K20s resource optimizer CLI
#[derive(Parser)]
#[command(name = "k20s")]
#[command(author, version, about = "CLI for the K20s resource optimizer", long_about = None)]
pub struct Cli {
    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one evaluation cycle for a profile without touching a cluster
    Evaluate(evaluate::EvaluateArgs),

    /// Compute the cpu request a Resize profile would set
    Resize(resize::ResizeArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Evaluate(args) => evaluate::run(args, cli.format).await?,
        Commands::Resize(args) => resize::run(args, cli.format)?,
    }

    Ok(())
}
