//! CLI command implementations for nsk

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::error::CliResult;

pub mod init;
pub mod inspect;
pub mod simulate;

/// nsk - distributed spiking network kernel
#[derive(Parser, Debug)]
#[command(
    name = "nsk",
    version,
    about = "Distributed spiking network connection and delivery kernel",
    long_about = "nsk builds spiking networks from TOML experiment files, distributes them \
                  over in-process ranks and worker threads, and simulates them with \
                  min-delay spike exchange and optional structural plasticity."
)]
pub struct NskCli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write an example experiment file
    #[command(alias = "new")]
    Init(init::InitCommand),

    /// Build and simulate an experiment
    #[command(alias = "run")]
    Simulate(simulate::SimulateCommand),

    /// Build an experiment and report its layout without simulating
    Inspect(inspect::InspectCommand),
}

impl NskCli {
    /// Execute the CLI command
    pub fn execute(self) -> CliResult<()> {
        match self.command {
            Commands::Init(cmd) => cmd.execute(),
            Commands::Simulate(cmd) => cmd.execute(),
            Commands::Inspect(cmd) => cmd.execute(),
        }
    }
}

/// Apply command-line overrides to a loaded experiment
pub(crate) fn apply_overrides(
    experiment: &mut crate::config::ExperimentConfig,
    ranks: Option<usize>,
    threads: Option<usize>,
) -> CliResult<()> {
    if let Some(ranks) = ranks {
        experiment.run.ranks = ranks;
    }
    if let Some(threads) = threads {
        experiment.kernel.num_threads = threads;
    }
    experiment.validate()
}

/// Write `text` to `output`, or print it when no path is given
pub(crate) fn emit(text: &str, output: Option<&PathBuf>) -> CliResult<()> {
    match output {
        Some(path) => std::fs::write(path, text)
            .with_context(|| format!("could not write report to {}", path.display()))?,
        None => println!("{}", text),
    }
    Ok(())
}
