//! Experiment file initialization command

use clap::Args;
use std::path::PathBuf;
use tracing::info;

use crate::config::ExperimentConfig;
use crate::error::{CliError, CliResult};

/// Write an example experiment file
#[derive(Args, Debug)]
pub struct InitCommand {
    /// Experiment file to create
    #[arg(default_value = "experiment.toml")]
    pub path: PathBuf,

    /// Experiment name (defaults to the file stem)
    #[arg(long)]
    pub name: Option<String>,

    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

impl InitCommand {
    pub fn execute(self) -> CliResult<()> {
        if self.path.exists() && !self.force {
            return Err(CliError::invalid_args(format!(
                "{} already exists (use --force to overwrite)",
                self.path.display()
            )));
        }
        let name = self.name.clone().unwrap_or_else(|| {
            self.path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "experiment".to_string())
        });

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        ExperimentConfig::example(&name).save(&self.path)?;

        info!("Experiment {} written to {}", name, self.path.display());
        info!("Run 'nsk simulate {}' to simulate it", self.path.display());
        Ok(())
    }
}
