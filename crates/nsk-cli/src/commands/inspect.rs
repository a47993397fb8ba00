//! Experiment inspection command

use clap::Args;
use nsk_runtime::run_cluster;
use std::path::PathBuf;
use tracing::info;

use super::{apply_overrides, emit};
use crate::config::ExperimentConfig;
use crate::error::CliResult;
use crate::network::{build, RankReport, RunSummary};

/// Build an experiment and report its layout without simulating
#[derive(Args, Debug)]
pub struct InspectCommand {
    /// Experiment file
    pub experiment: PathBuf,

    /// Override the number of ranks
    #[arg(long)]
    pub ranks: Option<usize>,

    /// Override the number of threads per rank
    #[arg(long)]
    pub threads: Option<usize>,

    /// Print the parsed experiment as TOML instead of building it
    #[arg(long)]
    pub config_only: bool,

    /// Write the JSON report here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl InspectCommand {
    pub fn execute(self) -> CliResult<()> {
        let mut experiment = ExperimentConfig::load(&self.experiment)?;
        apply_overrides(&mut experiment, self.ranks, self.threads)?;
        if self.config_only {
            return emit(&toml::to_string_pretty(&experiment)?, self.output.as_ref());
        }

        info!("Inspecting {}", experiment.name);
        let per_rank = run_cluster(experiment.run.ranks, &experiment.kernel, |k| {
            let populations = build(k, &experiment)?;
            k.prepare()?;
            let report = RankReport::collect(k, &experiment, &populations);
            Ok((populations, report))
        })?;

        let populations = per_rank
            .first()
            .map(|(p, _)| p.clone())
            .unwrap_or_default();
        let reports = per_rank.into_iter().map(|(_, r)| r).collect();
        let summary = RunSummary::new(&experiment, &populations, reports)?;
        for report in &summary.per_rank {
            info!(
                "rank {}: {} nodes {:?} per thread, {} connections",
                report.rank, report.local_nodes, report.nodes_per_thread, report.local_connections
            );
        }

        emit(&serde_json::to_string_pretty(&summary)?, self.output.as_ref())
    }
}
