//! Simulation command

use clap::Args;
use nsk_runtime::run_cluster;
use std::path::PathBuf;
use tracing::info;

use super::{apply_overrides, emit};
use crate::config::ExperimentConfig;
use crate::error::CliResult;
use crate::network::{build, RankReport, RunSummary};

/// Build and simulate an experiment
#[derive(Args, Debug)]
pub struct SimulateCommand {
    /// Experiment file
    pub experiment: PathBuf,

    /// Override the number of ranks
    #[arg(long)]
    pub ranks: Option<usize>,

    /// Override the number of threads per rank
    #[arg(long)]
    pub threads: Option<usize>,

    /// Override the simulated time (ms)
    #[arg(long)]
    pub duration_ms: Option<f64>,

    /// Write the JSON summary here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl SimulateCommand {
    pub fn execute(self) -> CliResult<()> {
        let mut experiment = ExperimentConfig::load(&self.experiment)?;
        if let Some(duration_ms) = self.duration_ms {
            experiment.run.duration_ms = duration_ms;
        }
        apply_overrides(&mut experiment, self.ranks, self.threads)?;

        info!(
            "Simulating {} for {} ms on {} ranks x {} threads",
            experiment.name, experiment.run.duration_ms, experiment.run.ranks, experiment.kernel.num_threads
        );
        let per_rank = run_cluster(experiment.run.ranks, &experiment.kernel, |k| {
            let populations = build(k, &experiment)?;
            k.simulate(experiment.run.duration_ms)?;
            let report = RankReport::collect(k, &experiment, &populations);
            Ok((populations, report))
        })?;

        let populations = per_rank
            .first()
            .map(|(p, _)| p.clone())
            .unwrap_or_default();
        let reports = per_rank.into_iter().map(|(_, r)| r).collect();
        let summary = RunSummary::new(&experiment, &populations, reports)?;
        info!(
            "Reached {} ms with {} connections, {} exchange rounds on rank 0",
            summary.kernel.time_ms,
            summary.connections,
            summary.per_rank.first().map_or(0, |r| r.delivery.rounds)
        );

        emit(&serde_json::to_string_pretty(&summary)?, self.output.as_ref())
    }
}
