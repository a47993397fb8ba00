//! Building an experiment on a kernel and summarising what happened

use nsk_runtime::node::models::{InputProbe, INPUT_PROBE};
use nsk_runtime::{steps_to_ms, DeliveryStats, Kernel, KernelError, NodeId, Result};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::ExperimentConfig;
use crate::error::{CliError, CliResult};

/// Node ids of every population, by name
pub type Populations = BTreeMap<String, Vec<NodeId>>;

/// Create populations, connect projections and install plasticity rules.
/// Runs on every rank with the same experiment.
pub fn build(k: &mut Kernel, experiment: &ExperimentConfig) -> Result<Populations> {
    let mut populations = Populations::new();
    for population in &experiment.populations {
        let ids = k.create(&population.model, population.size, &population.params)?;
        populations.insert(population.name.clone(), ids);
    }

    for projection in &experiment.projections {
        let (Some(sources), Some(targets)) = (
            populations.get(&projection.source),
            populations.get(&projection.target),
        ) else {
            return Err(KernelError::invalid_parameter(
                "projection",
                format!("{} -> {}", projection.source, projection.target),
                "populations defined in the experiment",
            ));
        };
        k.connect(sources, targets, &projection.rule, &projection.synapse)?;
    }

    for rule in &experiment.plasticity {
        k.add_structural_plasticity_rule(rule.clone())?;
    }
    if !experiment.plasticity.is_empty() {
        k.enable_structural_plasticity()?;
    }
    Ok(populations)
}

/// Kernel-wide values every rank agrees on
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct KernelView {
    /// Ranks used
    pub ranks: usize,
    /// Threads per rank
    pub threads: usize,
    /// Simulated time reached (ms)
    pub time_ms: f64,
    /// Connectivity generation at the end
    pub fingerprint: u64,
    /// Minimum delay (ms)
    pub min_delay_ms: f64,
    /// Maximum delay (ms)
    pub max_delay_ms: f64,
    /// Structural plasticity updates performed
    pub structural_updates: u64,
}

impl KernelView {
    fn of(k: &Kernel) -> Self {
        let extrema = k.delay_extrema();
        let h = k.config().resolution_ms;
        Self {
            ranks: k.num_ranks(),
            threads: k.num_threads(),
            time_ms: k.time_ms(),
            fingerprint: k.fingerprint().raw(),
            min_delay_ms: steps_to_ms(extrema.min(), h),
            max_delay_ms: steps_to_ms(extrema.max(), h),
            structural_updates: k.structural_plasticity_updates(),
        }
    }
}

/// What one rank saw
#[derive(Debug, Clone, Serialize)]
pub struct RankReport {
    /// Rank
    pub rank: usize,
    /// Nodes owned
    pub local_nodes: usize,
    /// Connections held
    pub local_connections: usize,
    /// Local nodes per worker thread
    pub nodes_per_thread: Vec<usize>,
    /// Delivery counters
    pub delivery: DeliveryStats,
    /// Bytes sent through the communicator
    pub bytes_sent: u64,
    /// Spikes received by local input probes, per population
    pub probe_spikes: BTreeMap<String, u64>,
    /// Kernel-wide values as this rank sees them
    #[serde(skip)]
    pub kernel: KernelView,
}

impl RankReport {
    /// Collect the report of `k`
    pub fn collect(k: &Kernel, experiment: &ExperimentConfig, populations: &Populations) -> Self {
        let vp = k.vp();
        let local = k.local_nodes();
        let mut nodes_per_thread = vec![0; k.num_threads()];
        for id in &local {
            nodes_per_thread[vp.node_id_to_thread(*id)] += 1;
        }

        let mut probe_spikes = BTreeMap::new();
        for population in experiment.populations.iter().filter(|p| p.model == INPUT_PROBE) {
            let spikes = populations
                .get(&population.name)
                .into_iter()
                .flatten()
                .filter_map(|id| k.node::<InputProbe>(*id))
                .map(InputProbe::total_spikes)
                .sum();
            probe_spikes.insert(population.name.clone(), spikes);
        }

        Self {
            rank: k.rank(),
            local_nodes: local.len(),
            local_connections: k.num_local_connections(),
            nodes_per_thread,
            delivery: k.delivery_stats(),
            bytes_sent: k.comm_stats().bytes_sent,
            probe_spikes,
            kernel: KernelView::of(k),
        }
    }
}

/// Population as reported
#[derive(Debug, Clone, Serialize)]
pub struct PopulationReport {
    /// Name
    pub name: String,
    /// Node model
    pub model: String,
    /// First id
    pub first: NodeId,
    /// Last id
    pub last: NodeId,
}

/// Whole-run summary
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Experiment name
    pub experiment: String,
    /// Kernel-wide values
    #[serde(flatten)]
    pub kernel: KernelView,
    /// Connections on all ranks
    pub connections: usize,
    /// Spikes received by input probes, per population
    pub probe_spikes: BTreeMap<String, u64>,
    /// Populations
    pub populations: Vec<PopulationReport>,
    /// Per-rank details
    pub per_rank: Vec<RankReport>,
}

impl RunSummary {
    /// Combine the reports of all ranks, in rank order
    pub fn new(experiment: &ExperimentConfig, populations: &Populations, per_rank: Vec<RankReport>) -> CliResult<Self> {
        let kernel = per_rank
            .first()
            .map(|r| r.kernel)
            .ok_or_else(|| CliError::config("no rank reported"))?;
        if let Some(other) = per_rank.iter().find(|r| r.kernel != kernel) {
            return Err(CliError::config(format!(
                "rank {} disagrees with rank 0: {:?} vs {:?}",
                other.rank, other.kernel, kernel
            )));
        }

        let mut probe_spikes: BTreeMap<String, u64> = BTreeMap::new();
        for report in &per_rank {
            for (name, spikes) in &report.probe_spikes {
                *probe_spikes.entry(name.clone()).or_default() += spikes;
            }
        }

        Ok(Self {
            experiment: experiment.name.clone(),
            kernel,
            connections: per_rank.iter().map(|r| r.local_connections).sum(),
            probe_spikes,
            populations: experiment
                .populations
                .iter()
                .filter_map(|p| {
                    let ids = populations.get(&p.name)?;
                    Some(PopulationReport {
                        name: p.name.clone(),
                        model: p.model.clone(),
                        first: *ids.first()?,
                        last: *ids.last()?,
                    })
                })
                .collect(),
            per_rank,
        })
    }
}
