//! Experiment files
//!
//! An experiment is one TOML file: kernel settings, node populations,
//! projections between them, optional structural plasticity rules and the
//! run length.

use nsk_runtime::node::models::{INPUT_PROBE, POISSON_GENERATOR, SPIKE_GENERATOR};
use nsk_runtime::{
    ConnectionRule, KernelConfig, NodeParams, StructuralPlasticityRule, SynapseSpec,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{CliError, CliResult};

/// How long and on how many ranks to run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Simulated time (ms)
    pub duration_ms: f64,
    /// In-process ranks
    pub ranks: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            duration_ms: 100.0,
            ranks: 1,
        }
    }
}

/// A group of nodes sharing model and parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Population {
    /// Name used by projections
    pub name: String,
    /// Registered node model
    pub model: String,
    /// Number of nodes
    pub size: usize,
    /// Model parameters
    #[serde(default)]
    pub params: NodeParams,
}

/// Connections from one population to another
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    /// Source population
    pub source: String,
    /// Target population
    pub target: String,
    /// Connectivity rule
    pub rule: ConnectionRule,
    /// Synapse model and parameters
    #[serde(default)]
    pub synapse: SynapseSpec,
}

/// A complete experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Experiment name
    pub name: String,
    /// Kernel settings
    #[serde(default)]
    pub kernel: KernelConfig,
    /// Run settings
    #[serde(default)]
    pub run: RunConfig,
    /// Populations in creation order
    #[serde(default)]
    pub populations: Vec<Population>,
    /// Projections in connect order
    #[serde(default)]
    pub projections: Vec<Projection>,
    /// Structural plasticity rules; plasticity is enabled when any is given
    #[serde(default)]
    pub plasticity: Vec<StructuralPlasticityRule>,
}

impl ExperimentConfig {
    /// Load and validate an experiment file
    pub fn load(path: &Path) -> CliResult<Self> {
        if !path.exists() {
            return Err(CliError::config(format!(
                "experiment file {} does not exist",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write as TOML
    pub fn save(&self, path: &Path) -> CliResult<()> {
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Check what the kernel cannot check before the first collective call
    pub fn validate(&self) -> CliResult<()> {
        self.kernel.validate()?;
        if self.run.ranks == 0 {
            return Err(CliError::config("run.ranks must be at least 1"));
        }
        if !(self.run.duration_ms >= 0.0 && self.run.duration_ms.is_finite()) {
            return Err(CliError::config(format!(
                "run.duration_ms must be finite and >= 0, got {}",
                self.run.duration_ms
            )));
        }

        let mut names = HashSet::new();
        for population in &self.populations {
            if population.size == 0 {
                return Err(CliError::config(format!("population {} is empty", population.name)));
            }
            if !names.insert(population.name.as_str()) {
                return Err(CliError::config(format!(
                    "population {} is defined twice",
                    population.name
                )));
            }
        }
        for projection in &self.projections {
            for end in [&projection.source, &projection.target] {
                if !names.contains(end.as_str()) {
                    return Err(CliError::config(format!(
                        "projection {} -> {} names unknown population {}",
                        projection.source, projection.target, end
                    )));
                }
            }
        }
        Ok(())
    }

    /// Small feed-forward network written by `nsk init`
    pub fn example(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kernel: KernelConfig::default().with_threads(2),
            run: RunConfig {
                duration_ms: 50.0,
                ranks: 2,
            },
            populations: vec![
                Population {
                    name: "stimulus".to_string(),
                    model: SPIKE_GENERATOR.to_string(),
                    size: 2,
                    params: NodeParams::default().with_spike_times(vec![5.0, 10.0, 15.0]),
                },
                Population {
                    name: "noise".to_string(),
                    model: POISSON_GENERATOR.to_string(),
                    size: 8,
                    params: NodeParams::default().with_rate_hz(20.0),
                },
                Population {
                    name: "readout".to_string(),
                    model: INPUT_PROBE.to_string(),
                    size: 4,
                    params: NodeParams::default(),
                },
            ],
            projections: vec![
                Projection {
                    source: "stimulus".to_string(),
                    target: "readout".to_string(),
                    rule: ConnectionRule::all_to_all(),
                    synapse: SynapseSpec::default().with_weight(1.0).with_delay(1.5),
                },
                Projection {
                    source: "noise".to_string(),
                    target: "readout".to_string(),
                    rule: ConnectionRule::FixedIndegree {
                        indegree: 3,
                        allow_autapses: false,
                        allow_multapses: true,
                    },
                    synapse: SynapseSpec::default().with_weight(0.2).with_delay(2.0),
                },
            ],
            plasticity: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_survives_toml() {
        let example = ExperimentConfig::example("demo");
        let text = toml::to_string_pretty(&example).unwrap();
        let parsed: ExperimentConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, example);
        parsed.validate().unwrap();
    }

    #[test]
    fn minimal_file_uses_defaults() {
        let text = r#"
            name = "tiny"

            [[populations]]
            name = "a"
            model = "parrot_neuron"
            size = 3

            [[projections]]
            source = "a"
            target = "a"
            rule = { rule = "one_to_one" }
        "#;
        let config: ExperimentConfig = toml::from_str(text).unwrap();
        config.validate().unwrap();
        assert_eq!(config.run, RunConfig::default());
        assert_eq!(config.projections[0].synapse, SynapseSpec::default());
        assert_eq!(config.kernel, KernelConfig::default());
    }

    #[test]
    fn unknown_population_rejected() {
        let mut config = ExperimentConfig::example("demo");
        config.projections[0].target = "missing".to_string();
        assert!(matches!(config.validate(), Err(CliError::Config(_))));
    }
}
