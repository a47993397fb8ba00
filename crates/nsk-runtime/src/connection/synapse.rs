//! Synapse model registry

use crate::error::{KernelError, Result};
use nsk_wire::SynId;
use serde::{Deserialize, Serialize};

/// Static spiking synapse
pub const STATIC_SYNAPSE: &str = "static_synapse";
/// Connection carrying secondary (rate) values
pub const RATE_CONNECTION: &str = "rate_connection";

/// Event type a synapse model transmits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SynapseKind {
    /// Spikes, exchanged as SpikeData every cycle
    Spiking,
    /// Continuous values, exchanged in secondary frames
    Secondary,
}

/// A registered synapse model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynapseModel {
    /// Model name
    pub name: String,
    /// Transmitted event type
    pub kind: SynapseKind,
    /// Weight when a connect call gives none
    pub default_weight: f64,
    /// Delay (ms) when a connect call gives none
    pub default_delay_ms: f64,
}

/// Defaults overridden by [`SynapseRegistry::copy_model`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SynapseDefaults {
    /// New default weight
    pub weight: Option<f64>,
    /// New default delay (ms)
    pub delay_ms: Option<f64>,
}

/// Synapse model and per-call parameters of a connect request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynapseSpec {
    /// Model name
    pub model: String,
    /// Weight, or the model default
    #[serde(default)]
    pub weight: Option<f64>,
    /// Delay in ms, or the model default
    #[serde(default)]
    pub delay_ms: Option<f64>,
}

impl Default for SynapseSpec {
    fn default() -> Self {
        Self::new(STATIC_SYNAPSE)
    }
}

impl SynapseSpec {
    /// Spec using model defaults
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            weight: None,
            delay_ms: None,
        }
    }

    /// Set weight
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Set delay
    pub fn with_delay(mut self, delay_ms: f64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }
}

/// Synapse models indexed by [`SynId`]. Registration order is replicated on
/// every rank, so ids agree everywhere.
#[derive(Debug, Clone)]
pub struct SynapseRegistry {
    models: Vec<SynapseModel>,
}

impl Default for SynapseRegistry {
    fn default() -> Self {
        Self {
            models: vec![
                SynapseModel {
                    name: STATIC_SYNAPSE.to_string(),
                    kind: SynapseKind::Spiking,
                    default_weight: 1.0,
                    default_delay_ms: 1.0,
                },
                SynapseModel {
                    name: RATE_CONNECTION.to_string(),
                    kind: SynapseKind::Secondary,
                    default_weight: 1.0,
                    default_delay_ms: 1.0,
                },
            ],
        }
    }
}

impl SynapseRegistry {
    /// Resolve a model name
    pub fn lookup(&self, name: &str) -> Result<SynId> {
        self.models
            .iter()
            .position(|m| m.name == name)
            .map(|i| SynId::new(i as u16))
            .ok_or_else(|| KernelError::unknown_synapse(name))
    }

    /// Model by id
    pub fn model(&self, syn: SynId) -> &SynapseModel {
        &self.models[syn.index()]
    }

    /// Number of registered models
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Always false: the built-ins cannot be removed
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// All models in id order
    pub fn iter(&self) -> impl Iterator<Item = (SynId, &SynapseModel)> {
        self.models
            .iter()
            .enumerate()
            .map(|(i, m)| (SynId::new(i as u16), m))
    }

    /// Register `new_name` as a copy of `existing` with changed defaults
    pub fn copy_model(&mut self, existing: &str, new_name: &str, defaults: SynapseDefaults) -> Result<SynId> {
        let source = self.model(self.lookup(existing)?).clone();
        if self.lookup(new_name).is_ok() {
            return Err(KernelError::invalid_parameter(
                "synapse model",
                new_name,
                "a name not yet registered",
            ));
        }
        if self.models.len() >= u16::MAX as usize {
            return Err(KernelError::invalid_state("too many synapse models"));
        }
        self.models.push(SynapseModel {
            name: new_name.to_string(),
            kind: source.kind,
            default_weight: defaults.weight.unwrap_or(source.default_weight),
            default_delay_ms: defaults.delay_ms.unwrap_or(source.default_delay_ms),
        });
        Ok(SynId::new((self.models.len() - 1) as u16))
    }
}
