//! Node collaborators
//!
//! The kernel does not integrate neuron equations. It owns node objects,
//! calls [`Node::update`] once per step with the input that arrived for that
//! step, and routes whatever the node emits. The built-in models in
//! [`models`] exist to drive and observe delivery; real models register
//! through [`NodeModelRegistry::register`].

pub mod models;
pub mod ring_buffer;
pub mod store;

pub use ring_buffer::RingBuffer;
pub use store::{NodeSlot, NodeStore};

use crate::error::{KernelError, Result};
use crate::synaptic::{CalciumParams, SynapticElementParams};
use crate::time::Step;
use nsk_wire::NodeId;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Where in time an update happens
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepContext {
    /// Absolute step being updated
    pub step: Step,
    /// Lag of the step within the current min-delay cycle
    pub lag: Step,
    /// Step length (ms)
    pub resolution_ms: f64,
}

/// Spike that arrived with a sub-step offset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreciseSpike {
    /// Time from the spike to the end of its step (ms)
    pub offset_ms: f64,
    /// Connection weight times multiplicity
    pub weight: f64,
    /// Spikes carried
    pub multiplicity: u16,
}

/// Input arriving at one step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepInput {
    /// Summed weight of arriving spikes
    pub spike_weight: f64,
    /// Number of arriving spikes (sum of multiplicities)
    pub spike_count: u32,
    /// Off-grid spikes, in delivery order
    pub precise: Vec<PreciseSpike>,
    /// Summed secondary input
    pub secondary: f64,
}

impl StepInput {
    /// Nothing arrived
    pub fn is_empty(&self) -> bool {
        self.spike_count == 0 && self.precise.is_empty() && self.secondary == 0.0 && self.spike_weight == 0.0
    }
}

/// Spike emitted during an update
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpikeEmission {
    /// Spikes emitted at once
    pub multiplicity: u16,
    /// Time from the spike to the end of the step (ms), 0 on the grid
    pub offset_ms: f64,
}

impl SpikeEmission {
    /// Grid-aligned emission
    pub fn on_grid(multiplicity: u16) -> Self {
        Self {
            multiplicity,
            offset_ms: 0.0,
        }
    }
}

/// What a node emitted for one step
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NodeOutput {
    /// Spike, if any
    pub spike: Option<SpikeEmission>,
    /// Secondary (continuous) value, if any
    pub secondary: Option<f64>,
}

impl NodeOutput {
    /// Emit nothing
    pub fn silent() -> Self {
        Self::default()
    }

    /// Emit a grid-aligned spike
    pub fn spike(multiplicity: u16) -> Self {
        Self {
            spike: Some(SpikeEmission::on_grid(multiplicity)),
            secondary: None,
        }
    }
}

/// A neuron or device hosted by the kernel
pub trait Node: Send + fmt::Debug {
    /// Registered model name
    fn model(&self) -> &str;

    /// Advance one step
    fn update(&mut self, ctx: &StepContext, input: StepInput) -> NodeOutput;

    /// Downcast support for inspecting concrete models
    fn as_any(&self) -> &dyn Any;
}

/// Parameters for creating nodes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeParams {
    /// Spike times of a spike generator (ms)
    pub spike_times_ms: Vec<f64>,
    /// Emit spike generator times off the grid
    pub precise_times: bool,
    /// Poisson generator rate (Hz)
    pub rate_hz: f64,
    /// Rate source output value
    pub amplitude: f64,
    /// Calcium trace driving synaptic element growth
    pub calcium: CalciumParams,
    /// Synaptic elements by name
    pub synaptic_elements: BTreeMap<String, SynapticElementParams>,
}

impl NodeParams {
    /// Set spike generator times
    pub fn with_spike_times(mut self, times_ms: Vec<f64>) -> Self {
        self.spike_times_ms = times_ms;
        self
    }

    /// Emit spike generator times off the grid
    pub fn with_precise_times(mut self, precise: bool) -> Self {
        self.precise_times = precise;
        self
    }

    /// Set poisson rate
    pub fn with_rate_hz(mut self, rate_hz: f64) -> Self {
        self.rate_hz = rate_hz;
        self
    }

    /// Set rate source output
    pub fn with_amplitude(mut self, amplitude: f64) -> Self {
        self.amplitude = amplitude;
        self
    }

    /// Set calcium dynamics
    pub fn with_calcium(mut self, calcium: CalciumParams) -> Self {
        self.calcium = calcium;
        self
    }

    /// Add a synaptic element
    pub fn with_element(mut self, name: impl Into<String>, params: SynapticElementParams) -> Self {
        self.synaptic_elements.insert(name.into(), params);
        self
    }
}

/// Facts a factory may use when building a node
#[derive(Debug, Clone, Copy)]
pub struct NodeContext {
    /// Id of the node being built
    pub node_id: NodeId,
    /// Kernel seed
    pub seed: u64,
    /// Step length (ms)
    pub resolution_ms: f64,
}

/// Builds a node from parameters
pub type NodeFactory = Arc<dyn Fn(&NodeParams, &NodeContext) -> Result<Box<dyn Node>> + Send + Sync>;

/// Registered node models
#[derive(Clone)]
pub struct NodeModelRegistry {
    factories: HashMap<String, NodeFactory>,
}

impl fmt::Debug for NodeModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("NodeModelRegistry").field("models", &names).finish()
    }
}

impl Default for NodeModelRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl NodeModelRegistry {
    /// Registry holding the built-in models
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        models::register_builtins(&mut registry);
        registry
    }

    /// Register or replace a model
    pub fn register(&mut self, name: impl Into<String>, factory: NodeFactory) {
        let name = name.into();
        log::debug!(target: "nsk::kernel", "registered node model {}", name);
        self.factories.insert(name, factory);
    }

    /// Whether a model is registered
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Look up a factory
    pub fn factory(&self, name: &str) -> Result<&NodeFactory> {
        self.factories
            .get(name)
            .ok_or_else(|| KernelError::UnknownNodeModel { name: name.to_string() })
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}
