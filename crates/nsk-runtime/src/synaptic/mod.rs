//! Synaptic elements and the calcium trace that drives their growth

pub mod growth_curve;

pub use growth_curve::{GrowthCurve, GrowthCurveRegistry, GrowthCurveSpec};

use crate::error::{KernelError, Result};
use serde::{Deserialize, Serialize};

/// Parameters of one synaptic element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynapticElementParams {
    /// Growth curve
    pub growth_curve: GrowthCurveSpec,
    /// Growth rate ν (elements per ms at peak)
    pub growth_rate: f64,
    /// Fraction of vacant elements lost per plasticity update
    pub tau_vacant: f64,
    /// Initial element count
    pub z: f64,
}

impl Default for SynapticElementParams {
    fn default() -> Self {
        Self {
            growth_curve: GrowthCurveSpec::default(),
            growth_rate: 0.0001,
            tau_vacant: 0.1,
            z: 0.0,
        }
    }
}

impl SynapticElementParams {
    /// Set the growth curve
    pub fn with_curve(mut self, curve: GrowthCurveSpec) -> Self {
        self.growth_curve = curve;
        self
    }

    /// Set the growth rate
    pub fn with_growth_rate(mut self, growth_rate: f64) -> Self {
        self.growth_rate = growth_rate;
        self
    }

    /// Set vacant decay
    pub fn with_tau_vacant(mut self, tau_vacant: f64) -> Self {
        self.tau_vacant = tau_vacant;
        self
    }

    /// Set the initial count
    pub fn with_z(mut self, z: f64) -> Self {
        self.z = z;
        self
    }
}

/// Element counts reported to collaborators
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementCounts {
    /// Elements available for new synapses
    pub vacant: u32,
    /// Elements part of a synapse
    pub bound: u32,
    /// Bound elements that must be released
    pub deleted: u32,
}

/// A named, countable connection slot of a node
#[derive(Debug)]
pub struct SynapticElement {
    z: f64,
    bound: u32,
    growth_rate: f64,
    tau_vacant: f64,
    curve: Box<dyn GrowthCurve>,
}

impl SynapticElement {
    /// Build an element, resolving its growth curve
    pub fn new(params: &SynapticElementParams, curves: &GrowthCurveRegistry) -> Result<Self> {
        if !(params.z >= 0.0) {
            return Err(KernelError::invalid_parameter("z", params.z.to_string(), ">= 0"));
        }
        if !(0.0..=1.0).contains(&params.tau_vacant) {
            return Err(KernelError::invalid_parameter(
                "tau_vacant",
                params.tau_vacant.to_string(),
                "in [0, 1]",
            ));
        }
        Ok(Self {
            z: params.z,
            bound: 0,
            growth_rate: params.growth_rate,
            tau_vacant: params.tau_vacant,
            curve: curves.build(&params.growth_curve)?,
        })
    }

    /// Continuous element count
    pub fn z(&self) -> f64 {
        self.z
    }

    /// Set the continuous element count
    pub fn set_z(&mut self, z: f64) {
        self.z = z.max(0.0);
    }

    /// Current counts
    pub fn counts(&self) -> ElementCounts {
        let whole = self.z.floor() as i64;
        let bound = self.bound as i64;
        ElementCounts {
            vacant: (whole - bound).max(0) as u32,
            bound: self.bound,
            deleted: (bound - whole).max(0) as u32,
        }
    }

    /// Grow for `dt_ms` at the given calcium level
    pub fn grow(&mut self, calcium: f64, dt_ms: f64) {
        let dz = self.curve.rate(calcium, self.growth_rate) * dt_ms;
        self.z = (self.z + dz).max(0.0);
    }

    /// Lose a fraction of the vacant elements
    pub fn decay_vacant(&mut self) {
        let vacant = self.counts().vacant as f64;
        self.z = (self.z - self.tau_vacant * vacant).max(0.0);
    }

    /// Bind `n` elements to new synapses
    pub fn connect(&mut self, n: u32) {
        self.bound += n;
    }

    /// Release `n` bound elements
    pub fn disconnect(&mut self, n: u32) {
        self.bound = self.bound.saturating_sub(n);
    }

    /// Name of the growth curve in use
    pub fn curve_name(&self) -> &str {
        self.curve.name()
    }
}

/// Calcium dynamics of a node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalciumParams {
    /// Increment per spike
    pub beta_ca: f64,
    /// Decay time constant (ms)
    pub tau_ca: f64,
}

impl Default for CalciumParams {
    fn default() -> Self {
        Self {
            beta_ca: 0.001,
            tau_ca: 10_000.0,
        }
    }
}

/// Exponentially decaying spike-driven calcium trace
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalciumTrace {
    calcium: f64,
    beta_ca: f64,
    decay: f64,
}

impl CalciumTrace {
    /// Create a trace at zero
    pub fn new(params: &CalciumParams, resolution_ms: f64) -> Result<Self> {
        if !(params.tau_ca > 0.0) {
            return Err(KernelError::invalid_parameter("tau_ca", params.tau_ca.to_string(), "> 0"));
        }
        Ok(Self {
            calcium: 0.0,
            beta_ca: params.beta_ca,
            decay: (-resolution_ms / params.tau_ca).exp(),
        })
    }

    /// Current level
    pub fn level(&self) -> f64 {
        self.calcium
    }

    /// Advance one step with `spikes` emitted in it
    pub fn step(&mut self, spikes: u16) {
        self.calcium = self.calcium * self.decay + self.beta_ca * spikes as f64;
    }
}
