//! Growth curves: calcium concentration to synaptic element growth rate

use crate::error::{KernelError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Maps (calcium, growth rate) to dz/dt in elements per ms
pub trait GrowthCurve: Send + Sync + fmt::Debug {
    /// Registered name
    fn name(&self) -> &str;

    /// Rate of change of the element count
    fn rate(&self, calcium: f64, growth_rate: f64) -> f64;
}

/// Growth curve selection and parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrowthCurveSpec {
    /// Registered curve name
    pub name: String,
    /// Calcium level where growth starts (gaussian)
    pub eta: f64,
    /// Calcium set point
    pub eps: f64,
    /// Steepness (sigmoid)
    pub psi: f64,
}

impl Default for GrowthCurveSpec {
    fn default() -> Self {
        Self {
            name: "gaussian".to_string(),
            eta: 0.0,
            eps: 0.7,
            psi: 0.1,
        }
    }
}

impl GrowthCurveSpec {
    /// Spec for a named curve with default parameters
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set eta
    pub fn with_eta(mut self, eta: f64) -> Self {
        self.eta = eta;
        self
    }

    /// Set eps
    pub fn with_eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    /// Set psi
    pub fn with_psi(mut self, psi: f64) -> Self {
        self.psi = psi;
        self
    }
}

/// `ν (1 - Ca / ε)`
#[derive(Debug, Clone)]
pub struct LinearGrowth {
    eps: f64,
}

impl LinearGrowth {
    /// Create from a spec
    pub fn new(spec: &GrowthCurveSpec) -> Result<Self> {
        if !(spec.eps > 0.0) {
            return Err(KernelError::invalid_parameter("eps", spec.eps.to_string(), "> 0"));
        }
        Ok(Self { eps: spec.eps })
    }
}

impl GrowthCurve for LinearGrowth {
    fn name(&self) -> &str {
        "linear"
    }

    fn rate(&self, calcium: f64, growth_rate: f64) -> f64 {
        growth_rate * (1.0 - calcium / self.eps)
    }
}

/// `ν (2 exp(-((Ca - ξ) / ζ)²) - 1)`, positive between η and ε
#[derive(Debug, Clone)]
pub struct GaussianGrowth {
    xi: f64,
    zeta: f64,
}

impl GaussianGrowth {
    /// Create from a spec
    pub fn new(spec: &GrowthCurveSpec) -> Result<Self> {
        if !(spec.eps > spec.eta) {
            return Err(KernelError::invalid_parameter(
                "eps",
                spec.eps.to_string(),
                format!("> eta ({})", spec.eta),
            ));
        }
        Ok(Self {
            xi: (spec.eta + spec.eps) / 2.0,
            zeta: (spec.eps - spec.eta) / (2.0 * std::f64::consts::LN_2.sqrt()),
        })
    }
}

impl GrowthCurve for GaussianGrowth {
    fn name(&self) -> &str {
        "gaussian"
    }

    fn rate(&self, calcium: f64, growth_rate: f64) -> f64 {
        let x = (calcium - self.xi) / self.zeta;
        growth_rate * (2.0 * (-x * x).exp() - 1.0)
    }
}

/// `ν (2 / (1 + exp((Ca - ε) / ψ)) - 1)`
#[derive(Debug, Clone)]
pub struct SigmoidGrowth {
    eps: f64,
    psi: f64,
}

impl SigmoidGrowth {
    /// Create from a spec
    pub fn new(spec: &GrowthCurveSpec) -> Result<Self> {
        if !(spec.psi > 0.0) {
            return Err(KernelError::invalid_parameter("psi", spec.psi.to_string(), "> 0"));
        }
        Ok(Self {
            eps: spec.eps,
            psi: spec.psi,
        })
    }
}

impl GrowthCurve for SigmoidGrowth {
    fn name(&self) -> &str {
        "sigmoid"
    }

    fn rate(&self, calcium: f64, growth_rate: f64) -> f64 {
        growth_rate * (2.0 / (1.0 + ((calcium - self.eps) / self.psi).exp()) - 1.0)
    }
}

/// Builds a growth curve from its spec
pub type GrowthCurveFactory = Arc<dyn Fn(&GrowthCurveSpec) -> Result<Box<dyn GrowthCurve>> + Send + Sync>;

/// Registered growth curves
#[derive(Clone)]
pub struct GrowthCurveRegistry {
    factories: HashMap<String, GrowthCurveFactory>,
}

impl fmt::Debug for GrowthCurveRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("GrowthCurveRegistry").field("curves", &names).finish()
    }
}

impl Default for GrowthCurveRegistry {
    fn default() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register(
            "linear",
            Arc::new(|spec: &GrowthCurveSpec| Ok(Box::new(LinearGrowth::new(spec)?) as Box<dyn GrowthCurve>)),
        );
        registry.register(
            "gaussian",
            Arc::new(|spec: &GrowthCurveSpec| Ok(Box::new(GaussianGrowth::new(spec)?) as Box<dyn GrowthCurve>)),
        );
        registry.register(
            "sigmoid",
            Arc::new(|spec: &GrowthCurveSpec| Ok(Box::new(SigmoidGrowth::new(spec)?) as Box<dyn GrowthCurve>)),
        );
        registry
    }
}

impl GrowthCurveRegistry {
    /// Register or replace a curve
    pub fn register(&mut self, name: impl Into<String>, factory: GrowthCurveFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// Build a curve
    pub fn build(&self, spec: &GrowthCurveSpec) -> Result<Box<dyn GrowthCurve>> {
        let factory = self
            .factories
            .get(&spec.name)
            .ok_or_else(|| KernelError::UnknownGrowthCurve {
                name: spec.name.clone(),
            })?;
        factory(spec)
    }
}
