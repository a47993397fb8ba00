//! Built-in node models used to drive and observe delivery

use super::{
    Node, NodeContext, NodeModelRegistry, NodeOutput, NodeParams, SpikeEmission, StepContext,
    StepInput,
};
use crate::error::{KernelError, Result};
use crate::rng::{stream_rng, DOMAIN_GENERATOR};
use crate::time::Step;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::any::Any;
use std::sync::Arc;

/// Spike generator model name
pub const SPIKE_GENERATOR: &str = "spike_generator";
/// Poisson generator model name
pub const POISSON_GENERATOR: &str = "poisson_generator";
/// Parrot neuron model name
pub const PARROT_NEURON: &str = "parrot_neuron";
/// Rate source model name
pub const RATE_SOURCE: &str = "rate_source";
/// Input probe model name
pub const INPUT_PROBE: &str = "input_probe";

pub(crate) fn register_builtins(registry: &mut NodeModelRegistry) {
    registry.register(
        SPIKE_GENERATOR,
        Arc::new(|params: &NodeParams, ctx: &NodeContext| {
            Ok(Box::new(SpikeGenerator::new(
                &params.spike_times_ms,
                params.precise_times,
                ctx.resolution_ms,
            )?) as Box<dyn Node>)
        }),
    );
    registry.register(
        POISSON_GENERATOR,
        Arc::new(|params: &NodeParams, ctx: &NodeContext| {
            Ok(Box::new(PoissonGenerator::new(params.rate_hz, ctx)?) as Box<dyn Node>)
        }),
    );
    registry.register(
        PARROT_NEURON,
        Arc::new(|_: &NodeParams, _: &NodeContext| Ok(Box::new(ParrotNeuron::default()) as Box<dyn Node>)),
    );
    registry.register(
        RATE_SOURCE,
        Arc::new(|params: &NodeParams, _: &NodeContext| {
            Ok(Box::new(RateSource::new(params.amplitude)) as Box<dyn Node>)
        }),
    );
    registry.register(
        INPUT_PROBE,
        Arc::new(|_: &NodeParams, _: &NodeContext| Ok(Box::new(InputProbe::default()) as Box<dyn Node>)),
    );
}

/// Emits spikes at given times.
///
/// On the grid a time `t` fires in step `round(t / h)`; times falling into
/// the same step add up to one emission with higher multiplicity. With
/// precise times, `t` fires in step `ceil(t / h)` with offset
/// `ceil(t / h) * h - t`.
#[derive(Debug, Clone)]
pub struct SpikeGenerator {
    schedule: Vec<(Step, SpikeEmission)>,
    cursor: usize,
}

impl SpikeGenerator {
    /// Build from spike times in ms
    pub fn new(times_ms: &[f64], precise: bool, resolution_ms: f64) -> Result<Self> {
        let mut times = times_ms.to_vec();
        if let Some(bad) = times.iter().find(|t| !t.is_finite() || **t < 0.0) {
            return Err(KernelError::invalid_parameter(
                "spike_times_ms",
                bad.to_string(),
                "finite and >= 0",
            ));
        }
        times.sort_by(f64::total_cmp);

        let mut schedule: Vec<(Step, SpikeEmission)> = Vec::with_capacity(times.len());
        for t in times {
            let (step, offset_ms) = if precise {
                let step = (t / resolution_ms).ceil();
                (step as Step, step * resolution_ms - t)
            } else {
                ((t / resolution_ms).round() as Step, 0.0)
            };
            match schedule.last_mut() {
                Some((last, emission)) if *last == step => {
                    if precise {
                        return Err(KernelError::invalid_parameter(
                            "spike_times_ms",
                            t.to_string(),
                            "at most one precise spike per step",
                        ));
                    }
                    emission.multiplicity = emission.multiplicity.saturating_add(1);
                }
                _ => schedule.push((
                    step,
                    SpikeEmission {
                        multiplicity: 1,
                        offset_ms,
                    },
                )),
            }
        }
        Ok(Self { schedule, cursor: 0 })
    }

    /// Total spikes this generator will emit
    pub fn total_spikes(&self) -> u64 {
        self.schedule.iter().map(|(_, e)| e.multiplicity as u64).sum()
    }
}

impl Node for SpikeGenerator {
    fn model(&self) -> &str {
        SPIKE_GENERATOR
    }

    fn update(&mut self, ctx: &StepContext, _input: StepInput) -> NodeOutput {
        while self
            .schedule
            .get(self.cursor)
            .map_or(false, |(step, _)| *step < ctx.step)
        {
            self.cursor += 1;
        }
        match self.schedule.get(self.cursor) {
            Some((step, emission)) if *step == ctx.step => {
                self.cursor += 1;
                NodeOutput {
                    spike: Some(*emission),
                    secondary: None,
                }
            }
            _ => NodeOutput::silent(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Emits Poisson-distributed spike counts per step
#[derive(Debug, Clone)]
pub struct PoissonGenerator {
    rate_hz: f64,
    rng: ChaCha8Rng,
}

impl PoissonGenerator {
    /// Create a generator whose stream is keyed by node id
    pub fn new(rate_hz: f64, ctx: &NodeContext) -> Result<Self> {
        if !(rate_hz >= 0.0) || !rate_hz.is_finite() {
            return Err(KernelError::invalid_parameter("rate_hz", rate_hz.to_string(), ">= 0"));
        }
        Ok(Self {
            rate_hz,
            rng: stream_rng(ctx.seed, &[DOMAIN_GENERATOR, ctx.node_id.raw()]),
        })
    }

    /// Knuth's multiplication method; fine for the small per-step means
    /// generators see.
    fn draw(&mut self, lambda: f64) -> u32 {
        let limit = (-lambda).exp();
        let mut k = 0u32;
        let mut p = 1.0f64;
        loop {
            p *= self.rng.gen::<f64>();
            if p <= limit {
                return k;
            }
            k += 1;
        }
    }
}

impl Node for PoissonGenerator {
    fn model(&self) -> &str {
        POISSON_GENERATOR
    }

    fn update(&mut self, ctx: &StepContext, _input: StepInput) -> NodeOutput {
        let lambda = self.rate_hz * ctx.resolution_ms / 1000.0;
        if lambda <= 0.0 {
            return NodeOutput::silent();
        }
        match self.draw(lambda) {
            0 => NodeOutput::silent(),
            k => NodeOutput::spike(k.min(u16::MAX as u32) as u16),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Repeats every incoming spike with the same multiplicity
#[derive(Debug, Clone, Default)]
pub struct ParrotNeuron {
    repeated: u64,
}

impl ParrotNeuron {
    /// Spikes repeated so far
    pub fn repeated(&self) -> u64 {
        self.repeated
    }
}

impl Node for ParrotNeuron {
    fn model(&self) -> &str {
        PARROT_NEURON
    }

    fn update(&mut self, _ctx: &StepContext, input: StepInput) -> NodeOutput {
        if input.spike_count == 0 {
            return NodeOutput::silent();
        }
        self.repeated += input.spike_count as u64;
        let offset_ms = input.precise.first().map_or(0.0, |p| p.offset_ms);
        NodeOutput {
            spike: Some(SpikeEmission {
                multiplicity: input.spike_count.min(u16::MAX as u32) as u16,
                offset_ms,
            }),
            secondary: None,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Emits a constant secondary value every step
#[derive(Debug, Clone)]
pub struct RateSource {
    amplitude: f64,
}

impl RateSource {
    /// Create a source with the given output
    pub fn new(amplitude: f64) -> Self {
        Self { amplitude }
    }
}

impl Node for RateSource {
    fn model(&self) -> &str {
        RATE_SOURCE
    }

    fn update(&mut self, _ctx: &StepContext, _input: StepInput) -> NodeOutput {
        NodeOutput {
            spike: None,
            secondary: Some(self.amplitude),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Input observed by a probe at one step
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeRecord {
    /// Step the input arrived at
    pub step: Step,
    /// Input as delivered
    pub input: StepInput,
}

/// Records every non-empty input it receives
#[derive(Debug, Clone, Default)]
pub struct InputProbe {
    records: Vec<ProbeRecord>,
}

impl InputProbe {
    /// Everything recorded, in step order
    pub fn records(&self) -> &[ProbeRecord] {
        &self.records
    }

    /// Steps at which spikes arrived
    pub fn spike_steps(&self) -> Vec<Step> {
        self.records
            .iter()
            .filter(|r| r.input.spike_count > 0)
            .map(|r| r.step)
            .collect()
    }

    /// Sum of arrived spike multiplicities
    pub fn total_spikes(&self) -> u64 {
        self.records.iter().map(|r| r.input.spike_count as u64).sum()
    }

    /// Sum of arrived spike weights
    pub fn total_weight(&self) -> f64 {
        self.records.iter().map(|r| r.input.spike_weight).sum()
    }

    /// Secondary input per step, for steps that received any
    pub fn secondary_trace(&self) -> Vec<(Step, f64)> {
        self.records
            .iter()
            .filter(|r| r.input.secondary != 0.0)
            .map(|r| (r.step, r.input.secondary))
            .collect()
    }
}

impl Node for InputProbe {
    fn model(&self) -> &str {
        INPUT_PROBE
    }

    fn update(&mut self, ctx: &StepContext, input: StepInput) -> NodeOutput {
        if !input.is_empty() {
            self.records.push(ProbeRecord {
                step: ctx.step,
                input,
            });
        }
        NodeOutput::silent()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
