//! Kernel configuration

use crate::error::{KernelError, Result};
use serde::{Deserialize, Serialize};

/// Send buffer sizing policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpikeBufferConfig {
    /// Records per destination chunk at startup
    pub initial_chunk: usize,
    /// Chunks never shrink below this many records
    pub min_chunk: usize,
    /// Growth multiplier applied on overflow
    pub growth_factor: f64,
    /// Global occupancy below which a cycle counts towards shrinking
    pub shrink_threshold: f64,
    /// Consecutive low-occupancy cycles before chunks halve
    pub shrink_patience: u32,
}

impl Default for SpikeBufferConfig {
    fn default() -> Self {
        Self {
            initial_chunk: 128,
            min_chunk: 16,
            growth_factor: 1.5,
            shrink_threshold: 0.25,
            shrink_patience: 100,
        }
    }
}

impl SpikeBufferConfig {
    /// Validate buffer parameters
    pub fn validate(&self) -> Result<()> {
        if self.min_chunk == 0 {
            return Err(KernelError::invalid_parameter(
                "spike_buffer.min_chunk",
                "0",
                ">= 1",
            ));
        }
        if self.initial_chunk < self.min_chunk {
            return Err(KernelError::invalid_parameter(
                "spike_buffer.initial_chunk",
                self.initial_chunk.to_string(),
                format!(">= min_chunk ({})", self.min_chunk),
            ));
        }
        if !(self.growth_factor > 1.0) {
            return Err(KernelError::invalid_parameter(
                "spike_buffer.growth_factor",
                self.growth_factor.to_string(),
                "> 1.0",
            ));
        }
        if !(0.0..1.0).contains(&self.shrink_threshold) {
            return Err(KernelError::invalid_parameter(
                "spike_buffer.shrink_threshold",
                self.shrink_threshold.to_string(),
                "in [0, 1)",
            ));
        }
        Ok(())
    }
}

/// Structural plasticity scheduling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuralPlasticityConfig {
    /// Interval between connectivity updates (ms)
    pub update_interval_ms: f64,
}

impl Default for StructuralPlasticityConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 100.0,
        }
    }
}

/// Kernel configuration, identical on every rank
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Worker threads per rank
    pub num_threads: usize,
    /// Simulation step (ms)
    pub resolution_ms: f64,
    /// Seed for connectivity rules, generators and plasticity shuffles
    pub rng_seed: u64,
    /// Keep the source table after routing preparation
    pub keep_source_table: bool,
    /// Send one record per (rank, synapse) instead of per (rank, thread, synapse)
    pub use_compressed_spikes: bool,
    /// Carry sub-step spike offsets on the wire
    pub off_grid_spiking: bool,
    /// Send buffer sizing
    pub spike_buffer: SpikeBufferConfig,
    /// Structural plasticity scheduling
    pub structural_plasticity: StructuralPlasticityConfig,
    /// Collective calls fail after waiting this long for a peer (ms)
    pub comm_timeout_ms: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            num_threads: 1,
            resolution_ms: 0.1,
            rng_seed: 12345,
            keep_source_table: true,
            use_compressed_spikes: false,
            off_grid_spiking: false,
            spike_buffer: SpikeBufferConfig::default(),
            structural_plasticity: StructuralPlasticityConfig::default(),
            comm_timeout_ms: 30_000,
        }
    }
}

impl KernelConfig {
    /// Set thread count
    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Set step resolution
    pub fn with_resolution(mut self, resolution_ms: f64) -> Self {
        self.resolution_ms = resolution_ms;
        self
    }

    /// Set random seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng_seed = seed;
        self
    }

    /// Keep or release the source table after preparation
    pub fn with_keep_source_table(mut self, keep: bool) -> Self {
        self.keep_source_table = keep;
        self
    }

    /// Enable or disable compressed spikes
    pub fn with_compressed_spikes(mut self, enabled: bool) -> Self {
        self.use_compressed_spikes = enabled;
        self
    }

    /// Enable or disable off-grid spike records
    pub fn with_off_grid_spiking(mut self, enabled: bool) -> Self {
        self.off_grid_spiking = enabled;
        self
    }

    /// Set send buffer policy
    pub fn with_spike_buffer(mut self, spike_buffer: SpikeBufferConfig) -> Self {
        self.spike_buffer = spike_buffer;
        self
    }

    /// Set structural plasticity update interval
    pub fn with_sp_interval(mut self, update_interval_ms: f64) -> Self {
        self.structural_plasticity.update_interval_ms = update_interval_ms;
        self
    }

    /// Set collective timeout
    pub fn with_comm_timeout(mut self, timeout_ms: u64) -> Self {
        self.comm_timeout_ms = timeout_ms;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.num_threads == 0 || self.num_threads > u16::MAX as usize {
            return Err(KernelError::invalid_parameter(
                "num_threads",
                self.num_threads.to_string(),
                "in [1, 65535]",
            ));
        }
        if !(self.resolution_ms > 0.0) || !self.resolution_ms.is_finite() {
            return Err(KernelError::invalid_parameter(
                "resolution_ms",
                self.resolution_ms.to_string(),
                "> 0",
            ));
        }
        if !(self.structural_plasticity.update_interval_ms >= self.resolution_ms) {
            return Err(KernelError::invalid_parameter(
                "structural_plasticity.update_interval_ms",
                self.structural_plasticity.update_interval_ms.to_string(),
                format!(">= resolution_ms ({})", self.resolution_ms),
            ));
        }
        if self.comm_timeout_ms == 0 {
            return Err(KernelError::invalid_parameter("comm_timeout_ms", "0", "> 0"));
        }
        self.spike_buffer.validate()
    }
}
