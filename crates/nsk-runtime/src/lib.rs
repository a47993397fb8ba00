//! Connection and event-delivery kernel for distributed spiking network
//! simulation
//!
//! Nodes are spread over ranks and worker threads by a round-robin virtual
//! process decomposition. Connections are stored on the thread that owns
//! their target, spikes are exchanged between ranks once per min-delay cycle
//! through fixed-size, self-resizing buffers, and structural plasticity
//! rewires the network from synaptic element counts. Every rank makes the
//! same decisions from the same seed, whatever the thread or rank count.

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export wire types
pub use nsk_wire::{Fingerprint, NodeId, SpikeData, SynId, TargetData, WireError};

// Core modules
pub mod comm;
pub mod config;
pub mod error;
pub mod parallel;
pub mod rng;
pub mod time;
pub mod vp;

// Network state
pub mod connection;
pub mod node;
pub mod synaptic;

// Simulation
pub mod cluster;
pub mod delivery;
pub mod kernel;
pub mod structural;

// Re-export essential types
pub use cluster::run_cluster;
pub use comm::{ChannelCommunicator, CommError, CommStats, Communicator, LocalCommunicator};
pub use config::{KernelConfig, SpikeBufferConfig, StructuralPlasticityConfig};
pub use connection::{
    ConnectionDescriptor, ConnectionFilter, ConnectionRule, SynapseDefaults, SynapseKind, SynapseSpec,
    RATE_CONNECTION, STATIC_SYNAPSE,
};
pub use delivery::DeliveryStats;
pub use error::{KernelError, Result};
pub use kernel::Kernel;
pub use node::{Node, NodeContext, NodeFactory, NodeOutput, NodeParams, StepContext, StepInput};
pub use structural::{StructuralPlasticityRule, StructuralUpdateReport};
pub use synaptic::{CalciumParams, ElementCounts, GrowthCurve, GrowthCurveSpec, SynapticElementParams};
pub use time::{ms_to_steps, steps_to_ms, DelayExtrema, Step};
pub use vp::VpIndex;

/// Version of the inter-rank record formats
pub const PROTOCOL_VERSION: u32 = 1;

/// Default simulation resolution (ms)
pub const DEFAULT_RESOLUTION_MS: f64 = 0.1;
