//! Connection infrastructure
//!
//! Connectors live in per-thread tables indexed by synapse model and local
//! connection index, next to a parallel source table. Routing tables on the
//! sending side are derived from them once per connectivity generation.

pub mod connector;
pub mod descriptor;
pub mod routing;
pub mod rules;
pub mod synapse;
pub mod tables;

pub use connector::{Connector, SourceEntry};
pub use descriptor::{ConnectionDescriptor, ConnectionFilter};
pub use routing::{CompressedTable, RoutingState, ThreadRoutes};
pub use rules::{select_pairs, ConnectionRule, RuleContext};
pub use synapse::{
    SynapseDefaults, SynapseKind, SynapseModel, SynapseRegistry, SynapseSpec, RATE_CONNECTION,
    STATIC_SYNAPSE,
};
pub use tables::{ConnectorTable, ThreadConnections};
