//! Error types for the simulation kernel

use crate::comm::CommError;
use nsk_wire::{NodeId, WireError};
use thiserror::Error;

/// Result type for kernel operations
pub type Result<T> = std::result::Result<T, KernelError>;

/// Errors that can occur in the kernel
#[derive(Error, Debug)]
pub enum KernelError {
    /// Connectivity rule or cardinality violation, unknown node
    #[error("Illegal connection: {reason}")]
    IllegalConnection {
        /// Reason the connection was rejected
        reason: String,
    },

    /// Synapse model not registered
    #[error("Unknown synapse type: {name}")]
    UnknownSynapseType {
        /// Requested model name
        name: String,
    },

    /// Node model not registered
    #[error("Unknown node model: {name}")]
    UnknownNodeModel {
        /// Requested model name
        name: String,
    },

    /// Node id never created, or not local where a local node is required
    #[error("Node {node_id} not found")]
    UnknownNode {
        /// Node that was not found
        node_id: NodeId,
    },

    /// Growth curve not registered
    #[error("Unknown growth curve: {name}")]
    UnknownGrowthCurve {
        /// Requested curve name
        name: String,
    },

    /// Delay outside frozen extrema
    #[error("Delay of {delay} steps outside frozen delay extrema [{min}, {max}]")]
    InconsistentDelayExtrema {
        /// Requested delay in steps
        delay: u64,
        /// Frozen minimum delay in steps
        min: u64,
        /// Frozen maximum delay in steps
        max: u64,
    },

    /// Structural plasticity requested with an incompatible setting
    #[error("Structural plasticity conflict: {reason}")]
    StructuralPlasticityConflict {
        /// Conflicting setting
        reason: String,
    },

    /// Operation needs the source table after it was released
    #[error("Source table was cleared after routing preparation (enable keep_source_table)")]
    SourceTableCleared,

    /// Invalid kernel configuration
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Reason for invalid configuration
        reason: String,
    },

    /// Invalid parameter value
    #[error("Invalid parameter {parameter}: {value} (expected {constraint})")]
    InvalidParameter {
        /// Parameter name
        parameter: String,
        /// Invalid value
        value: String,
        /// Constraint description
        constraint: String,
    },

    /// Operation not allowed in the current kernel state
    #[error("Invalid state: {reason}")]
    InvalidState {
        /// Reason the operation is not allowed
        reason: String,
    },

    /// Collective communication failed
    #[error("Communication error: {source}")]
    Communication {
        #[from]
        /// Source communication error
        source: CommError,
    },

    /// Ranks disagree on state that must be identical everywhere
    #[error("Protocol violation: {reason}")]
    ProtocolViolation {
        /// Disagreement detected
        reason: String,
    },

    /// Malformed inter-rank buffer
    #[error("Wire error: {source}")]
    Wire {
        #[from]
        /// Source wire error
        source: WireError,
    },
}

impl KernelError {
    /// Create an illegal connection error
    pub fn illegal_connection(reason: impl Into<String>) -> Self {
        Self::IllegalConnection {
            reason: reason.into(),
        }
    }

    /// Create an unknown synapse type error
    pub fn unknown_synapse(name: impl Into<String>) -> Self {
        Self::UnknownSynapseType { name: name.into() }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(
        parameter: impl Into<String>,
        value: impl Into<String>,
        constraint: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            value: value.into(),
            constraint: constraint.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }

    /// Create a structural plasticity conflict error
    pub fn sp_conflict(reason: impl Into<String>) -> Self {
        Self::StructuralPlasticityConflict {
            reason: reason.into(),
        }
    }

    /// Create a protocol violation error
    pub fn protocol_violation(reason: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            reason: reason.into(),
        }
    }

    /// Whether the connection request itself was rejected. A delay outside
    /// frozen extrema is one kind of illegal connection.
    pub fn is_illegal_connection(&self) -> bool {
        matches!(
            self,
            Self::IllegalConnection { .. } | Self::InconsistentDelayExtrema { .. }
        )
    }

    /// Distributed-protocol failures abort the whole run: once ranks
    /// disagree, no rank can restore global consistency on its own.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Communication { .. } | Self::ProtocolViolation { .. } | Self::Wire { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = KernelError::illegal_connection("unequal lists");
        assert!(err.is_illegal_connection());
        assert!(!err.is_fatal());

        let err = KernelError::invalid_parameter("p", "1.5", "in [0, 1]");
        assert!(matches!(err, KernelError::InvalidParameter { .. }));
    }

    #[test]
    fn test_delay_extrema_is_illegal_connection() {
        let err = KernelError::InconsistentDelayExtrema {
            delay: 40,
            min: 10,
            max: 20,
        };
        assert!(err.is_illegal_connection());
        assert!(format!("{}", err).contains("[10, 20]"));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(KernelError::protocol_violation("fingerprints differ").is_fatal());
        assert!(KernelError::from(CommError::Disconnected { peer: 1 }).is_fatal());
        assert!(!KernelError::SourceTableCleared.is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = KernelError::UnknownNode {
            node_id: NodeId::new(42),
        };
        assert!(format!("{}", err).contains("Node 42 not found"));
    }
}
