//! Error types for wire encoding and decoding

use thiserror::Error;

/// Result type for wire operations
pub type Result<T> = std::result::Result<T, WireError>;

/// Errors raised while encoding or decoding inter-rank buffers
#[derive(Error, Debug)]
pub enum WireError {
    /// Invalid magic number in a framed buffer
    #[error("Invalid magic number: expected {expected:?}, found {found:?}")]
    InvalidMagic {
        /// Expected magic number
        expected: [u8; 4],
        /// Found magic number
        found: [u8; 4],
    },

    /// Unsupported wire version
    #[error("Unsupported version: {version}, supported: {supported}")]
    UnsupportedVersion {
        /// Version found
        version: u16,
        /// Supported version
        supported: u16,
    },

    /// Checksum verification failed
    #[error("Checksum verification failed: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// Expected checksum
        expected: u32,
        /// Computed checksum
        computed: u32,
    },

    /// Buffer shorter than the record it should hold
    #[error("Truncated buffer: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes required
        needed: usize,
        /// Bytes present
        available: usize,
    },

    /// Structurally invalid data
    #[error("Invalid format: {reason}")]
    InvalidFormat {
        /// Reason for invalid format
        reason: String,
    },

    /// serde/bincode failure
    #[error("Codec error: {source}")]
    Codec {
        #[from]
        /// Source codec error
        source: bincode::Error,
    },
}

impl WireError {
    /// Create an invalid format error
    pub fn invalid_format(reason: impl Into<String>) -> Self {
        Self::InvalidFormat {
            reason: reason.into(),
        }
    }

    /// Create a truncation error
    pub fn truncated(needed: usize, available: usize) -> Self {
        Self::Truncated { needed, available }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = WireError::invalid_format("bad marker");
        assert!(matches!(err, WireError::InvalidFormat { .. }));

        let err = WireError::truncated(16, 3);
        assert!(matches!(err, WireError::Truncated { needed: 16, available: 3 }));
    }

    #[test]
    fn test_error_display() {
        let err = WireError::ChecksumMismatch {
            expected: 0xdeadbeef,
            computed: 0,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("deadbeef"));
    }
}
