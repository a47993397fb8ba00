//! Collective communication between ranks
//!
//! Ranks share no memory. Everything they agree on travels through a
//! [`Communicator`]; every call is collective and blocks until all ranks
//! have made the matching call.

mod channel;
mod local;

pub use channel::ChannelCommunicator;
pub use local::LocalCommunicator;

use thiserror::Error;

/// Errors raised by collective calls
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommError {
    /// Peer hung up, usually because it failed
    #[error("Rank {peer} disconnected")]
    Disconnected {
        /// Peer rank
        peer: usize,
    },

    /// Peer did not answer in time
    #[error("Timed out after {timeout_ms}ms waiting for rank {peer}")]
    Timeout {
        /// Peer rank
        peer: usize,
        /// Timeout in milliseconds
        timeout_ms: u64,
    },

    /// Payload size differs from what the collective requires
    #[error("Size mismatch from rank {peer}: expected {expected} bytes, found {found}")]
    SizeMismatch {
        /// Offending rank
        peer: usize,
        /// Expected byte count
        expected: usize,
        /// Actual byte count
        found: usize,
    },

    /// Wrong number of per-rank parts
    #[error("Expected {expected} per-rank parts, got {found}")]
    PartCount {
        /// Number of ranks
        expected: usize,
        /// Parts supplied
        found: usize,
    },

    /// Rank thread panicked
    #[error("Rank {rank} panicked")]
    Panicked {
        /// Rank that panicked
        rank: usize,
    },
}

/// Traffic counters of one communicator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommStats {
    /// Collective calls issued
    pub collectives: u64,
    /// Bytes handed to peers (including self)
    pub bytes_sent: u64,
    /// Bytes received from peers (including self)
    pub bytes_received: u64,
}

/// Collective operations used by the kernel
pub trait Communicator: Send {
    /// This rank
    fn rank(&self) -> usize;

    /// Number of ranks
    fn num_ranks(&self) -> usize;

    /// Send `send[r]` to rank `r`; returns the part received from each rank
    /// in rank order
    fn all_to_all_v(&mut self, send: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, CommError>;

    /// Traffic counters
    fn stats(&self) -> CommStats;

    /// Fixed-size exchange: `send` holds one `chunk_bytes` chunk per rank.
    /// Every rank must use the same chunk size; a peer using another size is
    /// reported as [`CommError::SizeMismatch`].
    fn all_to_all(&mut self, send: &[u8], chunk_bytes: usize) -> Result<Vec<u8>, CommError> {
        let expected = chunk_bytes * self.num_ranks();
        if send.len() != expected {
            return Err(CommError::SizeMismatch {
                peer: self.rank(),
                expected,
                found: send.len(),
            });
        }
        let parts = if chunk_bytes == 0 {
            vec![Vec::new(); self.num_ranks()]
        } else {
            send.chunks(chunk_bytes).map(<[u8]>::to_vec).collect()
        };
        let received = self.all_to_all_v(parts)?;

        let mut out = Vec::with_capacity(expected);
        for (peer, part) in received.into_iter().enumerate() {
            if part.len() != chunk_bytes {
                return Err(CommError::SizeMismatch {
                    peer,
                    expected: chunk_bytes,
                    found: part.len(),
                });
            }
            out.extend_from_slice(&part);
        }
        Ok(out)
    }

    /// Every rank receives every rank's `data`, in rank order
    fn all_gather(&mut self, data: Vec<u8>) -> Result<Vec<Vec<u8>>, CommError> {
        let parts = vec![data; self.num_ranks()];
        self.all_to_all_v(parts)
    }

    /// Block until every rank arrives
    fn barrier(&mut self) -> Result<(), CommError> {
        self.all_gather(Vec::new()).map(|_| ())
    }

    /// Global maximum
    fn all_reduce_max(&mut self, value: u64) -> Result<u64, CommError> {
        Ok(gather_u64(self, value)?.into_iter().max().unwrap_or(value))
    }

    /// Global minimum
    fn all_reduce_min(&mut self, value: u64) -> Result<u64, CommError> {
        Ok(gather_u64(self, value)?.into_iter().min().unwrap_or(value))
    }

    /// Global logical OR
    fn all_reduce_or(&mut self, flag: bool) -> Result<bool, CommError> {
        Ok(self.all_reduce_max(flag as u64)? != 0)
    }

    /// Every rank's value, in rank order
    fn all_gather_u64(&mut self, value: u64) -> Result<Vec<u64>, CommError> {
        gather_u64(self, value)
    }
}

fn gather_u64<C: Communicator + ?Sized>(comm: &mut C, value: u64) -> Result<Vec<u64>, CommError> {
    let parts = comm.all_gather(value.to_le_bytes().to_vec())?;
    parts
        .into_iter()
        .enumerate()
        .map(|(peer, part)| {
            let bytes: [u8; 8] = part.as_slice().try_into().map_err(|_| CommError::SizeMismatch {
                peer,
                expected: 8,
                found: part.len(),
            })?;
            Ok(u64::from_le_bytes(bytes))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reductions_on_single_rank() {
        let mut comm = LocalCommunicator::new();
        assert_eq!(comm.all_reduce_max(7).unwrap(), 7);
        assert_eq!(comm.all_reduce_min(7).unwrap(), 7);
        assert!(comm.all_reduce_or(true).unwrap());
        assert!(!comm.all_reduce_or(false).unwrap());
        assert_eq!(comm.all_gather_u64(3).unwrap(), vec![3]);
    }

    #[test]
    fn test_all_to_all_rejects_wrong_length() {
        let mut comm = LocalCommunicator::new();
        let err = comm.all_to_all(&[0u8; 5], 4).unwrap_err();
        assert!(matches!(err, CommError::SizeMismatch { expected: 4, found: 5, .. }));
    }
}
