//! Single-rank communicator

use super::{CommError, CommStats, Communicator};

/// Communicator for a run with exactly one rank
#[derive(Debug, Default)]
pub struct LocalCommunicator {
    stats: CommStats,
}

impl LocalCommunicator {
    /// Create a single-rank communicator
    pub fn new() -> Self {
        Self::default()
    }
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn num_ranks(&self) -> usize {
        1
    }

    fn all_to_all_v(&mut self, send: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, CommError> {
        if send.len() != 1 {
            return Err(CommError::PartCount {
                expected: 1,
                found: send.len(),
            });
        }
        let bytes: u64 = send.iter().map(|p| p.len() as u64).sum();
        self.stats.collectives += 1;
        self.stats.bytes_sent += bytes;
        self.stats.bytes_received += bytes;
        Ok(send)
    }

    fn stats(&self) -> CommStats {
        self.stats
    }
}
