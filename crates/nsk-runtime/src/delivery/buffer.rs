//! Fixed-size send buffers and the overflow/shrink protocol
//!
//! Every rank sends one chunk of `chunk` records to every rank. After the
//! exchange, ranks reduce the largest chunk any of them needed. If that
//! exceeds the capacity, all ranks grow to the same new size and repeat the
//! round; nothing is dropped and at most one extra round is needed because
//! the grown chunk holds the reduced requirement.

use super::DeliveryStats;
use crate::comm::Communicator;
use crate::config::SpikeBufferConfig;
use crate::error::{KernelError, Result};
use nsk_wire::{read_chunk, write_chunk, RecordLayout, SpikeData};

/// Chunk sizing state of one rank
#[derive(Debug, Clone)]
pub struct SpikeExchange {
    config: SpikeBufferConfig,
    layout: RecordLayout,
    chunk: usize,
    low_cycles: u32,
}

impl SpikeExchange {
    /// Start at the configured initial chunk size
    pub fn new(config: SpikeBufferConfig, layout: RecordLayout) -> Self {
        Self {
            chunk: config.initial_chunk,
            config,
            layout,
            low_cycles: 0,
        }
    }

    /// Records per destination chunk
    pub fn chunk(&self) -> usize {
        self.chunk
    }

    /// Record layout in use
    pub fn layout(&self) -> RecordLayout {
        self.layout
    }

    /// Exchange `per_rank[r]` with rank `r` and return every record
    /// addressed to this rank, in source-rank order
    pub fn exchange(
        &mut self,
        comm: &mut dyn Communicator,
        per_rank: &[Vec<SpikeData>],
        stats: &mut DeliveryStats,
    ) -> Result<Vec<SpikeData>> {
        let num_ranks = comm.num_ranks();
        if per_rank.len() != num_ranks {
            return Err(KernelError::invalid_state(format!(
                "{} send lists for {} ranks",
                per_rank.len(),
                num_ranks
            )));
        }
        // An empty chunk still carries its Invalid marker record.
        let local_required = per_rank.iter().map(|r| r.len().max(1)).max().unwrap_or(1);

        loop {
            let record_size = self.layout.size();
            let chunk_bytes = self.chunk * record_size;
            let mut send = vec![0u8; chunk_bytes * num_ranks];
            for (records, chunk) in per_rank.iter().zip(send.chunks_mut(chunk_bytes)) {
                write_chunk(records, chunk, self.layout)?;
            }

            let received = comm.all_to_all(&send, chunk_bytes)?;
            let required = comm.all_reduce_max(local_required as u64)? as usize;
            stats.rounds += 1;

            if required <= self.chunk {
                self.track_occupancy(required);
                let mut records = Vec::new();
                for chunk in received.chunks(chunk_bytes) {
                    records.extend(read_chunk(chunk, self.layout)?);
                }
                stats.records_sent += per_rank.iter().map(|r| r.len() as u64).sum::<u64>();
                stats.records_received += records.len() as u64;
                stats.chunk_size = self.chunk;
                return Ok(records);
            }

            stats.overflow_rounds += 1;
            self.grow(comm, required)?;
        }
    }

    fn grow(&mut self, comm: &mut dyn Communicator, required: usize) -> Result<()> {
        let scaled = (self.chunk as f64 * self.config.growth_factor).ceil() as usize;
        let grown = required.max(scaled);
        let sizes = comm.all_gather_u64(grown as u64)?;
        if let Some((rank, size)) = sizes.iter().enumerate().find(|(_, s)| **s != grown as u64) {
            return Err(KernelError::protocol_violation(format!(
                "rank {} grew its spike chunk to {} records, this rank to {}",
                rank, size, grown
            )));
        }
        log::debug!(
            target: "nsk::delivery",
            "spike chunk overflow: {} records needed, growing {} -> {}",
            required,
            self.chunk,
            grown
        );
        self.chunk = grown;
        self.low_cycles = 0;
        Ok(())
    }

    fn track_occupancy(&mut self, required: usize) {
        let occupancy = required as f64 / self.chunk as f64;
        if occupancy >= self.config.shrink_threshold || self.chunk <= self.config.min_chunk {
            self.low_cycles = 0;
            return;
        }
        self.low_cycles += 1;
        if self.low_cycles >= self.config.shrink_patience {
            let shrunk = (self.chunk / 2).max(self.config.min_chunk);
            log::debug!(
                target: "nsk::delivery",
                "spike chunk underused for {} cycles, shrinking {} -> {}",
                self.low_cycles,
                self.chunk,
                shrunk
            );
            self.chunk = shrunk;
            self.low_cycles = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{ChannelCommunicator, CommError, LocalCommunicator};

    fn config(initial: usize) -> SpikeBufferConfig {
        SpikeBufferConfig {
            initial_chunk: initial,
            min_chunk: 2,
            growth_factor: 1.5,
            shrink_threshold: 0.25,
            shrink_patience: 3,
        }
    }

    fn records(n: usize) -> Vec<SpikeData> {
        (0..n).map(|i| SpikeData::new(0, 0, i as u32, 0)).collect()
    }

    #[test]
    fn test_local_exchange_roundtrip() {
        let mut comm = LocalCommunicator::new();
        let mut exchange = SpikeExchange::new(config(4), RecordLayout::OnGrid);
        let mut stats = DeliveryStats::default();
        let received = exchange.exchange(&mut comm, &[records(3)], &mut stats).unwrap();
        assert_eq!(received.len(), 3);
        assert_eq!(received[2].lcid, 2);
        assert_eq!(stats.rounds, 1);
        assert_eq!(stats.overflow_rounds, 0);
    }

    #[test]
    fn test_overflow_costs_one_round() {
        let mut comm = LocalCommunicator::new();
        let mut exchange = SpikeExchange::new(config(4), RecordLayout::OnGrid);
        let mut stats = DeliveryStats::default();
        let received = exchange.exchange(&mut comm, &[records(10)], &mut stats).unwrap();
        assert_eq!(received.len(), 10);
        assert_eq!(stats.rounds, 2);
        assert_eq!(stats.overflow_rounds, 1);
        assert_eq!(exchange.chunk(), 10);
        assert_eq!(stats.records_sent, 10);
        assert_eq!(stats.records_received, 10);
    }

    #[test]
    fn test_growth_factor_dominates_small_overflow() {
        let mut comm = LocalCommunicator::new();
        let mut exchange = SpikeExchange::new(config(8), RecordLayout::OffGrid);
        let mut stats = DeliveryStats::default();
        exchange.exchange(&mut comm, &[records(9)], &mut stats).unwrap();
        assert_eq!(exchange.chunk(), 12);
    }

    #[test]
    fn test_shrinks_after_patience() {
        let mut comm = LocalCommunicator::new();
        let mut exchange = SpikeExchange::new(config(16), RecordLayout::OnGrid);
        let mut stats = DeliveryStats::default();
        for _ in 0..2 {
            exchange.exchange(&mut comm, &[records(1)], &mut stats).unwrap();
        }
        assert_eq!(exchange.chunk(), 16);
        exchange.exchange(&mut comm, &[records(1)], &mut stats).unwrap();
        assert_eq!(exchange.chunk(), 8);

        // Busy cycles reset the count
        exchange.exchange(&mut comm, &[records(1)], &mut stats).unwrap();
        exchange.exchange(&mut comm, &[records(6)], &mut stats).unwrap();
        exchange.exchange(&mut comm, &[records(1)], &mut stats).unwrap();
        assert_eq!(exchange.chunk(), 8);
    }

    #[test]
    fn test_two_ranks_agree_on_growth() {
        let comms = ChannelCommunicator::mesh(2, 5_000);
        let results: Vec<(usize, Vec<SpikeData>)> = std::thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|mut comm| {
                    scope.spawn(move || {
                        let mut exchange = SpikeExchange::new(config(4), RecordLayout::OnGrid);
                        let mut stats = DeliveryStats::default();
                        // Rank 0 overflows towards rank 1 only.
                        let sends = if comm.rank() == 0 {
                            vec![records(1), records(7)]
                        } else {
                            vec![records(2), records(1)]
                        };
                        let got = exchange.exchange(&mut comm, &sends, &mut stats).unwrap();
                        assert_eq!(stats.overflow_rounds, 1);
                        (exchange.chunk(), got)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results[0].0, results[1].0);
        assert_eq!(results[0].1.len(), 1 + 2);
        assert_eq!(results[1].1.len(), 7 + 1);
    }

    #[test]
    fn test_asymmetric_chunks_fail() {
        let comms = ChannelCommunicator::mesh(2, 5_000);
        let errors: Vec<KernelError> = std::thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|mut comm| {
                    scope.spawn(move || {
                        let initial = if comm.rank() == 0 { 4 } else { 8 };
                        let mut exchange = SpikeExchange::new(config(initial), RecordLayout::OnGrid);
                        let mut stats = DeliveryStats::default();
                        exchange
                            .exchange(&mut comm, &[records(1), records(1)], &mut stats)
                            .unwrap_err()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for err in errors {
            assert!(err.is_fatal());
            assert!(matches!(
                err,
                KernelError::Communication {
                    source: CommError::SizeMismatch { .. }
                }
            ));
        }
    }
}
