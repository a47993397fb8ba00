//! In-process multi-rank communicator over crossbeam channels
//!
//! Each ordered pair of ranks gets its own FIFO channel. Collectives send one
//! message to every rank and then receive one from every rank in rank order,
//! so messages of consecutive collectives can never interleave.

use super::{CommError, CommStats, Communicator};
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// One rank's endpoint of a channel mesh
#[derive(Debug)]
pub struct ChannelCommunicator {
    rank: usize,
    senders: Vec<Sender<Vec<u8>>>,
    receivers: Vec<Receiver<Vec<u8>>>,
    timeout: Duration,
    stats: CommStats,
    mesh_stats: Arc<Mutex<CommStats>>,
}

impl ChannelCommunicator {
    /// Build a fully connected mesh of `num_ranks` endpoints, indexed by rank
    pub fn mesh(num_ranks: usize, timeout_ms: u64) -> Vec<ChannelCommunicator> {
        let mut senders: Vec<Vec<Sender<Vec<u8>>>> = vec![Vec::with_capacity(num_ranks); num_ranks];
        let mut receivers: Vec<Vec<Receiver<Vec<u8>>>> =
            vec![Vec::with_capacity(num_ranks); num_ranks];

        for src in 0..num_ranks {
            for dst in 0..num_ranks {
                let (tx, rx) = unbounded();
                senders[src].push(tx);
                receivers[dst].push(rx);
            }
        }

        let mesh_stats = Arc::new(Mutex::new(CommStats::default()));
        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (senders, receivers))| ChannelCommunicator {
                rank,
                senders,
                receivers,
                timeout: Duration::from_millis(timeout_ms),
                stats: CommStats::default(),
                mesh_stats: Arc::clone(&mesh_stats),
            })
            .collect()
    }

    /// Traffic summed over every endpoint of the mesh
    pub fn mesh_stats(&self) -> CommStats {
        *self.mesh_stats.lock()
    }

    fn record(&mut self, sent: u64, received: u64) {
        self.stats.collectives += 1;
        self.stats.bytes_sent += sent;
        self.stats.bytes_received += received;

        let mut mesh = self.mesh_stats.lock();
        if self.rank == 0 {
            mesh.collectives += 1;
        }
        mesh.bytes_sent += sent;
        mesh.bytes_received += received;
    }
}

impl Communicator for ChannelCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn num_ranks(&self) -> usize {
        self.senders.len()
    }

    fn all_to_all_v(&mut self, send: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, CommError> {
        if send.len() != self.num_ranks() {
            return Err(CommError::PartCount {
                expected: self.num_ranks(),
                found: send.len(),
            });
        }

        let sent: u64 = send.iter().map(|p| p.len() as u64).sum();
        for (peer, part) in send.into_iter().enumerate() {
            self.senders[peer]
                .send(part)
                .map_err(|_| CommError::Disconnected { peer })?;
        }

        let mut received = Vec::with_capacity(self.num_ranks());
        for (peer, rx) in self.receivers.iter().enumerate() {
            match rx.recv_timeout(self.timeout) {
                Ok(part) => received.push(part),
                Err(RecvTimeoutError::Timeout) => {
                    log::error!(
                        target: "nsk::comm",
                        "rank {} timed out waiting for rank {}",
                        self.rank,
                        peer
                    );
                    return Err(CommError::Timeout {
                        peer,
                        timeout_ms: self.timeout.as_millis() as u64,
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CommError::Disconnected { peer });
                }
            }
        }

        let bytes_received = received.iter().map(|p| p.len() as u64).sum();
        self.record(sent, bytes_received);
        Ok(received)
    }

    fn stats(&self) -> CommStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_all_to_all_v_routes_by_rank() {
        let mesh = ChannelCommunicator::mesh(3, 5_000);
        let results: Vec<Vec<Vec<u8>>> = thread::scope(|s| {
            let handles: Vec<_> = mesh
                .into_iter()
                .map(|mut comm| {
                    s.spawn(move || {
                        let r = comm.rank() as u8;
                        let send = (0..3u8).map(|dst| vec![r * 10 + dst]).collect();
                        comm.all_to_all_v(send).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results[1], vec![vec![1], vec![11], vec![21]]);
        assert_eq!(results[2], vec![vec![2], vec![12], vec![22]]);
    }

    #[test]
    fn test_reductions_agree() {
        let mesh = ChannelCommunicator::mesh(4, 5_000);
        let results: Vec<(u64, u64, bool)> = thread::scope(|s| {
            let handles: Vec<_> = mesh
                .into_iter()
                .map(|mut comm| {
                    s.spawn(move || {
                        let v = comm.rank() as u64 + 3;
                        (
                            comm.all_reduce_max(v).unwrap(),
                            comm.all_reduce_min(v).unwrap(),
                            comm.all_reduce_or(comm.rank() == 2).unwrap(),
                        )
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(results.iter().all(|r| *r == (6, 3, true)));
    }

    #[test]
    fn test_asymmetric_chunk_size_detected() {
        let mesh = ChannelCommunicator::mesh(2, 5_000);
        let results: Vec<Result<Vec<u8>, CommError>> = thread::scope(|s| {
            let handles: Vec<_> = mesh
                .into_iter()
                .map(|mut comm| {
                    s.spawn(move || {
                        let chunk = if comm.rank() == 0 { 4 } else { 8 };
                        comm.all_to_all(&vec![0u8; chunk * 2], chunk)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(results
            .iter()
            .all(|r| matches!(r, Err(CommError::SizeMismatch { .. }))));
    }

    #[test]
    fn test_departed_peer_is_reported() {
        let mut mesh = ChannelCommunicator::mesh(2, 5_000);
        let survivor = mesh.remove(0);
        drop(mesh);
        let mut survivor = survivor;
        let err = survivor.barrier().unwrap_err();
        assert_eq!(err, CommError::Disconnected { peer: 1 });
    }

    #[test]
    fn test_silent_peer_times_out() {
        let mut mesh = ChannelCommunicator::mesh(2, 20);
        let _silent = mesh.pop();
        let mut waiting = mesh.remove(0);
        assert!(matches!(
            waiting.barrier(),
            Err(CommError::Timeout { peer: 1, .. })
        ));
    }

    #[test]
    fn test_mesh_stats_aggregate() {
        let mesh = ChannelCommunicator::mesh(2, 5_000);
        let totals: Vec<CommStats> = thread::scope(|s| {
            let handles: Vec<_> = mesh
                .into_iter()
                .map(|mut comm| {
                    s.spawn(move || {
                        comm.all_gather(vec![1, 2]).unwrap();
                        comm.barrier().unwrap();
                        comm
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap().mesh_stats())
                .collect()
        });
        assert_eq!(totals[0].collectives, 2);
        assert_eq!(totals[0].bytes_sent, 8);
    }
}
