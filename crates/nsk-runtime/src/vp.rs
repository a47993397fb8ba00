//! Mapping between node ids and virtual processes
//!
//! A virtual process (VP) is a (thread, rank) pair. Nodes are dealt round
//! robin over VPs and VPs are dealt round robin over ranks, so consecutive
//! ids land on different ranks first and on different threads second.
//!
//! The mapping only depends on `num_threads × num_ranks`. Changing either
//! count is legal only at a full reset and yields a different decomposition,
//! so results are reproducible only for a fixed VP count.

use nsk_wire::NodeId;

/// Virtual process index
pub type Vp = usize;

/// VP layout of one rank
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VpIndex {
    num_threads: usize,
    num_ranks: usize,
    rank: usize,
}

impl VpIndex {
    /// Create the layout seen from `rank`
    pub fn new(num_threads: usize, num_ranks: usize, rank: usize) -> Self {
        debug_assert!(num_threads > 0 && num_ranks > 0 && rank < num_ranks);
        Self {
            num_threads,
            num_ranks,
            rank,
        }
    }

    /// Threads per rank
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Number of ranks
    pub fn num_ranks(&self) -> usize {
        self.num_ranks
    }

    /// This rank
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Total number of virtual processes
    pub fn num_vps(&self) -> usize {
        self.num_threads * self.num_ranks
    }

    /// VP owning a node
    pub fn node_id_to_vp(&self, id: NodeId) -> Vp {
        (id.raw() % self.num_vps() as u64) as Vp
    }

    /// Thread of a VP on its rank
    pub fn vp_to_thread(&self, vp: Vp) -> usize {
        vp / self.num_ranks
    }

    /// Rank of a VP
    pub fn vp_to_rank(&self, vp: Vp) -> usize {
        vp % self.num_ranks
    }

    /// VP of a local thread
    pub fn thread_to_vp(&self, thread: usize) -> Vp {
        thread * self.num_ranks + self.rank
    }

    /// Rank owning a node
    pub fn node_id_to_rank(&self, id: NodeId) -> usize {
        self.vp_to_rank(self.node_id_to_vp(id))
    }

    /// Thread owning a node on its rank
    pub fn node_id_to_thread(&self, id: NodeId) -> usize {
        self.vp_to_thread(self.node_id_to_vp(id))
    }

    /// Whether this rank owns a node
    pub fn is_local_node(&self, id: NodeId) -> bool {
        self.node_id_to_rank(id) == self.rank
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_two_ranks_two_threads() {
        let rank0 = VpIndex::new(2, 2, 0);
        let rank1 = VpIndex::new(2, 2, 1);

        assert_eq!(rank0.num_vps(), 4);
        assert_eq!(rank0.node_id_to_vp(NodeId::new(5)), 1);
        assert_eq!(rank1.node_id_to_vp(NodeId::new(5)), 1);

        for index in [rank0, rank1] {
            assert_eq!(index.vp_to_thread(1), 0);
            assert_eq!(index.vp_to_rank(1), 1);
        }

        assert!(rank1.is_local_node(NodeId::new(5)));
        assert!(!rank0.is_local_node(NodeId::new(5)));
        assert_eq!(rank1.thread_to_vp(0), 1);
        assert_eq!(rank0.thread_to_vp(1), 2);
    }

    #[test]
    fn test_every_node_has_exactly_one_owner() {
        let ranks: Vec<_> = (0..3).map(|r| VpIndex::new(2, 3, r)).collect();
        for id in 1..=24u64 {
            let owners = ranks
                .iter()
                .filter(|index| index.is_local_node(NodeId::new(id)))
                .count();
            assert_eq!(owners, 1, "node {}", id);
        }
    }

    proptest! {
        #[test]
        fn prop_thread_to_vp_inverts(threads in 1usize..8, ranks in 1usize..8, id in 1u64..100_000) {
            let owner = VpIndex::new(threads, ranks, 0).node_id_to_rank(NodeId::new(id));
            let index = VpIndex::new(threads, ranks, owner);
            let vp = index.node_id_to_vp(NodeId::new(id));
            prop_assert!(vp < threads * ranks);
            prop_assert_eq!(index.thread_to_vp(index.vp_to_thread(vp)), vp);
            prop_assert!(index.is_local_node(NodeId::new(id)));
        }
    }
}
