//! Connectivity rules
//!
//! A rule turns source and target lists into (source, target) pairs. Each
//! rank computes only the pairs whose target it owns, but validation looks
//! at the complete lists, so every rank accepts or rejects a call alike.
//! Random rules draw from streams keyed by connect call and node id, which
//! makes the resulting network independent of the thread and rank count.

use crate::error::{KernelError, Result};
use crate::rng::{stream_rng, DOMAIN_CONNECT};
use crate::vp::VpIndex;
use nsk_wire::NodeId;
use rand::seq::index::sample;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// How sources are paired with targets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ConnectionRule {
    /// `sources[i] -> targets[i]`
    OneToOne,
    /// Every source to every target
    AllToAll {
        /// Allow `s -> s`
        #[serde(default = "default_true")]
        allow_autapses: bool,
        /// Allow repeated pairs
        #[serde(default = "default_true")]
        allow_multapses: bool,
    },
    /// Each target draws `indegree` sources
    FixedIndegree {
        /// Incoming connections per target
        indegree: usize,
        /// Allow `s -> s`
        #[serde(default = "default_true")]
        allow_autapses: bool,
        /// Allow repeated pairs
        #[serde(default = "default_true")]
        allow_multapses: bool,
    },
    /// Each source draws `outdegree` targets
    FixedOutdegree {
        /// Outgoing connections per source
        outdegree: usize,
        /// Allow `s -> s`
        #[serde(default = "default_true")]
        allow_autapses: bool,
        /// Allow repeated pairs
        #[serde(default = "default_true")]
        allow_multapses: bool,
    },
    /// `n` pairs drawn uniformly from all source/target combinations
    FixedTotalNumber {
        /// Total connections
        n: usize,
        /// Allow `s -> s`
        #[serde(default = "default_true")]
        allow_autapses: bool,
        /// Allow repeated pairs
        #[serde(default = "default_true")]
        allow_multapses: bool,
    },
    /// Each pair independently with probability `p`
    PairwiseBernoulli {
        /// Connection probability
        p: f64,
        /// Allow `s -> s`
        #[serde(default = "default_true")]
        allow_autapses: bool,
    },
}

fn default_true() -> bool {
    true
}

impl ConnectionRule {
    /// All-to-all allowing autapses and multapses
    pub fn all_to_all() -> Self {
        Self::AllToAll {
            allow_autapses: true,
            allow_multapses: true,
        }
    }

    /// Rule name
    pub fn name(&self) -> &'static str {
        match self {
            Self::OneToOne => "one_to_one",
            Self::AllToAll { .. } => "all_to_all",
            Self::FixedIndegree { .. } => "fixed_indegree",
            Self::FixedOutdegree { .. } => "fixed_outdegree",
            Self::FixedTotalNumber { .. } => "fixed_total_number",
            Self::PairwiseBernoulli { .. } => "pairwise_bernoulli",
        }
    }

    /// Whether `disconnect` accepts this rule
    pub fn is_deterministic(&self) -> bool {
        matches!(self, Self::OneToOne | Self::AllToAll { .. })
    }
}

/// Inputs a rule needs besides the node lists
#[derive(Debug, Clone, Copy)]
pub struct RuleContext {
    /// Kernel seed
    pub seed: u64,
    /// Index of the connect call, identical on all ranks
    pub call_index: u64,
    /// VP layout of this rank
    pub vp: VpIndex,
}

impl RuleContext {
    fn rng(&self, key: u64) -> rand_chacha::ChaCha8Rng {
        stream_rng(self.seed, &[DOMAIN_CONNECT, self.call_index, key])
    }
}

fn reject_duplicates(list: &[NodeId], what: &str) -> Result<()> {
    let mut seen = HashSet::with_capacity(list.len());
    if let Some(dup) = list.iter().find(|id| !seen.insert(**id)) {
        return Err(KernelError::illegal_connection(format!(
            "node {} listed twice in {} without allow_multapses",
            dup, what
        )));
    }
    Ok(())
}

/// Pool of candidates for `node`, skipping it when autapses are disallowed
fn pool_for(candidates: &[NodeId], node: NodeId, allow_autapses: bool) -> Vec<NodeId> {
    if allow_autapses {
        candidates.to_vec()
    } else {
        candidates.iter().copied().filter(|c| *c != node).collect()
    }
}

fn draw_from_pool(
    pool: &[NodeId],
    k: usize,
    allow_multapses: bool,
    rng: &mut rand_chacha::ChaCha8Rng,
) -> Vec<NodeId> {
    if allow_multapses {
        (0..k).map(|_| pool[rng.gen_range(0..pool.len())]).collect()
    } else {
        let mut picked: Vec<usize> = sample(rng, pool.len(), k).into_vec();
        picked.sort_unstable();
        picked.into_iter().map(|i| pool[i]).collect()
    }
}

fn check_degree(
    degree: usize,
    list: &[NodeId],
    other: &[NodeId],
    allow_autapses: bool,
    allow_multapses: bool,
    what: &str,
) -> Result<()> {
    if degree == 0 {
        return Ok(());
    }
    for node in list {
        let pool = if allow_autapses {
            other.len()
        } else {
            other.iter().filter(|c| *c != node).count()
        };
        if pool == 0 || (!allow_multapses && degree > pool) {
            return Err(KernelError::illegal_connection(format!(
                "{} {} exceeds the {} candidates available to node {}",
                what, degree, pool, node
            )));
        }
    }
    Ok(())
}

/// Pairs selected by `rule` whose target this rank owns
pub fn select_pairs(
    rule: &ConnectionRule,
    sources: &[NodeId],
    targets: &[NodeId],
    ctx: &RuleContext,
) -> Result<Vec<(NodeId, NodeId)>> {
    let local = |t: &NodeId| ctx.vp.is_local_node(*t);

    match *rule {
        ConnectionRule::OneToOne => {
            if sources.len() != targets.len() {
                return Err(KernelError::illegal_connection(format!(
                    "one_to_one needs equal list lengths, got {} sources and {} targets",
                    sources.len(),
                    targets.len()
                )));
            }
            Ok(sources
                .iter()
                .zip(targets)
                .filter(|(_, t)| local(t))
                .map(|(s, t)| (*s, *t))
                .collect())
        }

        ConnectionRule::AllToAll {
            allow_autapses,
            allow_multapses,
        } => {
            if !allow_multapses {
                reject_duplicates(sources, "sources")?;
                reject_duplicates(targets, "targets")?;
            }
            let mut pairs = Vec::new();
            for t in targets.iter().filter(|t| local(t)) {
                for s in sources {
                    if allow_autapses || s != t {
                        pairs.push((*s, *t));
                    }
                }
            }
            Ok(pairs)
        }

        ConnectionRule::FixedIndegree {
            indegree,
            allow_autapses,
            allow_multapses,
        } => {
            if !allow_multapses {
                reject_duplicates(sources, "sources")?;
            }
            check_degree(indegree, targets, sources, allow_autapses, allow_multapses, "indegree")?;
            let mut pairs = Vec::new();
            for t in targets.iter().filter(|t| local(t)) {
                let pool = pool_for(sources, *t, allow_autapses);
                let mut rng = ctx.rng(t.raw());
                for s in draw_from_pool(&pool, indegree, allow_multapses, &mut rng) {
                    pairs.push((s, *t));
                }
            }
            Ok(pairs)
        }

        ConnectionRule::FixedOutdegree {
            outdegree,
            allow_autapses,
            allow_multapses,
        } => {
            if !allow_multapses {
                reject_duplicates(targets, "targets")?;
            }
            check_degree(outdegree, sources, targets, allow_autapses, allow_multapses, "outdegree")?;
            let mut pairs = Vec::new();
            for s in sources {
                let pool = pool_for(targets, *s, allow_autapses);
                let mut rng = ctx.rng(s.raw());
                for t in draw_from_pool(&pool, outdegree, allow_multapses, &mut rng) {
                    if local(&t) {
                        pairs.push((*s, t));
                    }
                }
            }
            Ok(pairs)
        }

        ConnectionRule::FixedTotalNumber {
            n,
            allow_autapses,
            allow_multapses,
        } => {
            if !allow_multapses {
                reject_duplicates(sources, "sources")?;
                reject_duplicates(targets, "targets")?;
            }
            let source_set: HashSet<NodeId> = sources.iter().copied().collect();
            let shared = if allow_autapses {
                0
            } else {
                targets.iter().filter(|t| source_set.contains(t)).count()
            };
            let available = sources.len() * targets.len() - shared;
            if n > 0 && (available == 0 || (!allow_multapses && n > available)) {
                return Err(KernelError::illegal_connection(format!(
                    "fixed_total_number {} exceeds the {} available pairs",
                    n, available
                )));
            }

            let mut rng = ctx.rng(0);
            let mut chosen = HashSet::new();
            let mut pairs = Vec::new();
            let mut accepted = 0;
            while accepted < n {
                let s = sources[rng.gen_range(0..sources.len())];
                let t = targets[rng.gen_range(0..targets.len())];
                if !allow_autapses && s == t {
                    continue;
                }
                if !allow_multapses && !chosen.insert((s, t)) {
                    continue;
                }
                accepted += 1;
                if local(&t) {
                    pairs.push((s, t));
                }
            }
            Ok(pairs)
        }

        ConnectionRule::PairwiseBernoulli { p, allow_autapses } => {
            if !(0.0..=1.0).contains(&p) {
                return Err(KernelError::illegal_connection(format!(
                    "pairwise_bernoulli probability {} outside [0, 1]",
                    p
                )));
            }
            let mut pairs = Vec::new();
            for t in targets.iter().filter(|t| local(t)) {
                let mut rng = ctx.rng(t.raw());
                for s in sources {
                    if !allow_autapses && s == t {
                        continue;
                    }
                    if rng.gen::<f64>() < p {
                        pairs.push((*s, *t));
                    }
                }
            }
            Ok(pairs)
        }
    }
}
