//! Node selection strategies
//!
//! A [`NodeSelector`] is built once from the service's virtual nodes and is
//! read-only afterwards, apart from the round-robin cursors. Keyed
//! strategies ([`HashRing`], [`Modulo`]) map equal hashes to the same node
//! for the life of the selector; round-robin strategies ignore the hash.

use crate::core::error::ConfigError;
use crate::core::types::{KeyHash, SelectorKind};
use crate::routing::hash::HashCodeProvider;
use crate::routing::node::{Distribution, VirtualNode};
use crossbeam::utils::CachePadded;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Consistent-hash ring: nearest successor of the key hash, wrapping to
/// the lowest position.
#[derive(Debug)]
pub struct HashRing {
    nodes: Vec<VirtualNode>,
    ring: BTreeMap<KeyHash, usize>,
}

impl HashRing {
    /// Place every node at the hash of its id. On a position collision the
    /// first node keeps the slot.
    pub fn new(nodes: Vec<VirtualNode>, hasher: &dyn HashCodeProvider) -> Result<Self, ConfigError> {
        if nodes.is_empty() {
            return Err(ConfigError::ReplicaCount);
        }
        let mut ring = BTreeMap::new();
        for (i, node) in nodes.iter().enumerate() {
            ring.entry(hasher.hash_str(node.id())).or_insert(i);
        }
        Ok(Self { nodes, ring })
    }

    /// Node owning `hash`
    pub fn select(&self, hash: KeyHash) -> &VirtualNode {
        let idx = self
            .ring
            .range(hash..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map_or(0, |(_, &i)| i);
        &self.nodes[idx]
    }

    /// Distinct ring positions
    pub fn positions(&self) -> usize {
        self.ring.len()
    }
}

/// `|hash| mod n` over the node table
#[derive(Debug)]
pub struct Modulo {
    nodes: Vec<VirtualNode>,
}

impl Modulo {
    /// Selector over `nodes` (must be non-empty)
    pub fn new(nodes: Vec<VirtualNode>) -> Result<Self, ConfigError> {
        if nodes.is_empty() {
            return Err(ConfigError::ReplicaCount);
        }
        Ok(Self { nodes })
    }

    /// Node at `|hash| mod n`
    #[inline]
    pub fn select(&self, hash: KeyHash) -> &VirtualNode {
        let idx = (hash.unsigned_abs() % self.nodes.len() as u64) as usize;
        &self.nodes[idx]
    }
}

/// Round-robin cursor for a single producer thread.
///
/// The cursor is advanced with a plain load and store, not an atomic
/// read-modify-write: concurrent callers stay memory safe but may be handed
/// the same node twice. Use [`RoundRobinMultiProducer`] when several
/// threads submit.
#[derive(Debug)]
pub struct RoundRobinSingleProducer {
    nodes: Vec<VirtualNode>,
    cursor: CachePadded<AtomicU64>,
}

impl RoundRobinSingleProducer {
    /// Selector over `nodes` (must be non-empty)
    pub fn new(nodes: Vec<VirtualNode>) -> Result<Self, ConfigError> {
        if nodes.is_empty() {
            return Err(ConfigError::ReplicaCount);
        }
        Ok(Self { nodes, cursor: CachePadded::new(AtomicU64::new(0)) })
    }

    /// Next node in turn
    #[inline]
    pub fn select(&self) -> &VirtualNode {
        let n = self.cursor.load(Ordering::Relaxed);
        self.cursor.store(n.wrapping_add(1), Ordering::Relaxed);
        &self.nodes[(n % self.nodes.len() as u64) as usize]
    }
}

/// Round-robin cursor safe for any number of producer threads
#[derive(Debug)]
pub struct RoundRobinMultiProducer {
    nodes: Vec<VirtualNode>,
    cursor: CachePadded<AtomicU64>,
}

impl RoundRobinMultiProducer {
    /// Selector over `nodes` (must be non-empty)
    pub fn new(nodes: Vec<VirtualNode>) -> Result<Self, ConfigError> {
        if nodes.is_empty() {
            return Err(ConfigError::ReplicaCount);
        }
        Ok(Self { nodes, cursor: CachePadded::new(AtomicU64::new(0)) })
    }

    /// Next node in turn
    #[inline]
    pub fn select(&self) -> &VirtualNode {
        let n = self.cursor.fetch_add(1, Ordering::Relaxed);
        &self.nodes[(n % self.nodes.len() as u64) as usize]
    }
}

/// Closed set of selection strategies, chosen by [`SelectorKind`]
#[derive(Debug)]
pub enum NodeSelector {
    /// Consistent hashing
    HashRing(HashRing),
    /// Hash modulo node count
    Modulo(Modulo),
    /// Unkeyed rotation, single producer
    RoundRobinSingleProducer(RoundRobinSingleProducer),
    /// Unkeyed rotation, any producers
    RoundRobinMultiProducer(RoundRobinMultiProducer),
}

impl NodeSelector {
    /// Node layout each strategy is built from
    pub fn distribution(kind: SelectorKind) -> Distribution {
        match kind {
            SelectorKind::HashRing => Distribution::RandomReplicas,
            _ => Distribution::RoundRobin,
        }
    }

    /// Build the strategy `kind` over `nodes`
    pub fn new(kind: SelectorKind, nodes: Vec<VirtualNode>, hasher: &dyn HashCodeProvider) -> Result<Self, ConfigError> {
        Ok(match kind {
            SelectorKind::HashRing => NodeSelector::HashRing(HashRing::new(nodes, hasher)?),
            SelectorKind::Modulo => NodeSelector::Modulo(Modulo::new(nodes)?),
            SelectorKind::RoundRobinSingleProducer => {
                NodeSelector::RoundRobinSingleProducer(RoundRobinSingleProducer::new(nodes)?)
            }
            SelectorKind::RoundRobinMultiProducer => {
                NodeSelector::RoundRobinMultiProducer(RoundRobinMultiProducer::new(nodes)?)
            }
        })
    }

    /// Strategy of this selector
    pub fn kind(&self) -> SelectorKind {
        match self {
            NodeSelector::HashRing(_) => SelectorKind::HashRing,
            NodeSelector::Modulo(_) => SelectorKind::Modulo,
            NodeSelector::RoundRobinSingleProducer(_) => SelectorKind::RoundRobinSingleProducer,
            NodeSelector::RoundRobinMultiProducer(_) => SelectorKind::RoundRobinMultiProducer,
        }
    }

    /// Node for `hash`. Round-robin strategies ignore the hash.
    #[inline]
    pub fn select(&self, hash: KeyHash) -> &VirtualNode {
        match self {
            NodeSelector::HashRing(s) => s.select(hash),
            NodeSelector::Modulo(s) => s.select(hash),
            NodeSelector::RoundRobinSingleProducer(s) => s.select(),
            NodeSelector::RoundRobinMultiProducer(s) => s.select(),
        }
    }

    /// All virtual nodes, in construction order
    pub fn nodes(&self) -> &[VirtualNode] {
        match self {
            NodeSelector::HashRing(s) => &s.nodes,
            NodeSelector::Modulo(s) => &s.nodes,
            NodeSelector::RoundRobinSingleProducer(s) => &s.nodes,
            NodeSelector::RoundRobinMultiProducer(s) => &s.nodes,
        }
    }
}
