//! Graph Nodes
//!
//! This module defines the node and edge types that live in the rank graph.

use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

/// Position of a node in firing order. Lower ranks fire first.
pub type Rank = u64;

/// Unique identifier for a node in the rank graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// The sink node. Anything linked to it fires after every ranked node,
    /// and it never takes part in a rank cascade.
    pub const NULL: NodeId = NodeId(u64::MAX);

    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Whether this is the sink node.
    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifies one link between two nodes. The same pair of nodes may be
/// linked more than once (e.g. a stream merged with itself), so edges are
/// told apart by this ID rather than by their endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeId(u64);

impl EdgeId {
    /// Generate a new unique edge ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for EdgeId {
    fn default() -> Self {
        Self::new()
    }
}

/// A directed dependency from the owning node to `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub id: EdgeId,
    pub target: NodeId,
}

/// A node in the rank graph.
#[derive(Debug)]
pub struct Node {
    id: NodeId,

    /// Firing order. Only ever grows.
    rank: Rank,

    /// Outgoing edges, in link order.
    targets: SmallVec<[Edge; 4]>,
}

impl Node {
    /// Create a node with a fresh ID and the given rank.
    pub fn new(rank: Rank) -> Self {
        Self {
            id: NodeId::new(),
            rank,
            targets: SmallVec::new(),
        }
    }

    /// Get the node's ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the node's rank.
    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub(crate) fn set_rank(&mut self, rank: Rank) {
        debug_assert!(rank >= self.rank, "ranks never decrease");
        self.rank = rank;
    }

    /// Add an edge to `target` and return its ID.
    pub fn add_target(&mut self, target: NodeId) -> EdgeId {
        let id = EdgeId::new();
        self.targets.push(Edge { id, target });
        id
    }

    /// Remove an edge. Returns false if it was already gone.
    pub fn remove_target(&mut self, edge: EdgeId) -> bool {
        match self.targets.iter().position(|e| e.id == edge) {
            Some(pos) => {
                self.targets.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Outgoing edges.
    pub fn targets(&self) -> &[Edge] {
        &self.targets
    }

    /// Whether any edge points at `target`.
    pub fn links_to(&self, target: NodeId) -> bool {
        self.targets.iter().any(|e| e.target == target)
    }
}
