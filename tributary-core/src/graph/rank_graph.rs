//! Rank Graph
//!
//! The rank graph decides the order in which queued firings run inside one
//! transaction. It ensures that a node always fires after every node it
//! depends on.
//!
//! # Algorithm
//!
//! Instead of sorting on every update, each node carries a rank that is kept
//! strictly greater than the ranks of the nodes linking to it:
//!
//! 1. `link(source, target)` records the edge.
//! 2. If `target.rank <= source.rank`, the target is raised to
//!    `source.rank + 1`.
//! 3. The raise cascades through the target's own edges, recursively.
//! 4. A node already on the current cascade path is skipped. This is what
//!    lets loop back-edges exist without the cascade running forever, at the
//!    cost of not keeping the rank invariant across the back-edge itself.
//!
//! The guard is the current path, not a set of every node visited so far. A
//! node reached again along a longer path is raised again, so ranks stay
//! strictly increasing along every edge of an acyclic graph. The price is
//! that a cascade may revisit a node once per simple path leading to it.
//!
//! Ranks never go down, so `unlink` is just an edge removal.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::node::{EdgeId, Node, NodeId, Rank};

/// All nodes in the process, indexed by ID.
pub struct RankGraph {
    nodes: HashMap<NodeId, Node>,
}

impl RankGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Add a node with the given starting rank.
    pub fn add_node(&mut self, rank: Rank) -> NodeId {
        let node = Node::new(rank);
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node and its outgoing edges.
    ///
    /// Edges pointing *at* the node are left to their owners, who remove them
    /// when their own listeners are torn down.
    pub fn remove_node(&mut self, node_id: NodeId) {
        self.nodes.remove(&node_id);
    }

    /// Get a reference to a node.
    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    /// Current rank of a node. The sink node ranks after everything.
    pub fn rank(&self, node_id: NodeId) -> Option<Rank> {
        if node_id.is_null() {
            return Some(Rank::MAX);
        }
        self.nodes.get(&node_id).map(Node::rank)
    }

    /// Link `source -> target`.
    ///
    /// Returns the edge and whether any rank changed. When ranks change while
    /// a transaction has queued work, the queue must be re-ordered.
    pub fn link(&mut self, source: NodeId, target: NodeId) -> (EdgeId, bool) {
        let limit = self.rank(source).unwrap_or(0);
        let changed = self.ensure_bigger_than(target, limit);
        let edge = match self.nodes.get_mut(&source) {
            Some(node) => node.add_target(target),
            None => EdgeId::new(),
        };
        (edge, changed)
    }

    /// Remove an edge previously returned by [`link`](Self::link).
    pub fn unlink(&mut self, source: NodeId, edge: EdgeId) -> bool {
        self.nodes
            .get_mut(&source)
            .map(|node| node.remove_target(edge))
            .unwrap_or(false)
    }

    /// Raise `node_id` above `limit`, cascading to everything it links to.
    ///
    /// Returns true if any rank changed.
    pub fn ensure_bigger_than(&mut self, node_id: NodeId, limit: Rank) -> bool {
        let mut path = HashSet::new();
        self.raise(node_id, limit, &mut path)
    }

    fn raise(&mut self, node_id: NodeId, limit: Rank, path: &mut HashSet<NodeId>) -> bool {
        if node_id.is_null() || path.contains(&node_id) {
            return false;
        }

        let rank = limit.saturating_add(1);
        let targets: SmallVec<[NodeId; 4]> = match self.nodes.get_mut(&node_id) {
            Some(node) if node.rank() <= limit => {
                node.set_rank(rank);
                node.targets().iter().map(|e| e.target).collect()
            }
            _ => return false,
        };

        tracing::trace!(node = node_id.raw(), rank, "rank raised");

        path.insert(node_id);
        for target in targets {
            self.raise(target, rank, path);
        }
        path.remove(&node_id);

        true
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

impl Default for RankGraph {
    fn default() -> Self {
        Self::new()
    }
}

// The process-wide graph. Its mutex is the fine-grained structural lock:
// it is held only while ranks or edges are read or changed, never while user
// code runs.
static GRAPH: OnceLock<Mutex<RankGraph>> = OnceLock::new();

/// Run `f` with exclusive access to the process-wide rank graph.
pub fn with_graph<R>(f: impl FnOnce(&mut RankGraph) -> R) -> R {
    let mut graph = GRAPH.get_or_init(|| Mutex::new(RankGraph::new())).lock();
    f(&mut graph)
}
