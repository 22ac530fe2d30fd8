//! Rank Graph
//!
//! This module implements the dependency graph that orders firings inside a
//! transaction.
//!
//! # Overview
//!
//! - Nodes stand for streams (and the few helper nodes some operators need).
//! - An edge `A -> B` means a firing of A may cause a firing of B in the same
//!   instant, so B must be processed after A.
//!
//! Every node carries a rank. Queued work is ordered by the rank of the node
//! it belongs to, so dependencies always run before their dependents.
//!
//! # Design Decisions
//!
//! 1. Nodes live in one arena indexed by [`NodeId`]. Streams hold IDs, never
//!    pointers, so the back-edges created by loops are plain data.
//!
//! 2. Ranks are assigned at link time and only grow. Re-deriving a tight
//!    ordering on unlink is not worth the cost.
//!
//! 3. The arena sits behind its own mutex, separate from the transaction
//!    lock, so tearing down a listener on one thread never waits for a whole
//!    propagation on another.

mod node;
mod rank_graph;

pub use node::{Edge, EdgeId, Node, NodeId, Rank};
pub use rank_graph::{with_graph, RankGraph};
