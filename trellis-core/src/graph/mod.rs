//! Dependency Graph
//!
//! This module implements the graph that tracks relationships between
//! reactive values and computations, plus the ownership tree that governs
//! their lifetime.
//!
//! # Overview
//!
//! The dependency graph is a directed graph where:
//!
//! - Nodes represent signals, computations (memos, computeds, effects) and
//!   plain owners
//! - Edges represent dependencies: if A read B during its last run, there
//!   is an edge from B to A
//!
//! Ownership is a second, tree-shaped relation over the same nodes.
//!
//! # Design Decisions
//!
//! 1. Nodes live in a generation-tagged arena (`slotmap`) and refer to each
//!    other by [`NodeId`]. Neither edges nor the owner tree hold owning
//!    references, so disposal is a plain removal and stale handles are
//!    detected instead of dangling.
//!
//! 2. Observers are kept in an `IndexSet`, which gives O(1) edge removal
//!    and a deterministic iteration order.
//!
//! 3. We maintain both forward (sources) and reverse (observers) edges
//!    to enable efficient traversal in both directions.

mod node;
mod scheduler;

pub use node::{Node, NodeId, NodeKind, NodeState};
pub(crate) use node::{Cleanup, ComputeFn, ErrorHandler, Output};
pub use scheduler::{Lane, UpdateScheduler};
