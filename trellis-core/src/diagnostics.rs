//! Graph Diagnostics
//!
//! A serializable picture of the current thread's reactive graph, for
//! debugging and for asserting graph shape in tests.

use serde::Serialize;
use slotmap::Key;

use crate::graph::{NodeId, NodeKind, NodeState};
use crate::reactive::Runtime;

/// One node of a [`GraphSnapshot`]. Node references are raw ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSnapshot {
    pub id: u64,
    pub kind: NodeKind,
    pub state: NodeState,
    pub errored: bool,
    pub version: u64,
    pub runs: u64,
    pub sources: Vec<u64>,
    pub observers: Vec<u64>,
    pub owner: Option<u64>,
    pub owned: Vec<u64>,
    pub cleanups: usize,
    pub contexts: usize,
}

/// Every live node of the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<NodeSnapshot>,
    pub batching: bool,
}

impl GraphSnapshot {
    /// Find the entry for `id`.
    pub fn node(&self, id: NodeId) -> Option<&NodeSnapshot> {
        let raw = raw_id(id);
        self.nodes.iter().find(|node| node.id == raw)
    }

    /// Number of live nodes of `kind`.
    pub fn count(&self, kind: NodeKind) -> usize {
        self.nodes.iter().filter(|node| node.kind == kind).count()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// The raw id used for `id` in snapshots.
pub fn raw_id(id: NodeId) -> u64 {
    id.data().as_ffi()
}

/// Capture the reactive graph of the current thread.
pub fn snapshot() -> GraphSnapshot {
    Runtime::with(|runtime| {
        let graph = runtime.graph();
        let nodes = graph
            .iter()
            .map(|(id, node)| NodeSnapshot {
                id: raw_id(id),
                kind: node.kind(),
                state: node.state(),
                errored: node.errored,
                version: node.version(),
                runs: node.runs,
                sources: node.sources().iter().copied().map(raw_id).collect(),
                observers: node.observers().iter().copied().map(raw_id).collect(),
                owner: node.owner.map(raw_id),
                owned: node.owned.iter().copied().map(raw_id).collect(),
                cleanups: node.cleanups.len(),
                contexts: node.contexts.len(),
            })
            .collect();

        GraphSnapshot {
            nodes,
            batching: runtime.is_batching(),
        }
    })
}
