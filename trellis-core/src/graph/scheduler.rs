//! Update Scheduler
//!
//! The scheduler owns every node of the dependency graph and decides which
//! computations have to be revisited after a change.
//!
//! # Algorithm
//!
//! Updates are split into two phases:
//!
//! 1. **Mark.** When a source changes, its direct observers become `Dirty`
//!    and everything downstream of them becomes `Check`. A node already at
//!    or above the requested state is not revisited, so marking costs at
//!    most one visit per edge even for diamond-shaped graphs. Every node
//!    that leaves `Clean` is queued in the lane of its kind.
//!
//! 2. **Recompute.** The runtime drains the lanes and brings each queued
//!    node up to date, pulling its memo sources first. That pull is what
//!    orders the work topologically; the lanes only fix which roots are
//!    visited and in what order.
//!
//! Lanes are insertion-ordered sets, so a node queued twice before a drain
//! runs once.

use std::collections::HashSet;

use indexmap::IndexSet;
use slotmap::SlotMap;

use super::node::{Node, NodeId, NodeKind, NodeState};

/// Which queue a computation waits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// Memos and computeds.
    Pure,
    /// Render effects, run before deferred effects.
    Render,
    /// Deferred effects, run once the graph is clean.
    User,
}

impl Lane {
    /// The lane a node of `kind` is queued in, if any.
    pub fn of(kind: NodeKind) -> Option<Lane> {
        match kind {
            NodeKind::Memo | NodeKind::Computed => Some(Lane::Pure),
            NodeKind::RenderEffect => Some(Lane::Render),
            NodeKind::Effect => Some(Lane::User),
            NodeKind::Signal | NodeKind::Owner => None,
        }
    }
}

#[derive(Debug, Default)]
struct Queues {
    pure: IndexSet<NodeId>,
    render: IndexSet<NodeId>,
    user: IndexSet<NodeId>,
}

impl Queues {
    fn lane_mut(&mut self, lane: Lane) -> &mut IndexSet<NodeId> {
        match lane {
            Lane::Pure => &mut self.pure,
            Lane::Render => &mut self.render,
            Lane::User => &mut self.user,
        }
    }

    fn push(&mut self, kind: NodeKind, id: NodeId) {
        if let Some(lane) = Lane::of(kind) {
            self.lane_mut(lane).insert(id);
        }
    }
}

/// The update scheduler manages the dependency graph and coordinates updates.
#[derive(Debug, Default)]
pub struct UpdateScheduler {
    /// All nodes in the graph.
    nodes: SlotMap<NodeId, Node>,

    /// Computations waiting for the next drain.
    queues: Queues,
}

impl UpdateScheduler {
    /// Create a new empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node to the graph, attaching it to its owner.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let owner = node.owner;
        let id = self.nodes.insert(node);
        if let Some(parent) = owner.and_then(|owner| self.nodes.get_mut(owner)) {
            parent.owned.push(id);
        }
        id
    }

    /// Remove a node from the graph.
    ///
    /// Also removes all edges involving this node and detaches it from its
    /// owner. Owned children are left alone; the caller disposes them first.
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        let node = self.nodes.remove(node_id)?;

        for source_id in &node.sources {
            if let Some(source) = self.nodes.get_mut(*source_id) {
                source.observers.swap_remove(&node_id);
            }
        }

        for observer_id in &node.observers {
            if let Some(observer) = self.nodes.get_mut(*observer_id) {
                observer.sources.swap_remove(&node_id);
            }
        }

        if let Some(parent) = node.owner.and_then(|owner| self.nodes.get_mut(owner)) {
            parent.owned.retain(|id| *id != node_id);
        }

        Some(node)
    }

    /// Check if a node is still in the graph.
    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(node_id)
    }

    /// Get a reference to a node.
    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    /// Get a mutable reference to a node.
    pub fn get_node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(node_id)
    }

    /// Iterate over all nodes.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter()
    }

    /// Add a dependency edge: `observer` read `source`.
    ///
    /// Idempotent; returns true if the edge is new.
    pub fn add_edge(&mut self, source: NodeId, observer: NodeId) -> bool {
        if !self.nodes.contains_key(source) {
            return false;
        }
        let added = match self.nodes.get_mut(observer) {
            Some(node) => node.add_source(source),
            None => return false,
        };
        if added {
            if let Some(node) = self.nodes.get_mut(source) {
                node.observers.insert(observer);
            }
        }
        added
    }

    /// Remove a dependency edge.
    pub fn remove_edge(&mut self, source: NodeId, observer: NodeId) {
        if let Some(node) = self.nodes.get_mut(source) {
            node.observers.swap_remove(&observer);
        }
        if let Some(node) = self.nodes.get_mut(observer) {
            node.sources.swap_remove(&source);
        }
    }

    /// Drop every source edge of `node_id`, ahead of a re-execution.
    pub fn clear_sources(&mut self, node_id: NodeId) {
        let sources = match self.nodes.get_mut(node_id) {
            Some(node) => std::mem::take(&mut node.sources),
            None => return,
        };
        for source_id in sources {
            if let Some(source) = self.nodes.get_mut(source_id) {
                source.observers.swap_remove(&node_id);
            }
        }
    }

    /// Mark the observers of a changed source and queue what needs work.
    ///
    /// Direct observers become `Dirty`, everything further downstream
    /// `Check`. Returns the number of nodes whose state was raised.
    pub fn mark_changed(&mut self, source_id: NodeId) -> usize {
        let mut stack: Vec<(NodeId, NodeState)> = match self.nodes.get(source_id) {
            Some(source) => source
                .observers
                .iter()
                .rev()
                .map(|id| (*id, NodeState::Dirty))
                .collect(),
            None => return 0,
        };

        let mut marked = 0;
        while let Some((node_id, state)) = stack.pop() {
            let Some(node) = self.nodes.get_mut(node_id) else {
                continue;
            };
            if node.state == NodeState::Disposed {
                continue;
            }

            let was_clean = node.state == NodeState::Clean;
            let retry = node.errored;
            if !node.raise(state) && !retry {
                continue;
            }
            marked += 1;

            if was_clean || retry {
                node.errored = false;
                self.queues.push(node.kind, node_id);
            }

            stack.extend(
                node.observers
                    .iter()
                    .rev()
                    .map(|id| (*id, NodeState::Check)),
            );
        }

        marked
    }

    /// Whether `target` is reachable from `node_id` by following sources.
    pub fn depends_on(&self, node_id: NodeId, target: NodeId) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![node_id];

        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            let Some(node) = self.nodes.get(current) else {
                continue;
            };
            for source in &node.sources {
                if *source == target {
                    return true;
                }
                stack.push(*source);
            }
        }

        false
    }

    /// Queue a computation regardless of its state.
    pub fn schedule(&mut self, node_id: NodeId) {
        if let Some(node) = self.nodes.get(node_id) {
            self.queues.push(node.kind, node_id);
        }
    }

    /// Take everything queued in `lane`, in queue order.
    pub fn take_lane(&mut self, lane: Lane) -> Vec<NodeId> {
        std::mem::take(self.queues.lane_mut(lane)).into_iter().collect()
    }

    /// Put unprocessed nodes back at the front of `lane`.
    pub fn requeue_front(&mut self, lane: Lane, node_ids: impl IntoIterator<Item = NodeId>) {
        let queue = self.queues.lane_mut(lane);
        let mut restored: IndexSet<NodeId> = node_ids.into_iter().collect();
        restored.extend(queue.drain(..));
        *queue = restored;
    }

    /// Whether memos, computeds or render effects are waiting.
    pub fn has_sync_work(&self) -> bool {
        !self.queues.pure.is_empty() || !self.queues.render.is_empty()
    }

    /// Whether nothing at all is waiting.
    pub fn is_idle(&self) -> bool {
        !self.has_sync_work() && self.queues.user.is_empty()
    }

    /// Abandon all queued work, leaving each node `Dirty` and flagged so
    /// the next change that reaches it queues it again.
    pub fn abandon_queued(&mut self) -> usize {
        let queues = std::mem::take(&mut self.queues);
        let mut abandoned = 0;
        for node_id in queues
            .pure
            .into_iter()
            .chain(queues.render)
            .chain(queues.user)
        {
            if let Some(node) = self.nodes.get_mut(node_id) {
                if node.state != NodeState::Disposed {
                    node.state = NodeState::Dirty;
                    node.errored = true;
                    abandoned += 1;
                }
            }
        }
        abandoned
    }

    /// Add a node without registering it in its owner's `owned` list.
    ///
    /// Used for roots: they see their parent's context but are not
    /// disposed with it.
    pub fn add_detached(&mut self, node: Node) -> NodeId {
        self.nodes.insert(node)
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
