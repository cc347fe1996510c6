//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.
//! Signals, computations and plain owners share one node layout so that
//! ownership, edges and disposal are handled uniformly by the arena.

use std::any::Any;
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexSet;
use serde::Serialize;

use crate::error::{BoxError, ReactiveError};
use crate::reactive::ContextId;

slotmap::new_key_type! {
    /// Generation-tagged handle to a node in the dependency graph.
    ///
    /// A handle to a removed node never aliases a newer node.
    pub struct NodeId;
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A mutable source cell. Never executes.
    Signal,

    /// A cached derived value; both a source and a computation.
    Memo,

    /// A synchronous computation run in the pure phase, usually to write
    /// other signals.
    Computed,

    /// An effect flushed right after the pure phase.
    RenderEffect,

    /// A deferred effect, run once the graph is clean.
    Effect,

    /// A scope with no function of its own (roots, providers, boundaries).
    Owner,
}

impl NodeKind {
    /// Whether nodes of this kind run a function.
    pub fn is_computation(self) -> bool {
        matches!(
            self,
            NodeKind::Memo | NodeKind::Computed | NodeKind::RenderEffect | NodeKind::Effect
        )
    }

    /// Whether nodes of this kind can be read by other computations.
    pub fn is_source(self) -> bool {
        matches!(self, NodeKind::Signal | NodeKind::Memo)
    }
}

/// Freshness of a node.
///
/// The ordering `Clean < Check < Dirty` is used by the mark phase: a node
/// is only revisited when the requested state is strictly higher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// The value is up to date.
    Clean,

    /// An upstream memo might have changed; sources must be verified.
    Check,

    /// A direct source changed; the node must re-execute.
    Dirty,

    /// The node is being torn down.
    Disposed,
}

/// Result of running a computation closure.
pub(crate) enum Output {
    /// A memo produced a value; `changed` is false when it compared equal
    /// to the previous one.
    Value { value: Rc<dyn Any>, changed: bool },

    /// An effect or computed finished.
    Unit,
}

/// Type-erased computation closure. Receives the previous value of the node.
pub(crate) type ComputeFn = Rc<dyn Fn(Option<&dyn Any>) -> Result<Output, BoxError>>;

/// Cleanup registered with `on_cleanup`.
pub(crate) type Cleanup = Box<dyn FnOnce()>;

/// Error boundary handler.
pub(crate) type ErrorHandler = Rc<dyn Fn(ReactiveError)>;

/// A node in the dependency graph.
pub struct Node {
    /// What kind of node this is.
    pub(crate) kind: NodeKind,

    /// Current freshness.
    pub(crate) state: NodeState,

    /// Set when the last run failed; the next mark re-queues the node.
    pub(crate) errored: bool,

    /// Current value (memos only).
    pub(crate) value: Option<Rc<dyn Any>>,

    /// Bumped every time the value changes.
    pub(crate) version: u64,

    /// Number of completed executions.
    pub(crate) runs: u64,

    /// The function to run (computations only).
    pub(crate) compute: Option<ComputeFn>,

    /// Nodes read during the last execution, in read order.
    pub(crate) sources: IndexSet<NodeId>,

    /// Computations that read this node during their last execution.
    pub(crate) observers: IndexSet<NodeId>,

    /// Exclusive parent in the ownership tree.
    pub(crate) owner: Option<NodeId>,

    /// Owners and computations created under this node.
    pub(crate) owned: Vec<NodeId>,

    /// Callbacks to run when this node is disposed or re-executed.
    pub(crate) cleanups: Vec<Cleanup>,

    /// Context entries set directly on this owner.
    pub(crate) contexts: HashMap<ContextId, Rc<dyn Any>>,

    /// Error boundary handler, if this owner is a boundary.
    pub(crate) error_handler: Option<ErrorHandler>,
}

impl Node {
    /// Create a new node with the given kind.
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            // Computations start dirty to ensure the first execution.
            state: if kind.is_computation() {
                NodeState::Dirty
            } else {
                NodeState::Clean
            },
            errored: false,
            value: None,
            version: 0,
            runs: 0,
            compute: None,
            sources: IndexSet::new(),
            observers: IndexSet::new(),
            owner: None,
            owned: Vec::new(),
            cleanups: Vec::new(),
            contexts: HashMap::new(),
            error_handler: None,
        }
    }

    /// Create a new signal node. The value itself lives in the typed handle.
    pub(crate) fn signal() -> Self {
        Self::new(NodeKind::Signal)
    }

    /// Create a computation node of the given kind.
    pub(crate) fn computation(kind: NodeKind, compute: ComputeFn, owner: Option<NodeId>) -> Self {
        debug_assert!(kind.is_computation());
        let mut node = Self::new(kind);
        node.compute = Some(compute);
        node.owner = owner;
        node
    }

    /// Create a plain owner node.
    pub(crate) fn owner(owner: Option<NodeId>) -> Self {
        let mut node = Self::new(NodeKind::Owner);
        node.owner = owner;
        node
    }

    /// Get the node's kind.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Get the current state.
    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Check if the node is up to date.
    pub fn is_clean(&self) -> bool {
        self.state == NodeState::Clean
    }

    /// Raise the state to `state` if it is higher than the current one.
    ///
    /// Returns true when the state changed.
    pub fn raise(&mut self, state: NodeState) -> bool {
        if self.state == NodeState::Disposed || self.state >= state {
            return false;
        }
        self.state = state;
        true
    }

    /// Record `source` as read during the current execution. Idempotent.
    pub fn add_source(&mut self, source: NodeId) -> bool {
        self.sources.insert(source)
    }

    /// Get the nodes read during the last execution, in read order.
    pub fn sources(&self) -> &IndexSet<NodeId> {
        &self.sources
    }

    /// Get the observers of this node.
    pub fn observers(&self) -> &IndexSet<NodeId> {
        &self.observers
    }

    /// Get the current version.
    pub fn version(&self) -> u64 {
        self.version
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("version", &self.version)
            .field("sources", &self.sources)
            .field("observers", &self.observers)
            .field("owner", &self.owner)
            .field("owned", &self.owned)
            .finish_non_exhaustive()
    }
}
