//! Error types for the reactive runtime.

use thiserror::Error;

use crate::graph::NodeId;
use crate::reactive::ContextId;

/// Boxed error produced by a failing computation closure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the reactive runtime.
#[derive(Error, Debug)]
pub enum ReactiveError {
    /// A computation wrote a signal it (transitively) read in the same
    /// synchronous execution, or a memo was read while it was computing.
    #[error("cyclic dependency: computation {node:?} reaches {source_node:?} while it is being updated")]
    CyclicDependency {
        /// The computation that is currently executing.
        node: NodeId,
        /// The signal or memo closing the cycle.
        source_node: NodeId,
    },

    /// Context lookup found no provider and the context has no default.
    #[error("context {context} ({type_name}) not provided by any owner and has no default")]
    ContextNotFound {
        /// The context key.
        context: ContextId,
        /// Type name of the context value, for diagnostics.
        type_name: &'static str,
    },

    /// An operation targeted an owner or computation that was disposed.
    #[error("node {node:?} has been disposed")]
    DisposedAccess {
        /// The stale handle.
        node: NodeId,
    },

    /// The closure of a memo or effect failed.
    #[error("computation {node:?} failed: {source}")]
    Computation {
        /// The failing computation.
        node: NodeId,
        /// What the closure returned or the panic message.
        #[source]
        source: BoxError,
    },

    /// An owner-scoped operation ran with no current owner.
    #[error("no reactive owner is active")]
    NoOwner,

    /// A flush kept producing work past the configured pass limit.
    #[error("flush did not settle after {passes} passes")]
    FlushLimit {
        /// Number of passes executed before giving up.
        passes: usize,
    },
}

impl ReactiveError {
    /// Errors that indicate a broken graph rather than a failing closure.
    ///
    /// These are never delivered to error boundaries.
    pub fn is_graph_fault(&self) -> bool {
        matches!(
            self,
            ReactiveError::CyclicDependency { .. }
                | ReactiveError::DisposedAccess { .. }
                | ReactiveError::FlushLimit { .. }
        )
    }

    /// Wrap a closure failure, unwrapping runtime errors that were
    /// propagated through the closure with `?`.
    pub(crate) fn from_closure(node: NodeId, source: BoxError) -> Self {
        match source.downcast::<ReactiveError>() {
            Ok(inner) if inner.is_graph_fault() => *inner,
            Ok(inner) => ReactiveError::Computation {
                node,
                source: inner,
            },
            Err(source) => ReactiveError::Computation { node, source },
        }
    }
}

/// Result type for runtime operations.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;
