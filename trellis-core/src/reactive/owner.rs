//! Ownership Tree
//!
//! Every computation and scope has exactly one owner. Disposing an owner
//! tears down everything created under it: child owners and computations
//! first (most recent first), then its own cleanups in reverse registration
//! order. Disposal is idempotent.
//!
//! Roots ([`create_root`]) start a new tree. A root remembers the owner that
//! was current when it was created, so context and error boundaries are
//! still found through it, but it is not disposed with that owner.

use std::rc::Rc;

use crate::error::{ReactiveError, Result};
use crate::graph::NodeId;

use super::runtime::Runtime;
use super::tracking::{ObserverScope, OwnerScope};

/// Handle to a node of the ownership tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Owner {
    id: NodeId,
}

impl Owner {
    /// Create an owner under the current one, or a detached root when
    /// there is no current owner or it is already disposed.
    pub fn new() -> Self {
        Runtime::with(|runtime| {
            let id = match runtime.live_owner() {
                Ok(Some(parent)) => runtime.create_owner(Some(parent)),
                _ => runtime.create_root_node(None),
            };
            Self { id }
        })
    }

    /// The owner new nodes currently attach to.
    pub fn current() -> Option<Self> {
        Runtime::with(|runtime| runtime.owner.get()).map(|id| Self { id })
    }

    /// Create a child of this owner.
    pub fn child(&self) -> Result<Self> {
        Runtime::with(|runtime| {
            if !runtime.is_alive(self.id) {
                return Err(ReactiveError::DisposedAccess { node: self.id });
            }
            Ok(Self {
                id: runtime.create_owner(Some(self.id)),
            })
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Run `f` with this owner as the current owner.
    ///
    /// Reads inside `f` are not tracked by any surrounding computation.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        Runtime::with(|runtime| runtime.run_with_owner(Some(self.id), f))
    }

    /// Dispose this owner and everything below it.
    pub fn dispose(&self) -> Result<()> {
        Runtime::with(|runtime| runtime.dispose(self.id))
    }

    pub fn is_disposed(&self) -> bool {
        !Runtime::with(|runtime| runtime.contains(self.id))
    }
}

impl Default for Owner {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a new ownership root and run `f` under it.
///
/// `f` receives the root, whose [`Owner::dispose`] tears down everything
/// created inside. Reads in `f` are untracked.
///
/// ```rust,ignore
/// let (root, _) = create_root(|_| {
///     create_effect(move || log(count.get()))
/// });
/// root.dispose()?;
/// ```
pub fn create_root<R>(f: impl FnOnce(Owner) -> R) -> (Owner, R) {
    Runtime::with(|runtime| {
        let id = runtime.create_root_node(runtime.owner.get());
        let root = Owner { id };

        let _owner = OwnerScope::enter(runtime, Some(id));
        let _untracked = ObserverScope::untracked(runtime);
        (root, f(root))
    })
}

/// Run `f` with `owner` as the current owner (or none).
///
/// Fails with `DisposedAccess` if `owner` was disposed.
pub fn run_with_owner<R>(owner: Option<Owner>, f: impl FnOnce() -> R) -> Result<R> {
    Runtime::with(|runtime| runtime.run_with_owner(owner.map(|owner| owner.id), f))
}

/// The current owner, if any.
pub fn get_owner() -> Option<Owner> {
    Owner::current()
}

/// Register `f` to run when the current owner is disposed or, for a
/// computation, before its next run.
///
/// Outside any owner the callback can never run and is dropped. Under an
/// owner that is already disposed it runs immediately.
pub fn on_cleanup(f: impl FnOnce() + 'static) {
    let rejected = Runtime::with(|runtime| runtime.add_cleanup(Box::new(f)));
    if rejected.is_some() {
        tracing::warn!("on_cleanup called outside any owner; the callback will never run");
    }
}

/// Run `f` inside an error boundary.
///
/// Failures of computations created (directly or transitively) inside `f`
/// are passed to `handler` instead of failing the flush. Graph faults
/// (cycles, disposed access) are never delivered to a boundary.
///
/// Fails with `DisposedAccess` when the current owner is disposed.
pub fn catch_error<R>(
    f: impl FnOnce() -> R,
    handler: impl Fn(ReactiveError) + 'static,
) -> Result<R> {
    let boundary = match Owner::current() {
        Some(parent) => parent.child()?,
        None => Owner::new(),
    };
    Runtime::with(|runtime| runtime.set_error_handler(boundary.id, Rc::new(handler)))?;
    boundary.run(f)
}
