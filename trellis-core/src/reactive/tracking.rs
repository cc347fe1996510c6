//! Reactive Context
//!
//! The reactive context tracks which computation is currently running and
//! which owner new nodes attach to. This enables automatic dependency
//! tracking: when a signal is read, the current computation is registered
//! as an observer.
//!
//! # Implementation
//!
//! The runtime keeps the current observer and owner in thread-local slots
//! plus a stack of running computations. Entering a context swaps the
//! slots and pushes onto the stack; the returned guard restores both when
//! dropped, so the discipline holds even if the computation panics.
//!
//! This design supports nested contexts (e.g., a memo that reads from
//! another memo, or an effect created inside an effect).

use crate::graph::NodeId;

use super::runtime::Runtime;

/// Guard for a running computation.
///
/// While it is alive, reads register the computation as an observer and
/// new nodes are owned by it.
pub(crate) struct ReactiveContext<'rt> {
    runtime: &'rt Runtime,
    node: NodeId,
    prev_observer: Option<NodeId>,
    prev_owner: Option<NodeId>,
}

impl<'rt> ReactiveContext<'rt> {
    /// Enter a new reactive context for the given computation.
    pub(crate) fn enter(runtime: &'rt Runtime, node: NodeId) -> Self {
        let prev_observer = runtime.observer.replace(Some(node));
        let prev_owner = runtime.owner.replace(Some(node));
        runtime.running.borrow_mut().push(node);

        Self {
            runtime,
            node,
            prev_observer,
            prev_owner,
        }
    }
}

impl Drop for ReactiveContext<'_> {
    fn drop(&mut self) {
        let popped = self.runtime.running.borrow_mut().pop();

        // Verify we're popping the right context.
        debug_assert_eq!(
            popped,
            Some(self.node),
            "ReactiveContext mismatch: expected {:?}, got {:?}",
            self.node,
            popped
        );

        self.runtime.observer.set(self.prev_observer);
        self.runtime.owner.set(self.prev_owner);
    }
}

/// Guard that replaces the current observer.
pub(crate) struct ObserverScope<'rt> {
    runtime: &'rt Runtime,
    prev: Option<NodeId>,
}

impl<'rt> ObserverScope<'rt> {
    /// Stop tracking until the guard drops.
    pub(crate) fn untracked(runtime: &'rt Runtime) -> Self {
        let prev = runtime.observer.replace(None);
        Self { runtime, prev }
    }
}

impl Drop for ObserverScope<'_> {
    fn drop(&mut self) {
        self.runtime.observer.set(self.prev);
    }
}

/// Guard that replaces the current owner.
pub(crate) struct OwnerScope<'rt> {
    runtime: &'rt Runtime,
    prev: Option<NodeId>,
}

impl<'rt> OwnerScope<'rt> {
    /// Make `owner` current until the guard drops.
    pub(crate) fn enter(runtime: &'rt Runtime, owner: Option<NodeId>) -> Self {
        let prev = runtime.owner.replace(owner);
        Self { runtime, prev }
    }
}

impl Drop for OwnerScope<'_> {
    fn drop(&mut self) {
        self.runtime.owner.set(self.prev);
    }
}

/// Run `f` without recording dependencies.
///
/// Signals and memos read inside `f` do not become sources of the
/// surrounding computation.
///
/// ```rust,ignore
/// create_effect(move || {
///     let a = a.get();                 // tracked
///     let b = untrack(|| b.get());     // not tracked
///     log(a + b);
/// });
/// ```
pub fn untrack<T>(f: impl FnOnce() -> T) -> T {
    Runtime::with(|runtime| {
        let _scope = ObserverScope::untracked(runtime);
        f()
    })
}

/// Build a closure with explicit dependencies.
///
/// `deps` is tracked; `f` receives its result and runs untracked. Useful
/// for effects that should only react to some of the values they read.
pub fn on<D, R>(deps: impl Fn() -> D, mut f: impl FnMut(D) -> R) -> impl FnMut() -> R {
    move || {
        let input = deps();
        untrack(|| f(input))
    }
}

/// Check whether reads are currently being tracked.
pub fn is_tracking() -> bool {
    Runtime::with(|runtime| runtime.observer.get().is_some())
}

/// The computation currently recording dependencies, if any.
pub fn current_observer() -> Option<NodeId> {
    Runtime::with(|runtime| runtime.observer.get())
}
