//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, memos,
//! effects and owners. It holds the dependency graph and runs updates when
//! signals change.
//!
//! # How It Works
//!
//! 1. Reading a signal or memo inside a running computation records an
//!    edge from the source to the computation.
//!
//! 2. Writing a signal marks its observers (see
//!    [`UpdateScheduler::mark_changed`]) and, unless a batch or flush is
//!    already open, flushes immediately.
//!
//! 3. A flush drains the scheduler lanes in passes: memos and computeds,
//!    then render effects, repeated until nothing synchronous is left, then
//!    deferred effects. Each queued node is brought up to date with
//!    [`Runtime::update_if_necessary`], which resolves memo sources before
//!    the node itself.
//!
//! 4. Writes made while a flush is running only mark and enqueue. Pure and
//!    render work they create is drained before deferred effects run;
//!    deferred effects they dirty run in the next pass.
//!
//! # Threading
//!
//! There is one runtime per thread, stored in a thread-local. Nothing here
//! is shared across threads; reentrancy is handled by the state machine and
//! by never holding a borrow of the graph while user code runs.

use std::any::Any;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use smallvec::SmallVec;

use crate::config::RuntimeConfig;
use crate::error::{BoxError, ReactiveError, Result};
use crate::graph::{
    Cleanup, ComputeFn, ErrorHandler, Lane, Node, NodeId, NodeKind, NodeState, Output,
    UpdateScheduler,
};

use super::context::ContextId;
use super::tracking::{ObserverScope, OwnerScope, ReactiveContext};

thread_local! {
    static RUNTIME: Runtime = Runtime::new();
}

/// The per-thread reactive runtime.
pub(crate) struct Runtime {
    /// All nodes plus the pending lanes.
    graph: RefCell<UpdateScheduler>,

    /// Computation recording dependencies, if any.
    pub(crate) observer: Cell<Option<NodeId>>,

    /// Owner that new nodes attach to.
    pub(crate) owner: Cell<Option<NodeId>>,

    /// Computations currently executing, innermost last.
    pub(crate) running: RefCell<Vec<NodeId>>,

    /// Open `batch` calls.
    batch_depth: Cell<usize>,

    /// Whether a flush is in progress.
    flushing: Cell<bool>,

    /// Signals dropped while the graph was borrowed.
    released: RefCell<Vec<NodeId>>,

    config: RefCell<RuntimeConfig>,
}

impl Runtime {
    fn new() -> Self {
        Self {
            graph: RefCell::new(UpdateScheduler::new()),
            observer: Cell::new(None),
            owner: Cell::new(None),
            running: RefCell::new(Vec::new()),
            batch_depth: Cell::new(0),
            flushing: Cell::new(false),
            released: RefCell::new(Vec::new()),
            config: RefCell::new(RuntimeConfig::default()),
        }
    }

    /// Run `f` with this thread's runtime.
    pub(crate) fn with<R>(f: impl FnOnce(&Runtime) -> R) -> R {
        RUNTIME.with(f)
    }

    /// Like [`Runtime::with`], but returns `None` during thread teardown.
    pub(crate) fn try_with<R>(f: impl FnOnce(&Runtime) -> R) -> Option<R> {
        RUNTIME.try_with(f).ok()
    }

    pub(crate) fn graph(&self) -> Ref<'_, UpdateScheduler> {
        self.graph.borrow()
    }

    pub(crate) fn graph_mut(&self) -> RefMut<'_, UpdateScheduler> {
        self.graph.borrow_mut()
    }

    pub(crate) fn config(&self) -> RuntimeConfig {
        self.config.borrow().clone()
    }

    pub(crate) fn set_config(&self, config: RuntimeConfig) {
        *self.config.borrow_mut() = config;
    }

    /// Whether writes are currently deferred.
    pub(crate) fn is_batching(&self) -> bool {
        self.batch_depth.get() > 0 || self.flushing.get()
    }

    // ------------------------------------------------------------------
    // Node creation and lookup
    // ------------------------------------------------------------------

    pub(crate) fn create_signal_node(&self) -> NodeId {
        self.graph_mut().add_node(Node::signal())
    }

    /// Create a computation under the current owner.
    ///
    /// Fails with `DisposedAccess` when the current owner is gone.
    pub(crate) fn create_computation(&self, kind: NodeKind, compute: ComputeFn) -> Result<NodeId> {
        let owner = self.live_owner()?;
        let id = self
            .graph_mut()
            .add_node(Node::computation(kind, compute, owner));
        if owner.is_none() {
            tracing::debug!(?id, ?kind, "computation created outside any owner; it is never disposed");
        }
        Ok(id)
    }

    /// The current owner, checked to still be alive.
    pub(crate) fn live_owner(&self) -> Result<Option<NodeId>> {
        match self.owner.get() {
            Some(id) if !self.is_alive(id) => Err(ReactiveError::DisposedAccess { node: id }),
            owner => Ok(owner),
        }
    }

    /// Whether `id` is in the arena and not being disposed.
    pub(crate) fn is_alive(&self, id: NodeId) -> bool {
        matches!(self.state_of(id), Some(state) if state != NodeState::Disposed)
    }

    pub(crate) fn create_owner(&self, parent: Option<NodeId>) -> NodeId {
        self.graph_mut().add_node(Node::owner(parent))
    }

    /// Create a root: it sees `parent`'s context and error boundaries but
    /// is not disposed with it.
    pub(crate) fn create_root_node(&self, parent: Option<NodeId>) -> NodeId {
        let id = self.graph_mut().add_detached(Node::owner(parent));
        tracing::debug!(?id, "root created");
        id
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.graph().contains(id)
    }

    pub(crate) fn state_of(&self, id: NodeId) -> Option<NodeState> {
        self.graph().get_node(id).map(Node::state)
    }

    pub(crate) fn version_of(&self, id: NodeId) -> Option<u64> {
        self.graph().get_node(id).map(Node::version)
    }

    pub(crate) fn runs_of(&self, id: NodeId) -> Option<u64> {
        self.graph().get_node(id).map(|node| node.runs)
    }

    pub(crate) fn observer_count(&self, id: NodeId) -> usize {
        self.graph()
            .get_node(id)
            .map_or(0, |node| node.observers().len())
    }

    /// Remove a signal whose last handle was dropped.
    pub(crate) fn release(&self, id: NodeId) {
        let removed = match self.graph.try_borrow_mut() {
            Ok(mut graph) => graph.remove_node(id),
            Err(_) => {
                self.released.borrow_mut().push(id);
                None
            }
        };
        drop(removed);
    }

    fn sweep_released(&self) {
        loop {
            let pending = std::mem::take(&mut *self.released.borrow_mut());
            if pending.is_empty() {
                return;
            }
            let removed: Vec<Node> = match self.graph.try_borrow_mut() {
                Ok(mut graph) => pending
                    .into_iter()
                    .filter_map(|id| graph.remove_node(id))
                    .collect(),
                Err(_) => {
                    self.released.borrow_mut().extend(pending);
                    return;
                }
            };
            drop(removed);
        }
    }

    // ------------------------------------------------------------------
    // Reads and writes
    // ------------------------------------------------------------------

    /// Record that the current observer read `source`.
    pub(crate) fn track(&self, source: NodeId) {
        if let Some(observer) = self.observer.get() {
            self.graph_mut().add_edge(source, observer);
        }
    }

    /// Fail if writing `target` would invalidate a computation that is
    /// still executing.
    pub(crate) fn check_write(&self, target: NodeId) -> Result<()> {
        let running = self.running.borrow();
        if running.is_empty() {
            return Ok(());
        }
        let graph = self.graph();
        for node in running.iter().rev() {
            if graph.depends_on(*node, target) {
                return Err(ReactiveError::CyclicDependency {
                    node: *node,
                    source_node: target,
                });
            }
        }
        Ok(())
    }

    /// A signal's value changed: bump its version, mark downstream, and
    /// flush unless writes are deferred.
    pub(crate) fn notify_changed(&self, id: NodeId) -> Result<()> {
        {
            let mut graph = self.graph_mut();
            let Some(node) = graph.get_node_mut(id) else {
                return Err(ReactiveError::DisposedAccess { node: id });
            };
            node.version += 1;
            let marked = graph.mark_changed(id);
            tracing::trace!(?id, marked, "signal changed");
        }
        self.run_updates(|| Ok(()))
    }

    /// Bring a memo up to date and return its value.
    pub(crate) fn read_memo(&self, id: NodeId, track: bool) -> Result<Rc<dyn Any>> {
        let state = self
            .state_of(id)
            .ok_or(ReactiveError::DisposedAccess { node: id })?;

        if self.running.borrow().contains(&id) {
            let node = self.running.borrow().last().copied().unwrap_or(id);
            return Err(ReactiveError::CyclicDependency {
                node,
                source_node: id,
            });
        }

        if state != NodeState::Clean {
            self.run_updates(|| self.update_if_necessary(id))?;
        }

        if track {
            self.track(id);
        }

        let value = self
            .graph()
            .get_node(id)
            .ok_or(ReactiveError::DisposedAccess { node: id })?
            .value
            .clone();
        value.ok_or_else(|| ReactiveError::Computation {
            node: id,
            source: "memo has no value because its last run failed".into(),
        })
    }

    // ------------------------------------------------------------------
    // Batching and flushing
    // ------------------------------------------------------------------

    /// Run `f` with writes deferred; flush afterwards if this was the
    /// outermost batch and no flush is running.
    pub(crate) fn run_updates<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        let result = {
            let _batch = BatchGuard::enter(self);
            f()
        };

        let flushed = if self.is_batching() {
            Ok(())
        } else {
            self.flush()
        };

        let value = result?;
        flushed.map(|_| value)
    }

    /// Drain every lane until the graph is settled.
    pub(crate) fn flush(&self) -> Result<()> {
        if self.flushing.get() {
            return Ok(());
        }
        let _span = tracing::trace_span!("flush").entered();
        let _flushing = FlushGuard::enter(self);

        let max_passes = self.config.borrow().max_flush_passes;
        let mut passes = 0;

        loop {
            while self.graph().has_sync_work() {
                passes += 1;
                if passes > max_passes {
                    return Err(self.flush_limit(max_passes));
                }
                self.drain(Lane::Pure)?;
                self.drain(Lane::Render)?;
            }

            if self.graph().is_idle() {
                break;
            }

            passes += 1;
            if passes > max_passes {
                return Err(self.flush_limit(max_passes));
            }
            self.drain(Lane::User)?;
        }

        tracing::trace!(passes, "flush settled");
        Ok(())
    }

    fn flush_limit(&self, passes: usize) -> ReactiveError {
        let abandoned = self.graph_mut().abandon_queued();
        tracing::warn!(passes, abandoned, "flush did not settle, abandoning queued work");
        ReactiveError::FlushLimit { passes }
    }

    fn drain(&self, lane: Lane) -> Result<()> {
        let queued = self.graph_mut().take_lane(lane);

        for (index, id) in queued.iter().enumerate() {
            if let Err(err) = self.update_if_necessary(*id) {
                // The failing node waits for the next change that reaches
                // it; everything else stays queued for the next flush.
                let remaining: Vec<NodeId> = {
                    let graph = self.graph();
                    queued[index..]
                        .iter()
                        .copied()
                        .filter(|id| graph.get_node(*id).is_some_and(|node| !node.errored))
                        .collect()
                };
                self.graph_mut().requeue_front(lane, remaining);
                return Err(err);
            }
        }

        Ok(())
    }

    /// Bring `id` up to date.
    ///
    /// `Check` nodes first update their memo sources in read order and stop
    /// as soon as one of them changed (which raises this node to `Dirty`).
    /// A `Check` node whose sources all kept their values becomes `Clean`
    /// without running.
    pub(crate) fn update_if_necessary(&self, id: NodeId) -> Result<()> {
        let (state, sources): (NodeState, SmallVec<[NodeId; 4]>) = {
            let graph = self.graph();
            let Some(node) = graph.get_node(id) else {
                return Ok(());
            };
            let sources = if node.state == NodeState::Check {
                node.sources.iter().copied().collect()
            } else {
                SmallVec::new()
            };
            (node.state, sources)
        };

        if matches!(state, NodeState::Clean | NodeState::Disposed) {
            return Ok(());
        }

        if state == NodeState::Check {
            for source in sources {
                let is_memo = self
                    .graph()
                    .get_node(source)
                    .is_some_and(|node| node.kind == NodeKind::Memo);
                if is_memo {
                    if self.running.borrow().contains(&source) {
                        return Err(ReactiveError::CyclicDependency {
                            node: id,
                            source_node: source,
                        });
                    }
                    self.update_if_necessary(source)?;
                }
                if self.state_of(id) != Some(NodeState::Check) {
                    break;
                }
            }
        }

        match self.state_of(id) {
            Some(NodeState::Dirty) => self.execute(id),
            Some(NodeState::Check) => {
                if let Some(node) = self.graph_mut().get_node_mut(id) {
                    node.state = NodeState::Clean;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Re-run a computation: tear down what its previous run created, run
    /// the closure with fresh tracking, store the result.
    fn execute(&self, id: NodeId) -> Result<()> {
        self.clean_node(id);

        let (compute, previous) = {
            let mut graph = self.graph_mut();
            let Some(node) = graph.get_node_mut(id) else {
                return Ok(());
            };
            if node.state == NodeState::Disposed {
                return Ok(());
            }
            // Clean before running so a mark raised during the run sticks.
            node.state = NodeState::Clean;
            (node.compute.clone(), node.value.clone())
        };
        let Some(compute) = compute else {
            return Ok(());
        };

        tracing::trace!(?id, "running computation");
        let outcome = {
            let _ctx = ReactiveContext::enter(self, id);
            self.invoke(id, &compute, previous.as_deref())
        };
        drop(previous);

        match outcome {
            Ok(output) => {
                self.commit(id, output);
                Ok(())
            }
            Err(err) => self.handle_error(id, err),
        }
    }

    fn invoke(
        &self,
        id: NodeId,
        compute: &ComputeFn,
        previous: Option<&dyn Any>,
    ) -> Result<Output> {
        let catch_panics = self.config.borrow().catch_panics;
        let result = if catch_panics {
            panic::catch_unwind(AssertUnwindSafe(|| compute(previous))).unwrap_or_else(
                |payload| match payload.downcast::<ReactiveError>() {
                    Ok(err) => Err(err as BoxError),
                    Err(payload) => Err(panic_message(payload.as_ref())),
                },
            )
        } else {
            compute(previous)
        };
        result.map_err(|source| ReactiveError::from_closure(id, source))
    }

    fn commit(&self, id: NodeId, output: Output) {
        let replaced = {
            let mut graph = self.graph_mut();
            let Some(node) = graph.get_node_mut(id) else {
                return;
            };
            node.runs += 1;
            node.errored = false;

            match output {
                Output::Value { value, changed: true } => {
                    node.version += 1;
                    let replaced = node.value.replace(value);
                    graph.mark_changed(id);
                    replaced
                }
                // Equal values keep the old one, and observers stay
                // `Check` so they can settle without running.
                Output::Value { value, changed: false } => Some(value),
                Output::Unit => None,
            }
        };
        drop(replaced);
    }

    /// Record a failed run of `id` and route the error.
    ///
    /// An unhandled failure leaves the node `Dirty` until the next change
    /// reaches it. A failure taken by a boundary settles the node: it keeps
    /// its previous value and does not run again until a source changes.
    fn handle_error(&self, id: NodeId, err: ReactiveError) -> Result<()> {
        let handler = if err.is_graph_fault() {
            None
        } else {
            self.find_error_handler(id)
        };

        if let Some(node) = self.graph_mut().get_node_mut(id) {
            if node.state != NodeState::Disposed {
                node.errored = true;
                if handler.is_none() {
                    node.state = NodeState::Dirty;
                }
            }
        }

        let Some(handler) = handler else {
            return Err(err);
        };

        tracing::warn!(?id, error = %err, "computation failed, handled by error boundary");
        let _untracked = ObserverScope::untracked(self);
        handler(err);
        Ok(())
    }

    fn find_error_handler(&self, id: NodeId) -> Option<ErrorHandler> {
        let graph = self.graph();
        let mut current = graph.get_node(id).and_then(|node| node.owner);
        while let Some(owner_id) = current {
            let node = graph.get_node(owner_id)?;
            if let Some(handler) = &node.error_handler {
                return Some(Rc::clone(handler));
            }
            current = node.owner;
        }
        None
    }

    // ------------------------------------------------------------------
    // Ownership
    // ------------------------------------------------------------------

    /// Dispose what the previous run of `id` created and run its cleanups.
    fn clean_node(&self, id: NodeId) {
        let (owned, cleanups) = {
            let mut graph = self.graph_mut();
            graph.clear_sources(id);
            let Some(node) = graph.get_node_mut(id) else {
                return;
            };
            (
                std::mem::take(&mut node.owned),
                std::mem::take(&mut node.cleanups),
            )
        };

        for child in owned.into_iter().rev() {
            self.dispose_node(child);
        }
        self.run_cleanups(id, cleanups);
    }

    /// Dispose `id` and everything it owns.
    ///
    /// The node stops observing its sources first. Children go next (most
    /// recent first), then this node's cleanups in reverse registration
    /// order, then the node leaves the arena. Disposing twice is a no-op.
    pub(crate) fn dispose_node(&self, id: NodeId) {
        let (owned, cleanups) = {
            let mut graph = self.graph_mut();
            let Some(node) = graph.get_node_mut(id) else {
                return;
            };
            if node.state == NodeState::Disposed {
                return;
            }
            node.state = NodeState::Disposed;
            let taken = (
                std::mem::take(&mut node.owned),
                std::mem::take(&mut node.cleanups),
            );
            graph.clear_sources(id);
            taken
        };

        for child in owned.into_iter().rev() {
            self.dispose_node(child);
        }
        self.run_cleanups(id, cleanups);

        let removed = self.graph_mut().remove_node(id);
        tracing::debug!(?id, "disposed");
        drop(removed);
    }

    /// Dispose `id` from user code, flushing writes made by cleanups.
    pub(crate) fn dispose(&self, id: NodeId) -> Result<()> {
        self.run_updates(|| {
            self.dispose_node(id);
            Ok(())
        })
    }

    fn run_cleanups(&self, id: NodeId, cleanups: Vec<Cleanup>) {
        if cleanups.is_empty() {
            return;
        }
        let _untracked = ObserverScope::untracked(self);
        for cleanup in cleanups.into_iter().rev() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(cleanup)) {
                tracing::warn!(
                    ?id,
                    error = %panic_message(payload.as_ref()),
                    "cleanup panicked"
                );
            }
        }
    }

    /// Run `f` with `owner` as the current owner and tracking disabled.
    pub(crate) fn run_with_owner<R>(&self, owner: Option<NodeId>, f: impl FnOnce() -> R) -> Result<R> {
        if let Some(id) = owner {
            match self.state_of(id) {
                None | Some(NodeState::Disposed) => {
                    return Err(ReactiveError::DisposedAccess { node: id })
                }
                Some(_) => {}
            }
        }
        let _owner = OwnerScope::enter(self, owner);
        let _untracked = ObserverScope::untracked(self);
        Ok(f())
    }

    /// Register a cleanup with the current owner.
    ///
    /// Returns the callback back when there is no owner to hold it. Under
    /// an owner that is already disposed the callback runs immediately.
    pub(crate) fn add_cleanup(&self, cleanup: Cleanup) -> Option<Cleanup> {
        let Some(owner) = self.owner.get() else {
            return Some(cleanup);
        };
        let late = {
            let mut graph = self.graph_mut();
            match graph.get_node_mut(owner) {
                Some(node) if node.state != NodeState::Disposed => {
                    node.cleanups.push(cleanup);
                    None
                }
                _ => Some(cleanup),
            }
        };
        if let Some(cleanup) = late {
            tracing::debug!(?owner, "owner already disposed, running cleanup now");
            self.run_cleanups(owner, vec![cleanup]);
        }
        None
    }

    pub(crate) fn set_error_handler(&self, owner: NodeId, handler: ErrorHandler) -> Result<()> {
        let mut graph = self.graph_mut();
        let node = graph
            .get_node_mut(owner)
            .ok_or(ReactiveError::DisposedAccess { node: owner })?;
        node.error_handler = Some(handler);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Context
    // ------------------------------------------------------------------

    pub(crate) fn provide_context(&self, owner: NodeId, id: ContextId, value: Rc<dyn Any>) -> Result<()> {
        let replaced = {
            let mut graph = self.graph_mut();
            let node = graph
                .get_node_mut(owner)
                .ok_or(ReactiveError::DisposedAccess { node: owner })?;
            node.contexts.insert(id, value)
        };
        drop(replaced);
        Ok(())
    }

    /// Find the nearest entry for `id`, walking from the current owner up.
    pub(crate) fn lookup_context(&self, id: ContextId) -> Option<Rc<dyn Any>> {
        let graph = self.graph();
        let mut current = self.owner.get();
        while let Some(owner_id) = current {
            let node = graph.get_node(owner_id)?;
            if let Some(value) = node.contexts.get(&id) {
                return Some(Rc::clone(value));
            }
            current = node.owner;
        }
        None
    }
}

struct BatchGuard<'rt> {
    runtime: &'rt Runtime,
}

impl<'rt> BatchGuard<'rt> {
    fn enter(runtime: &'rt Runtime) -> Self {
        runtime.batch_depth.set(runtime.batch_depth.get() + 1);
        Self { runtime }
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.runtime
            .batch_depth
            .set(self.runtime.batch_depth.get().saturating_sub(1));
    }
}

struct FlushGuard<'rt> {
    runtime: &'rt Runtime,
}

impl<'rt> FlushGuard<'rt> {
    fn enter(runtime: &'rt Runtime) -> Self {
        runtime.flushing.set(true);
        Self { runtime }
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.runtime.flushing.set(false);
        self.runtime.sweep_released();
    }
}

/// Abort the caller with `err`.
///
/// Inside a computation that catches panics the error itself is the panic
/// payload, so the runtime recovers it intact (graph faults keep bypassing
/// error boundaries). Anywhere else this is an ordinary panic.
pub(crate) fn throw(err: ReactiveError) -> ! {
    let in_computation = Runtime::try_with(|runtime| {
        !runtime.running.borrow().is_empty() && runtime.config.borrow().catch_panics
    })
    .unwrap_or(false);

    if in_computation {
        panic::panic_any(err)
    }
    panic!("{err}")
}

fn panic_message(payload: &(dyn Any + Send)) -> BoxError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("panicked: {message}").into()
}

/// Install `config` for the runtime of the current thread.
pub fn configure(config: RuntimeConfig) {
    Runtime::with(|runtime| runtime.set_config(config));
}

/// The configuration of the current thread's runtime.
pub fn config() -> RuntimeConfig {
    Runtime::with(Runtime::config)
}

/// Run every pending update now.
///
/// Writes outside a batch already flush on their own; this is only needed
/// to retry work left queued by a failed flush.
pub fn flush() -> Result<()> {
    Runtime::with(|runtime| {
        if runtime.is_batching() {
            return Ok(());
        }
        runtime.flush()
    })
}
