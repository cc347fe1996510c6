//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect is scheduled and runs to establish its
//!    initial dependencies (immediately, unless a batch is open).
//!
//! 2. When any dependency changes, the effect is marked and queued.
//!
//! 3. Before re-running, the effect clears its old dependencies, disposes
//!    whatever it created on its previous run, and runs its cleanups. New
//!    dependencies are tracked during execution.
//!
//! # Kinds
//!
//! - [`create_effect`]: a deferred effect. It runs only once every memo,
//!   computed and render effect is up to date, so it never observes a
//!   partially updated graph.
//! - [`create_render_effect`]: runs immediately on creation and, on updates,
//!   before deferred effects.
//! - [`create_computed`]: a synchronous computation in the pure phase. Use it
//!   to write other signals from derived state; writes it makes are seen by
//!   every render effect and deferred effect of the same flush.
//!
//! # Differences from Memo
//!
//! - Memos return a value; effects do not.
//! - Memos are lazy (compute on first access); effects are eager.
//! - Memos cache results; effects just run their side effect.
//!
//! # Cleanup
//!
//! Call [`on_cleanup`](super::on_cleanup) inside the effect to register a
//! callback that runs before the next run and when the effect is disposed.
//! This is useful for cleaning up resources like listeners or timers.
//!
//! # Errors
//!
//! An effect body may return `()` or `Result<(), E>`. An `Err` (or a panic)
//! is delivered to the nearest error boundary; without one it fails the
//! flush that ran the effect.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{BoxError, Result};
use crate::graph::{ComputeFn, NodeId, NodeKind, NodeState, Output};

use super::runtime::Runtime;

/// Return type of effect bodies.
pub trait EffectOutput {
    /// Convert into the runtime's error representation.
    fn into_result(self) -> std::result::Result<(), BoxError>;
}

impl EffectOutput for () {
    fn into_result(self) -> std::result::Result<(), BoxError> {
        Ok(())
    }
}

impl<E: Into<BoxError>> EffectOutput for std::result::Result<(), E> {
    fn into_result(self) -> std::result::Result<(), BoxError> {
        self.map_err(Into::into)
    }
}

/// Handle to a side-effecting computation.
///
/// The handle is `Copy`; dropping it does not stop the effect. The effect
/// stops when its owner is disposed or [`Effect::dispose`] is called.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
///
/// let reader = count.clone();
/// let effect = create_effect(move || {
///     println!("Count is: {}", reader.get());
/// })?;
///
/// count.set(5)?;  // Prints: "Count is: 5"
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Effect {
    id: NodeId,
}

impl Effect {
    fn build<R, F>(kind: NodeKind, run: F) -> Result<Self>
    where
        R: EffectOutput,
        F: FnMut() -> R + 'static,
    {
        let run = RefCell::new(run);
        let compute: ComputeFn = Rc::new(move |_| {
            let mut run = run
                .try_borrow_mut()
                .map_err(|_| BoxError::from("effect re-entered while running"))?;
            (&mut *run)().into_result()?;
            Ok(Output::Unit)
        });

        Runtime::with(|runtime| {
            let id = runtime.create_computation(kind, compute)?;
            if kind == NodeKind::Effect {
                runtime.graph_mut().schedule(id);
                runtime.run_updates(|| Ok(()))?;
            } else {
                runtime.run_updates(|| runtime.update_if_necessary(id))?;
            }
            Ok(Self { id })
        })
    }

    /// Get the effect's node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Dispose of the effect.
    ///
    /// After disposal, the effect will not run again. Its cleanups run now.
    pub fn dispose(&self) -> Result<()> {
        Runtime::with(|runtime| runtime.dispose(self.id))
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        !Runtime::with(|runtime| runtime.contains(self.id))
    }

    pub fn state(&self) -> NodeState {
        Runtime::with(|runtime| runtime.state_of(self.id)).unwrap_or(NodeState::Disposed)
    }

    /// Get the number of times the effect has run to completion.
    pub fn run_count(&self) -> u64 {
        Runtime::with(|runtime| runtime.runs_of(self.id)).unwrap_or(0)
    }

    /// Get the number of dependencies recorded by the last run.
    pub fn dependency_count(&self) -> usize {
        Runtime::with(|runtime| {
            runtime
                .graph()
                .get_node(self.id)
                .map_or(0, |node| node.sources().len())
        })
    }
}

/// Create a deferred effect.
pub fn create_effect<R, F>(run: F) -> Result<Effect>
where
    R: EffectOutput,
    F: FnMut() -> R + 'static,
{
    Effect::build(NodeKind::Effect, run)
}

/// Create a render effect.
pub fn create_render_effect<R, F>(run: F) -> Result<Effect>
where
    R: EffectOutput,
    F: FnMut() -> R + 'static,
{
    Effect::build(NodeKind::RenderEffect, run)
}

/// Create a computed: a synchronous computation that may write signals.
pub fn create_computed<R, F>(run: F) -> Result<Effect>
where
    R: EffectOutput,
    F: FnMut() -> R + 'static,
{
    Effect::build(NodeKind::Computed, run)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    use crate::reactive::batch::batch;
    use crate::reactive::owner::{create_root, on_cleanup};
    use crate::reactive::signal::Signal;
    use crate::ReactiveError;

    #[test]
    fn effect_runs_on_creation() {
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let effect = create_effect(move || {
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        // Effect should have run once on creation
        assert_eq!(run_count.load(Ordering::SeqCst), 1);
        assert_eq!(effect.run_count(), 1);
        assert_eq!(effect.state(), NodeState::Clean);
    }

    #[test]
    fn effect_created_in_batch_waits_for_it() {
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        batch(|| {
            create_effect(move || {
                run_count_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
            assert_eq!(run_count.load(Ordering::SeqCst), 0);
        })
        .unwrap();

        assert_eq!(run_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn effect_reruns_when_dependency_changes() {
        let signal = Signal::new(1);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let (reader, log) = (signal.clone(), seen.clone());
        let effect = create_effect(move || log.borrow_mut().push(reader.get())).unwrap();

        signal.set(2).unwrap();
        signal.set(2).unwrap();
        signal.set(3).unwrap();

        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
        assert_eq!(effect.run_count(), 3);
        assert_eq!(effect.dependency_count(), 1);
    }

    #[test]
    fn effect_does_not_run_after_disposal() {
        let signal = Signal::new(0);
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let reader = signal.clone();
        let effect = create_effect(move || {
            reader.get();
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        // Ran once on creation
        assert_eq!(run_count.load(Ordering::SeqCst), 1);

        effect.dispose().unwrap();
        assert!(effect.is_disposed());
        assert_eq!(signal.observer_count(), 0);

        signal.set(1).unwrap();
        assert_eq!(run_count.load(Ordering::SeqCst), 1);

        // Disposing twice is a no-op.
        effect.dispose().unwrap();
    }

    #[test]
    fn cleanup_runs_before_each_rerun() {
        let signal = Signal::new(0);
        let events = Rc::new(RefCell::new(Vec::new()));

        let (reader, log) = (signal.clone(), events.clone());
        let effect = create_effect(move || {
            let value = reader.get();
            log.borrow_mut().push(format!("run {value}"));
            let log = log.clone();
            on_cleanup(move || log.borrow_mut().push(format!("cleanup {value}")));
        })
        .unwrap();

        signal.set(1).unwrap();
        effect.dispose().unwrap();

        assert_eq!(
            *events.borrow(),
            vec!["run 0", "cleanup 0", "run 1", "cleanup 1"]
        );
    }

    #[test]
    fn render_effects_run_before_deferred_effects() {
        let signal = Signal::new(0);
        let order = Rc::new(RefCell::new(Vec::new()));

        let (reader, log) = (signal.clone(), order.clone());
        create_effect(move || {
            reader.get();
            log.borrow_mut().push("effect");
        })
        .unwrap();

        let (reader, log) = (signal.clone(), order.clone());
        create_render_effect(move || {
            reader.get();
            log.borrow_mut().push("render");
        })
        .unwrap();

        order.borrow_mut().clear();
        signal.set(1).unwrap();
        assert_eq!(*order.borrow(), vec!["render", "effect"]);
    }

    #[test]
    fn computed_writes_are_visible_to_effects_in_the_same_flush() {
        let celsius = Signal::new(0.0_f64);
        let fahrenheit = Signal::new(32.0_f64);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let (input, output) = (celsius.clone(), fahrenheit.clone());
        create_computed(move || output.set(input.get() * 9.0 / 5.0 + 32.0)).unwrap();

        let (c, f, log) = (celsius.clone(), fahrenheit.clone(), seen.clone());
        create_effect(move || log.borrow_mut().push((c.get(), f.get()))).unwrap();

        celsius.set(100.0).unwrap();
        assert_eq!(*seen.borrow(), vec![(0.0, 32.0), (100.0, 212.0)]);
    }

    #[test]
    fn nested_effects_are_disposed_on_rerun() {
        let outer_signal = Signal::new(0);
        let inner_signal = Signal::new(0);
        let inner_runs = Arc::new(AtomicI32::new(0));

        let (outer, inner, runs) = (outer_signal.clone(), inner_signal.clone(), inner_runs.clone());
        let (_, _parent) = create_root(|_| {
            create_effect(move || {
                outer.get();
                let (inner, runs) = (inner.clone(), runs.clone());
                create_effect(move || {
                    inner.get();
                    runs.fetch_add(1, Ordering::SeqCst);
                })
                .map(|_| ())
            })
        });

        assert_eq!(inner_runs.load(Ordering::SeqCst), 1);
        outer_signal.set(1).unwrap();
        assert_eq!(inner_runs.load(Ordering::SeqCst), 2);

        // Only the inner effect from the latest outer run is alive.
        inner_signal.set(1).unwrap();
        assert_eq!(inner_runs.load(Ordering::SeqCst), 3);
        assert_eq!(inner_signal.observer_count(), 1);
    }

    #[test]
    fn failing_effect_without_boundary_fails_the_write() {
        let signal = Signal::new(0);
        let reader = signal.clone();
        create_effect(move || {
            if reader.get() > 0 {
                Err("too big")
            } else {
                Ok(())
            }
        })
        .unwrap();

        let err = signal.set(1).unwrap_err();
        assert!(matches!(err, ReactiveError::Computation { .. }));
        assert!(err.to_string().contains("too big"));

        // The failing effect recovers on the next change that reaches it.
        signal.set(0).unwrap();
    }
}
