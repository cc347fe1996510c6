//! Memo Implementation
//!
//! A Memo is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Memos Work
//!
//! 1. On first access, the memo runs its computation and caches the result.
//!
//! 2. When accessed again, if no dependencies have changed, returns the
//!    cached value.
//!
//! 3. When a dependency changes, the memo is marked `Dirty` (direct source)
//!    or `Check` (something further upstream).
//!
//! 4. On the next access or flush, a `Check` memo first brings its own memo
//!    sources up to date; it only recomputes if one of them changed.
//!
//! 5. If the recomputed value is equal to the previous one, the memo keeps
//!    its version and its observers settle back to `Clean` without running.
//!
//! # Why This Matters
//!
//! A memo nobody reads never runs. A memo whose inputs changed but whose
//! result did not stops propagation at that point of the graph.
//!
//! # Lifetime
//!
//! [`Memo`] is a `Copy` handle. The memo lives until its owner is disposed
//! (or [`Memo::dispose`] is called); a memo created outside any owner lives
//! as long as the thread. A memo created under an owner that is already
//! disposed starts out disposed: every read fails with `DisposedAccess`.

use std::any::Any;
use std::convert::Infallible;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::error::{BoxError, Result};
use crate::graph::{ComputeFn, NodeId, NodeKind, NodeState, Output};

use super::runtime::{throw, Runtime};

/// A cached derived value that recomputes only when dependencies change.
pub struct Memo<T: 'static> {
    id: NodeId,
    ty: PhantomData<fn() -> T>,
}

impl<T: 'static> Memo<T> {
    fn build<E>(
        compute: impl Fn() -> std::result::Result<T, E> + 'static,
        equals: impl Fn(&T, &T) -> bool + 'static,
    ) -> Self
    where
        E: Into<BoxError>,
    {
        let compute: ComputeFn = Rc::new(move |previous: Option<&dyn Any>| {
            let value = compute().map_err(Into::into)?;
            let changed = match previous.and_then(|prev| prev.downcast_ref::<T>()) {
                Some(prev) => !equals(prev, &value),
                None => true,
            };
            Ok(Output::Value {
                value: Rc::new(value),
                changed,
            })
        });

        let id = Runtime::with(|runtime| runtime.create_computation(NodeKind::Memo, compute))
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "memo created under a disposed owner");
                NodeId::default()
            });
        Self {
            id,
            ty: PhantomData,
        }
    }

    /// Get the memo's node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// This is the main entry point for reading a memo's value. Inside a
    /// running computation the memo becomes one of its sources.
    pub fn try_get(&self) -> Result<T>
    where
        T: Clone,
    {
        self.try_with(T::clone)
    }

    /// Like [`Memo::try_get`], but panics on failure.
    ///
    /// Inside a computation the failure is recovered by the runtime and
    /// reported like an error returned by the computation itself.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.try_get().unwrap_or_else(|err| throw(err))
    }

    /// Get the current value without tracking.
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        self.read(false)
            .map(|value| downcast::<T>(&value).clone())
            .unwrap_or_else(|err| throw(err))
    }

    /// Read the value by reference, tracking the dependency.
    pub fn try_with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        let value = self.read(true)?;
        Ok(f(downcast::<T>(&value)))
    }

    /// Like [`Memo::try_with`], but panics on failure.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.try_with(f).unwrap_or_else(|err| throw(err))
    }

    fn read(&self, track: bool) -> Result<Rc<dyn Any>> {
        Runtime::with(|runtime| runtime.read_memo(self.id, track))
    }

    /// Get the current state. Disposed memos report `Disposed`.
    pub fn state(&self) -> NodeState {
        Runtime::with(|runtime| runtime.state_of(self.id)).unwrap_or(NodeState::Disposed)
    }

    /// Number of times the value changed.
    pub fn version(&self) -> u64 {
        Runtime::with(|runtime| runtime.version_of(self.id)).unwrap_or(0)
    }

    /// Number of computations that read this memo during their last run.
    pub fn observer_count(&self) -> usize {
        Runtime::with(|runtime| runtime.observer_count(self.id))
    }

    /// Check if the memo has a cached value.
    pub fn has_value(&self) -> bool {
        Runtime::with(|runtime| {
            runtime
                .graph()
                .get_node(self.id)
                .is_some_and(|node| node.value.is_some())
        })
    }

    /// Dispose the memo, detaching it from its sources and observers.
    pub fn dispose(&self) -> Result<()> {
        Runtime::with(|runtime| runtime.dispose(self.id))
    }

    pub fn is_disposed(&self) -> bool {
        !Runtime::with(|runtime| runtime.contains(self.id))
    }
}

impl<T: 'static> Clone for Memo<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: 'static> Copy for Memo<T> {}

impl<T: 'static> Debug for Memo<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memo")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("has_value", &self.has_value())
            .field("observer_count", &self.observer_count())
            .finish()
    }
}

fn downcast<T: 'static>(value: &Rc<dyn Any>) -> &T {
    value
        .downcast_ref::<T>()
        .expect("memo value has the memo's type")
}

/// Create a memo. Recomputations producing an equal value do not notify
/// observers.
///
/// The computation is not run immediately. It runs on first access.
pub fn create_memo<T: PartialEq + 'static>(f: impl Fn() -> T + 'static) -> Memo<T> {
    create_memo_with_equality(f, |a: &T, b: &T| a == b)
}

/// Create a memo with a custom equality check.
pub fn create_memo_with_equality<T: 'static>(
    f: impl Fn() -> T + 'static,
    equals: impl Fn(&T, &T) -> bool + 'static,
) -> Memo<T> {
    Memo::build(move || Ok::<T, Infallible>(f()), equals)
}

/// Create a memo whose computation can fail.
///
/// A failed run is reported to the nearest error boundary; the memo keeps
/// its previous value (if any) and retries the next time a source changes.
pub fn create_memo_result<T, E>(f: impl Fn() -> std::result::Result<T, E> + 'static) -> Memo<T>
where
    T: PartialEq + 'static,
    E: Into<BoxError>,
{
    Memo::build(f, |a: &T, b: &T| a == b)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    use crate::reactive::effect::create_effect;
    use crate::reactive::owner::{catch_error, create_root};
    use crate::reactive::signal::Signal;
    use crate::ReactiveError;

    #[test]
    fn memo_computes_on_first_access() {
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        let memo = create_memo(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            42
        });

        // Not computed yet
        assert!(!memo.has_value());
        assert_eq!(memo.state(), NodeState::Dirty);
        assert_eq!(call_count.load(Ordering::SeqCst), 0);

        // First access triggers computation
        assert_eq!(memo.get(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert!(memo.has_value());
        assert_eq!(memo.state(), NodeState::Clean);
    }

    #[test]
    fn memo_caches_value_when_clean() {
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        let memo = create_memo(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            42
        });

        assert_eq!(memo.get(), 42);
        assert_eq!(memo.get(), 42);
        assert_eq!(memo.get_untracked(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn memo_recomputes_when_source_changes() {
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        let counter = Signal::new(0);
        let source = counter.clone();
        let memo = create_memo(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            source.get() * 2
        });

        assert_eq!(memo.get(), 0);
        assert_eq!(counter.observer_count(), 1);

        // Once computed, the memo is refreshed by the flush that follows
        // the write.
        counter.set(5).unwrap();
        assert_eq!(memo.state(), NodeState::Clean);
        assert_eq!(call_count.load(Ordering::SeqCst), 2);

        assert_eq!(memo.get(), 10);
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
        assert_eq!(memo.version(), 2);
    }

    #[test]
    fn equal_results_keep_the_version() {
        let counter = Signal::new(1);
        let source = counter.clone();
        let parity = create_memo(move || source.get() % 2);

        assert_eq!(parity.get(), 1);
        counter.set(3).unwrap();
        assert_eq!(parity.get(), 1);
        assert_eq!(parity.version(), 1);
    }

    #[test]
    fn memo_chain() {
        let base = Signal::new(2);
        let source = base.clone();
        let doubled = create_memo(move || source.get() * 2);
        let quadrupled = create_memo(move || doubled.get() * 2);

        assert_eq!(quadrupled.get(), 8);
        base.set(3).unwrap();
        assert_eq!(quadrupled.get(), 12);
        assert_eq!(doubled.observer_count(), 1);
    }

    #[test]
    fn failing_memo_reports_computation_error() {
        let input = Signal::new(-1);
        let source = input.clone();
        let root = create_memo_result(move || {
            let value = source.get();
            if value < 0 {
                Err(format!("negative input {value}"))
            } else {
                Ok(value)
            }
        });

        let err = root.try_get().unwrap_err();
        assert!(matches!(err, ReactiveError::Computation { node, .. } if node == root.id()));

        input.set(4).unwrap();
        assert_eq!(root.try_get().unwrap(), 4);
    }

    #[test]
    fn handled_failure_runs_once_per_change() {
        let input = Signal::new(0);
        let memo_runs = Arc::new(AtomicI32::new(0));
        let handled = Arc::new(AtomicI32::new(0));

        let (source, runs, calls) = (input.clone(), memo_runs.clone(), handled.clone());
        let (root, (memo, effect)) = create_root(move |_| {
            catch_error(
                move || {
                    let memo = create_memo_result(move || {
                        runs.fetch_add(1, Ordering::SeqCst);
                        match source.get() {
                            value if value > 0 => Err("positive input"),
                            value => Ok(value),
                        }
                    });
                    let effect = create_effect(move || {
                        for _ in 0..3 {
                            let _ = memo.try_get();
                        }
                    })
                    .unwrap();
                    (memo, effect)
                },
                move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                },
            )
            .unwrap()
        });
        assert_eq!(memo_runs.load(Ordering::SeqCst), 1);

        input.set(1).unwrap();
        assert_eq!(memo_runs.load(Ordering::SeqCst), 2);
        assert_eq!(handled.load(Ordering::SeqCst), 1);
        assert_eq!(effect.run_count(), 1);

        // Settled on its previous value until a source changes again.
        assert_eq!(memo.state(), NodeState::Clean);
        assert_eq!(memo.get_untracked(), 0);
        assert_eq!(memo_runs.load(Ordering::SeqCst), 2);

        input.set(0).unwrap();
        assert_eq!(memo_runs.load(Ordering::SeqCst), 3);
        assert_eq!(handled.load(Ordering::SeqCst), 1);

        root.dispose().unwrap();
    }

    #[test]
    fn memo_under_disposed_owner_starts_disposed() {
        let (_, memo) = create_root(|root| {
            root.dispose().unwrap();
            create_memo(|| 1)
        });
        assert!(memo.is_disposed());
        assert!(matches!(
            memo.try_get(),
            Err(ReactiveError::DisposedAccess { .. })
        ));
    }

    #[test]
    fn self_reading_memo_is_cyclic() {
        let slot: Rc<std::cell::Cell<Option<Memo<i32>>>> = Rc::new(std::cell::Cell::new(None));
        let inner = slot.clone();
        let memo = create_memo_result(move || match inner.get() {
            Some(me) => me.try_get().map(|v| v + 1),
            None => Ok(0),
        });
        slot.set(Some(memo));

        let err = memo.try_get().unwrap_err();
        assert!(matches!(err, ReactiveError::CyclicDependency { .. }));
    }

    #[test]
    fn disposed_memo_rejects_reads() {
        let memo = create_memo(|| 1);
        assert_eq!(memo.get(), 1);
        memo.dispose().unwrap();
        assert!(memo.is_disposed());
        assert_eq!(memo.state(), NodeState::Disposed);
        assert!(matches!(
            memo.try_get(),
            Err(ReactiveError::DisposedAccess { .. })
        ));
    }
}
