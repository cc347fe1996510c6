//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a running computation (memo/effect), the
//!    computation is recorded as an observer of the signal.
//!
//! 2. When a signal's value changes, its version is bumped and every
//!    observer is marked.
//!
//! 3. Unless a batch is open, the write flushes before returning, so every
//!    memo and effect reachable from the signal is up to date afterwards.
//!
//! # Memory Layout
//!
//! The value lives in the handle, behind an `Rc<RefCell<T>>`; the graph only
//! stores the node (edges, version). Handles are cheap to clone and the node
//! is released when the last clone is dropped.

use std::cell::{Ref, RefCell};
use std::fmt::Debug;
use std::rc::Rc;

use crate::error::Result;
use crate::graph::NodeId;

use super::runtime::Runtime;

type EqualsFn<T> = Box<dyn Fn(&T, &T) -> bool>;

struct SignalInner<T> {
    id: NodeId,
    value: RefCell<T>,
    /// `None` means every write notifies.
    equals: Option<EqualsFn<T>>,
}

impl<T> Drop for SignalInner<T> {
    fn drop(&mut self) {
        // The runtime may already be gone during thread teardown.
        let _ = Runtime::try_with(|runtime| runtime.release(self.id));
    }
}

/// A reactive signal holding a value of type T.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
///
/// // Read the value
/// let value = count.get();
///
/// // Update the value (notifies observers)
/// count.set(5)?;
/// ```
pub struct Signal<T: 'static> {
    inner: Rc<SignalInner<T>>,
}

impl<T: 'static> Signal<T> {
    /// Create a new signal. Writes of a value equal to the current one are
    /// ignored.
    pub fn new(value: T) -> Self
    where
        T: PartialEq,
    {
        Self::with_equality(value, |a: &T, b: &T| a == b)
    }

    /// Create a new signal that uses `equals` to decide whether a write
    /// changes the value.
    pub fn with_equality(value: T, equals: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self::build(value, Some(Box::new(equals)))
    }

    /// Create a new signal where every write notifies, even if the value
    /// compares equal.
    pub fn always_notify(value: T) -> Self {
        Self::build(value, None)
    }

    fn build(value: T, equals: Option<EqualsFn<T>>) -> Self {
        let id = Runtime::with(Runtime::create_signal_node);
        Self {
            inner: Rc::new(SignalInner {
                id,
                value: RefCell::new(value),
                equals,
            }),
        }
    }

    /// Get the signal's node id.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the current value.
    ///
    /// If called within a running computation, this also records the
    /// computation as an observer.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.track();
        self.inner.value.borrow().clone()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        self.inner.value.borrow().clone()
    }

    /// Read the value by reference, tracking the dependency.
    ///
    /// # Panics
    ///
    /// Panics if `f` writes this same signal.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&self.inner.value.borrow())
    }

    /// Borrow the value without tracking.
    pub fn borrow_untracked(&self) -> Ref<'_, T> {
        self.inner.value.borrow()
    }

    /// Subscribe the current computation without reading the value.
    pub fn track(&self) {
        Runtime::with(|runtime| runtime.track(self.inner.id));
    }

    /// Set a new value and notify observers.
    ///
    /// A value equal to the current one is ignored: no version bump, no
    /// marking. Fails with `CyclicDependency` if a running computation
    /// already read this signal, or with the error of a computation that
    /// failed during the resulting flush.
    pub fn set(&self, value: T) -> Result<()> {
        let unchanged = match &self.inner.equals {
            Some(equals) => equals(&self.inner.value.borrow(), &value),
            None => false,
        };
        if unchanged {
            return Ok(());
        }

        Runtime::with(|runtime| {
            runtime.check_write(self.inner.id)?;
            let old = std::mem::replace(&mut *self.inner.value.borrow_mut(), value);
            drop(old);
            runtime.notify_changed(self.inner.id)
        })
    }

    /// Update the value in place and notify observers.
    ///
    /// The equality check is skipped: an in-place update always counts as a
    /// change.
    pub fn update(&self, f: impl FnOnce(&mut T)) -> Result<()> {
        Runtime::with(|runtime| {
            runtime.check_write(self.inner.id)?;
            f(&mut self.inner.value.borrow_mut());
            runtime.notify_changed(self.inner.id)
        })
    }

    /// Number of writes that changed the value.
    pub fn version(&self) -> u64 {
        Runtime::with(|runtime| runtime.version_of(self.inner.id).unwrap_or(0))
    }

    /// Number of computations that read this signal during their last run.
    pub fn observer_count(&self) -> usize {
        Runtime::with(|runtime| runtime.observer_count(self.inner.id))
    }

    /// A handle that can only read.
    pub fn read_only(&self) -> ReadSignal<T> {
        ReadSignal(self.clone())
    }

    /// A handle that can only write.
    pub fn write_only(&self) -> WriteSignal<T> {
        WriteSignal(self.clone())
    }
}

impl<T: 'static> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Debug + 'static> Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .field("observer_count", &self.observer_count())
            .finish()
    }
}

/// Read half of a signal created with [`create_signal`].
pub struct ReadSignal<T: 'static>(Signal<T>);

impl<T: 'static> ReadSignal<T> {
    /// See [`Signal::get`].
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.0.get()
    }

    /// See [`Signal::get_untracked`].
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        self.0.get_untracked()
    }

    /// See [`Signal::with`].
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.0.with(f)
    }

    pub fn version(&self) -> u64 {
        self.0.version()
    }

    pub fn id(&self) -> NodeId {
        self.0.id()
    }
}

impl<T: 'static> Clone for ReadSignal<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

/// Write half of a signal created with [`create_signal`].
pub struct WriteSignal<T: 'static>(Signal<T>);

impl<T: 'static> WriteSignal<T> {
    /// See [`Signal::set`].
    pub fn set(&self, value: T) -> Result<()> {
        self.0.set(value)
    }

    /// See [`Signal::update`].
    pub fn update(&self, f: impl FnOnce(&mut T)) -> Result<()> {
        self.0.update(f)
    }
}

impl<T: 'static> Clone for WriteSignal<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

/// Create a signal and split it into read and write halves.
pub fn create_signal<T: PartialEq + 'static>(value: T) -> (ReadSignal<T>, WriteSignal<T>) {
    let signal = Signal::new(value);
    (signal.read_only(), signal.write_only())
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
    use crate::ReactiveError;

    #[test]
    fn signal_get_and_set() {
        let signal = Signal::new(0);
        assert_eq!(signal.get(), 0);

        signal.set(42).unwrap();
        assert_eq!(signal.get(), 42);
        assert_eq!(signal.version(), 1);
    }

    #[test]
    fn signal_update() {
        let signal = Signal::new(vec![1, 2]);
        signal.update(|v| v.push(3)).unwrap();
        assert_eq!(signal.get(), vec![1, 2, 3]);
    }

    #[test]
    fn equal_writes_are_ignored() {
        let signal = Signal::new(7);
        signal.set(7).unwrap();
        assert_eq!(signal.version(), 0);

        let loud = Signal::always_notify(7);
        loud.set(7).unwrap();
        assert_eq!(loud.version(), 1);
    }

    #[test]
    fn custom_equality() {
        // Case-insensitive strings.
        let name = Signal::with_equality("Ada".to_string(), |a: &String, b: &String| {
            a.eq_ignore_ascii_case(b)
        });
        name.set("ADA".to_string()).unwrap();
        assert_eq!(name.get(), "Ada");
        name.set("Grace".to_string()).unwrap();
        assert_eq!(name.get(), "Grace");
    }

    #[test]
    fn signal_notifies_effects() {
        let signal = Signal::new(0);
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        let reader = signal.clone();
        let _effect = create_effect(move || {
            reader.get();
            call_count_clone.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert_eq!(signal.observer_count(), 1);

        signal.set(1).unwrap();
        assert_eq!(call_count.load(Ordering::SeqCst), 2);

        signal.set(2).unwrap();
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn signal_clone_shares_state() {
        let signal1 = Signal::new(0);
        let signal2 = signal1.clone();

        signal1.set(42).unwrap();
        assert_eq!(signal2.get(), 42);

        signal2.set(100).unwrap();
        assert_eq!(signal1.get(), 100);
        assert_eq!(signal1.id(), signal2.id());
    }

    #[test]
    fn split_handles() {
        let (count, set_count) = create_signal(1);
        set_count.set(2).unwrap();
        assert_eq!(count.get(), 2);
        assert_eq!(count.version(), 1);
    }

    #[test]
    fn dropping_last_handle_releases_node() {
        let signal = Signal::new(1);
        let id = signal.id();
        let clone = signal.clone();
        drop(signal);
        assert!(Runtime::with(|runtime| runtime.contains(id)));
        drop(clone);
        assert!(!Runtime::with(|runtime| runtime.contains(id)));
    }

    #[test]
    fn writing_a_tracked_signal_from_its_observer_is_cyclic() {
        let signal = Signal::new(0);
        let result = Rc::new(RefCell::new(None));

        let (reader, slot) = (signal.clone(), result.clone());
        let _effect = create_effect(move || {
            let value = reader.get();
            if value == 0 {
                *slot.borrow_mut() = Some(reader.set(value + 1));
            }
        })
        .unwrap();

        let outcome = result.borrow_mut().take().unwrap();
        assert!(matches!(
            outcome,
            Err(ReactiveError::CyclicDependency { source_node, .. }) if source_node == signal.id()
        ));
        assert_eq!(signal.get(), 0);
    }
}
