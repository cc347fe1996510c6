//! Selectors
//!
//! A selector answers "is this key the selected one?" for many keys at
//! once. When the selection moves from `a` to `b`, only computations that
//! asked about `a` or `b` re-run, instead of every row of a list.

use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use crate::error::{ReactiveError, Result};

use super::effect::{create_computed, Effect};
use super::owner::on_cleanup;
use super::signal::Signal;
use super::tracking::is_tracking;

struct SelectorState<T> {
    current: RefCell<Option<T>>,
    keys: RefCell<HashMap<T, Signal<bool>>>,
}

impl<T: Eq + Hash> SelectorState<T> {
    /// Drop the signal of `key` if nothing observes it any more.
    fn release_key(&self, key: &T) {
        let removed = {
            let mut keys = self.keys.borrow_mut();
            match keys.get(key) {
                Some(signal) if signal.observer_count() == 0 => keys.remove(key),
                _ => None,
            }
        };
        drop(removed);
    }
}

/// Keyed selection tracking. See [`create_selector`].
pub struct Selector<T: 'static> {
    state: Rc<SelectorState<T>>,
    computed: Effect,
}

impl<T> Selector<T>
where
    T: Clone + Eq + Hash + 'static,
{
    /// Whether `key` is currently selected.
    ///
    /// Inside a computation, this only subscribes to changes of `key`'s
    /// selection status. The key is forgotten again once no computation
    /// observes it.
    pub fn is_selected(&self, key: &T) -> bool {
        if !is_tracking() {
            return self.state.current.borrow().as_ref() == Some(key);
        }

        let signal = {
            let mut keys = self.state.keys.borrow_mut();
            match keys.get(key) {
                Some(signal) => signal.clone(),
                None => {
                    let selected = self.state.current.borrow().as_ref() == Some(key);
                    let signal = Signal::new(selected);
                    keys.insert(key.clone(), signal.clone());
                    signal
                }
            }
        };

        let weak = Rc::downgrade(&self.state);
        let released = key.clone();
        on_cleanup(move || {
            if let Some(state) = weak.upgrade() {
                state.release_key(&released);
            }
        });

        signal.get()
    }

    /// The computation that follows the source.
    pub fn computation(&self) -> Effect {
        self.computed
    }

    /// Number of keys some computation currently observes.
    pub fn key_count(&self) -> usize {
        self.state.keys.borrow().len()
    }
}

impl<T: 'static> Clone for Selector<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
            computed: self.computed,
        }
    }
}

/// Create a selector over the value produced by `source`.
///
/// `source` is tracked by an internal computation owned by the current
/// owner.
pub fn create_selector<T>(source: impl Fn() -> T + 'static) -> Result<Selector<T>>
where
    T: Clone + Eq + Hash + 'static,
{
    let state = Rc::new(SelectorState {
        current: RefCell::new(None),
        keys: RefCell::new(HashMap::new()),
    });

    let weak: Weak<SelectorState<T>> = Rc::downgrade(&state);
    let computed = create_computed(move || -> Result<(), ReactiveError> {
        let next = source();
        let Some(state) = weak.upgrade() else {
            return Ok(());
        };

        let previous = state.current.replace(Some(next.clone()));
        if previous.as_ref() == Some(&next) {
            return Ok(());
        }

        let (deselected, selected) = {
            let keys = state.keys.borrow();
            (
                previous.and_then(|key| keys.get(&key).cloned()),
                keys.get(&next).cloned(),
            )
        };
        if let Some(signal) = deselected {
            signal.set(false)?;
        }
        if let Some(signal) = selected {
            signal.set(true)?;
        }
        Ok(())
    })?;

    Ok(Selector { state, computed })
}
