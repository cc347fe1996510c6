//! Context Store
//!
//! Context passes values down the ownership tree without threading them
//! through every function. A value provided on an owner is visible to every
//! computation and scope created below it; lookups walk from the current
//! owner up through its ancestors and return the nearest entry.
//!
//! # Example
//!
//! ```rust,ignore
//! let theme = create_context(Some("light"));
//!
//! theme.provide("dark", || {
//!     create_effect(move || {
//!         assert_eq!(use_context(&theme)?, "dark");
//!         Ok::<_, ReactiveError>(())
//!     })
//! })?;
//! ```

use std::any::type_name;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::error::{ReactiveError, Result};

use super::owner::Owner;
use super::runtime::Runtime;

/// Unique key of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ContextId(u64);

impl ContextId {
    /// Generate a new unique context ID.
    ///
    /// Uses an atomic counter so keys stay unique across threads.
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A typed context key with an optional default value.
#[derive(Debug, Clone)]
pub struct Context<T> {
    id: ContextId,
    default: Option<T>,
}

impl<T: Clone + 'static> Context<T> {
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// The value returned by [`use_context`] when nothing is provided.
    pub fn default_value(&self) -> Option<&T> {
        self.default.as_ref()
    }

    /// Run `f` in a new child owner that provides `value`.
    ///
    /// The child owner is disposed with the current owner. Fails with
    /// `NoOwner` outside any owner.
    pub fn provide<R>(&self, value: T, f: impl FnOnce() -> R) -> Result<R> {
        let parent = Owner::current().ok_or(ReactiveError::NoOwner)?;
        let provider = parent.child()?;
        Runtime::with(|runtime| runtime.provide_context(provider.id(), self.id, Rc::new(value)))?;
        provider.run(f)
    }
}

/// Create a new context key.
pub fn create_context<T: Clone + 'static>(default: Option<T>) -> Context<T> {
    Context {
        id: ContextId::next(),
        default,
    }
}

/// Set `value` for `context` on the current owner.
///
/// Replaces an entry previously set on the same owner.
pub fn provide_context<T: 'static>(context: &Context<T>, value: T) -> Result<()> {
    Runtime::with(|runtime| {
        let owner = runtime.owner.get().ok_or(ReactiveError::NoOwner)?;
        runtime.provide_context(owner, context.id, Rc::new(value))
    })
}

/// Look up `context` from the current owner upwards.
///
/// Falls back to the context's default, and fails with `ContextNotFound`
/// if there is none.
pub fn use_context<T: Clone + 'static>(context: &Context<T>) -> Result<T> {
    let found = Runtime::with(|runtime| runtime.lookup_context(context.id));
    if let Some(value) = found.as_ref().and_then(|value| value.downcast_ref::<T>()) {
        return Ok(value.clone());
    }

    context
        .default
        .clone()
        .ok_or(ReactiveError::ContextNotFound {
            context: context.id,
            type_name: type_name::<T>(),
        })
}
