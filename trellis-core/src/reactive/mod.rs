//! Reactive Primitives
//!
//! This module implements the reactive system: signals, memos, effects,
//! the ownership tree and context. These primitives form the foundation of
//! Trellis's fine-grained reactivity.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a running computation (such as a memo or effect), the signal
//! records that computation as an observer. When the signal's value changes,
//! all observers are marked and brought up to date before the write returns.
//!
//! ## Memos
//!
//! A Memo is a derived value that caches its result. It re-evaluates only
//! when one of its dependencies changes, and stops propagation when the new
//! value equals the old one.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change. Effects are used to synchronize reactive state with
//! external systems, such as updating a view or logging.
//!
//! ## Owners
//!
//! Every computation belongs to an owner. Disposing an owner disposes
//! everything created under it and runs its cleanups; owners also carry
//! context values and error boundaries.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local runtime to automatically detect
//! dependencies. When a signal is read, we check if there is a running
//! computation and, if so, record the edge.
//!
//! This approach (sometimes called "automatic dependency tracking" or
//! "transparent reactivity") is used by SolidJS, Vue 3, and Leptos.

mod batch;
mod context;
mod effect;
mod memo;
mod owner;
mod runtime;
mod selector;
mod signal;
mod tracking;

pub use batch::{batch, is_batching};
pub use context::{create_context, provide_context, use_context, Context, ContextId};
pub use effect::{create_computed, create_effect, create_render_effect, Effect, EffectOutput};
pub use memo::{create_memo, create_memo_result, create_memo_with_equality, Memo};
pub use owner::{catch_error, create_root, get_owner, on_cleanup, run_with_owner, Owner};
pub use runtime::{config, configure, flush};
pub use selector::{create_selector, Selector};
pub use signal::{create_signal, ReadSignal, Signal, WriteSignal};
pub use tracking::{current_observer, is_tracking, on, untrack};

pub(crate) use runtime::Runtime;
