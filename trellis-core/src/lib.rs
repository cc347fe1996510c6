//! Trellis Core
//!
//! This crate provides the core runtime for the Trellis reactive framework.
//! It implements:
//!
//! - Reactive primitives (signals, memos, effects, computeds)
//! - A dependency graph with two-phase mark/flush updates
//! - An ownership tree for disposal, cleanups and error boundaries
//! - Context propagation through the ownership tree
//!
//! Updates are glitch-free: after a write returns, every memo and effect
//! reachable from the written signal reflects the new value, and no
//! computation ever runs against a partially updated graph.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: the node arena, dependency edges and scheduler queues
//! - `reactive`: public primitives and the per-thread runtime
//! - `diagnostics`: serializable snapshots of the graph
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::{create_effect, create_memo, Signal};
//!
//! // Create a signal
//! let count = Signal::new(0);
//!
//! // Create a derived value
//! let source = count.clone();
//! let doubled = create_memo(move || source.get() * 2);
//!
//! // Create an effect
//! create_effect(move || {
//!     println!("Doubled: {}", doubled.get());
//! })?;
//!
//! // Update the signal
//! count.set(5)?;
//! // Effect automatically runs, prints: "Doubled: 10"
//! ```
//!
//! # Threading
//!
//! Each thread has its own runtime. Handles are `!Send`; nodes created on
//! one thread are invisible to others.

pub mod diagnostics;
pub mod graph;
pub mod reactive;

mod config;
mod error;

pub use config::{RuntimeConfig, CATCH_PANICS_ENV, MAX_FLUSH_PASSES_ENV};
pub use diagnostics::{snapshot, GraphSnapshot, NodeSnapshot};
pub use error::{BoxError, ReactiveError, Result};
pub use graph::{NodeId, NodeKind, NodeState};
pub use reactive::{
    batch, catch_error, create_computed, create_context, create_effect, create_memo,
    create_memo_result, create_memo_with_equality, create_render_effect, create_root,
    create_selector, create_signal, current_observer, flush, get_owner, is_batching, is_tracking,
    on, on_cleanup, provide_context, run_with_owner, untrack, use_context, Context, ContextId,
    Effect, EffectOutput, Memo, Owner, ReadSignal, Selector, Signal, WriteSignal,
};
pub use reactive::{config as runtime_config, configure};
