//! Batching
//!
//! Group several writes so that dependent computations run once, after the
//! last write, instead of once per write.

use crate::error::Result;

use super::runtime::Runtime;

/// Run `f` with writes deferred, then flush once.
///
/// Nested batches coalesce: only the outermost one flushes. Inside a
/// running flush the writes are folded into that flush instead.
///
/// ```rust,ignore
/// let a = Signal::new(1);
/// let b = Signal::new(2);
///
/// // Without batch: the effect would run once per write.
/// batch(|| {
///     a.set(10)?;
///     b.set(20)
/// })??;
/// ```
///
/// Returns the error of a computation that failed during the flush.
pub fn batch<R>(f: impl FnOnce() -> R) -> Result<R> {
    Runtime::with(|runtime| runtime.run_updates(|| Ok(f())))
}

/// Check if writes are currently deferred (inside a batch or a flush).
pub fn is_batching() -> bool {
    Runtime::with(Runtime::is_batching)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    use crate::reactive::effect::create_effect;
    use crate::reactive::signal::Signal;

    #[test]
    fn batch_flushes_once() {
        let a = Signal::new(1);
        let b = Signal::new(2);
        let run_count = Rc::new(Cell::new(0));

        let (a_clone, b_clone, runs) = (a.clone(), b.clone(), run_count.clone());
        create_effect(move || {
            let _ = a_clone.get() + b_clone.get();
            runs.set(runs.get() + 1);
        })
        .unwrap();
        assert_eq!(run_count.get(), 1);

        batch(|| {
            a.set(10).unwrap();
            b.set(20).unwrap();
            assert_eq!(run_count.get(), 1);
        })
        .unwrap();

        assert_eq!(run_count.get(), 2);
    }

    #[test]
    fn nested_batches_coalesce() {
        let signal = Signal::new(0);
        let run_count = Rc::new(Cell::new(0));

        let (reader, runs) = (signal.clone(), run_count.clone());
        create_effect(move || {
            reader.get();
            runs.set(runs.get() + 1);
        })
        .unwrap();

        batch(|| {
            batch(|| signal.set(1).unwrap()).unwrap();
            assert!(is_batching());
            assert_eq!(run_count.get(), 1);
            signal.set(2).unwrap();
        })
        .unwrap();

        assert!(!is_batching());
        assert_eq!(run_count.get(), 2);
    }

    #[test]
    fn batch_returns_the_closure_value() {
        assert_eq!(batch(|| 7).unwrap(), 7);
    }
}
