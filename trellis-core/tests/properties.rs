//! Property-based tests for update consistency.
//!
//! Random write sequences against small graphs; every observation an effect
//! makes must be consistent with the signals it was derived from, and
//! effects must run exactly when something they read changed.

use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;

use trellis_core::{batch, create_effect, create_memo, create_root, Signal};

#[derive(Debug, Clone)]
enum Op {
    Flip,
    Left(i8),
    Right(i8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Flip),
        (-3i8..3).prop_map(Op::Left),
        (-3i8..3).prop_map(Op::Right),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Effects only ever see values derived from one consistent state.
    #[test]
    fn effects_never_observe_glitches(
        writes in prop::collection::vec((0usize..3, -20i32..20), 1..40)
    ) {
        let signals: Vec<Signal<i32>> = (0..3).map(Signal::new).collect();
        let records = Rc::new(RefCell::new(Vec::new()));

        let (s, sink) = (signals.clone(), records.clone());
        let (root, runs) = create_root(move |_| {
            let (a, b) = (s[0].clone(), s[1].clone());
            let sum = create_memo(move || a.get() + b.get());
            let (b, c) = (s[1].clone(), s[2].clone());
            let product = create_memo(move || b.get() * c.get());
            let total = create_memo(move || sum.get() + product.get());

            create_effect(move || {
                let inputs = (s[0].get(), s[1].get(), s[2].get());
                sink.borrow_mut().push((inputs, sum.get(), product.get(), total.get()));
            })
            .unwrap()
        });

        let mut expected_runs = 1;
        for (index, value) in writes {
            let changed = signals[index].get_untracked() != value;
            signals[index].set(value).unwrap();
            if changed {
                expected_runs += 1;
            }

            let last = *records.borrow().last().unwrap();
            let current = (
                signals[0].get_untracked(),
                signals[1].get_untracked(),
                signals[2].get_untracked(),
            );
            prop_assert_eq!(last.0, current);
        }

        for ((a, b, c), sum, product, total) in records.borrow().iter().copied() {
            prop_assert_eq!(sum, a + b);
            prop_assert_eq!(product, b * c);
            prop_assert_eq!(total, sum + product);
        }
        prop_assert_eq!(runs.run_count(), expected_runs);

        root.dispose().unwrap();
    }

    /// Only the branch taken on the last run is a dependency.
    #[test]
    fn dynamic_dependencies_follow_the_branch(ops in prop::collection::vec(op(), 1..50)) {
        let flag = Signal::new(true);
        let left = Signal::new(0i8);
        let right = Signal::new(0i8);

        let (f, l, r) = (flag.clone(), left.clone(), right.clone());
        let (root, effect) = create_root(move |_| {
            create_effect(move || {
                let _ = if f.get() { l.get() } else { r.get() };
            })
            .unwrap()
        });

        let mut expected_runs = 1;
        for op in ops {
            let reruns = match op {
                Op::Flip => {
                    flag.set(!flag.get_untracked()).unwrap();
                    true
                }
                Op::Left(value) => {
                    let changed = left.get_untracked() != value;
                    left.set(value).unwrap();
                    changed && flag.get_untracked()
                }
                Op::Right(value) => {
                    let changed = right.get_untracked() != value;
                    right.set(value).unwrap();
                    changed && !flag.get_untracked()
                }
            };
            if reruns {
                expected_runs += 1;
            }
            prop_assert_eq!(effect.run_count(), expected_runs);
        }

        let (active, inactive) = if flag.get_untracked() {
            (&left, &right)
        } else {
            (&right, &left)
        };
        prop_assert_eq!(active.observer_count(), 1);
        prop_assert_eq!(inactive.observer_count(), 0);

        root.dispose().unwrap();
    }

    /// A batch runs each dependent effect at most once.
    #[test]
    fn batches_coalesce(writes in prop::collection::vec((0usize..2, 0i32..4), 0..20)) {
        let signals = [Signal::new(0), Signal::new(0)];

        let s = signals.clone();
        let (root, effect) = create_root(move |_| {
            create_effect(move || {
                s[0].get();
                s[1].get();
            })
            .unwrap()
        });

        let mut any_changed = false;
        batch(|| {
            for (index, value) in &writes {
                any_changed |= signals[*index].get_untracked() != *value;
                signals[*index].set(*value).unwrap();
            }
        })
        .unwrap();

        prop_assert_eq!(effect.run_count(), if any_changed { 2 } else { 1 });
        root.dispose().unwrap();
    }
}
