//! Batching and untracked sections on the current thread's context.

use std::rc::Rc;

use crate::tracking::{Result, TrackingContext};

/// Scoped batch.
///
/// Writes made while the guard is alive notify staleness immediately, but
/// recomputation and autoruns wait until the outermost batch closes.
///
/// Prefer [`Batch::close`], which reports a reaction cycle as an error.
/// Dropping the guard closes it too; a fatal error found that way panics,
/// except while already unwinding, where the batch is abandoned without
/// running anything.
///
/// # Example
///
/// ```rust
/// use ripple_core::reactive::{batch, Var};
///
/// let a = Var::new(1);
/// let b = Var::new(2);
///
/// let guard = batch();
/// a.set(10)?;
/// b.set(20)?;
/// guard.close()?;
/// # Ok::<(), ripple_core::tracking::TrackingError>(())
/// ```
#[must_use = "the batch closes as soon as the guard is dropped"]
pub struct Batch {
    context: Rc<TrackingContext>,
    open: bool,
}

impl Batch {
    /// Open a batch on an explicit context.
    pub fn open(context: &Rc<TrackingContext>) -> Self {
        context.open_batch();
        Self {
            context: Rc::clone(context),
            open: true,
        }
    }

    pub fn context(&self) -> &Rc<TrackingContext> {
        &self.context
    }

    /// Close the batch, running reactions if it was the outermost one.
    pub fn close(mut self) -> Result<()> {
        self.open = false;
        self.context.close_batch()
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;

        if std::thread::panicking() {
            self.context.abandon_batch();
            return;
        }

        if let Err(err) = self.context.close_batch() {
            panic!("closing a dropped batch failed: {err}");
        }
    }
}

/// Open a batch on the current thread's context.
pub fn batch() -> Batch {
    Batch::open(&TrackingContext::current())
}

/// Run `f` inside a batch on the current thread's context.
pub fn batched<R>(f: impl FnOnce() -> Result<R>) -> Result<R> {
    TrackingContext::current().batched(f)
}

/// Run `f` without recording any reads in the enclosing evaluation.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    TrackingContext::current().untracked(f)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Autorun, Eval, Var};
    use crate::tracking::{TrackingConfig, TrackingError, UpdateReason};
    use std::cell::Cell;

    #[test]
    fn batch_tracks_depth() {
        let context = Rc::new(TrackingContext::new());

        let outer = Batch::open(&context);
        let inner = Batch::open(&context);
        assert_eq!(context.batch_depth(), 2);

        inner.close().unwrap();
        assert_eq!(context.batch_depth(), 1);
        drop(outer);
        assert_eq!(context.batch_depth(), 0);
    }

    #[test]
    fn autoruns_wait_for_the_outermost_batch() {
        let context = Rc::new(TrackingContext::new());
        let a = Var::new_in(&context, None, 1);
        let runs = Rc::new(Cell::new(0));

        let _autorun = {
            let (a, runs) = (a.clone(), runs.clone());
            Autorun::new_in(&context, None, move || {
                a.get()?;
                runs.set(runs.get() + 1);
                Ok(())
            })
            .unwrap()
        };
        assert_eq!(runs.get(), 1);

        let guard = Batch::open(&context);
        a.set(2).unwrap();
        a.set(3).unwrap();
        assert_eq!(runs.get(), 1);
        assert!(context.pending_reactions() > 0);

        guard.close().unwrap();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn batched_returns_the_closure_result() {
        let context = TrackingContext::current();
        let value = batched(|| {
            assert!(context.is_in_batch());
            Ok(7)
        })
        .unwrap();

        assert_eq!(value, 7);
        assert!(!context.is_in_batch());
    }

    #[test]
    fn batched_keeps_evaluation_errors() {
        let err = batched(|| Err::<(), _>(TrackingError::msg("nope"))).unwrap_err();
        assert!(err.is_evaluation());
        assert_eq!(TrackingContext::current().batch_depth(), 0);
    }

    #[test]
    fn closing_reports_a_reaction_cycle() {
        let context = Rc::new(TrackingContext::with_config(
            TrackingConfig::new().with_max_reaction_sweeps(3),
        ));
        let a = Var::new_in(&context, None, 0);

        let _feedback = {
            let a = a.clone();
            Autorun::new_in(&context, None, move || {
                let value = a.get()?;
                a.set(value + 1)
            })
            .unwrap()
        };

        let guard = Batch::open(&context);
        a.set(100).unwrap();
        let err = guard.close().unwrap_err();
        assert!(matches!(err, TrackingError::ReactionCycle { sweeps: 3 }));
        assert_eq!(context.pending_reactions(), 0);
    }

    #[test]
    fn untracked_reads_are_not_dependencies() {
        let context = TrackingContext::current();
        let a = Var::new(1);
        let b = Var::new(2);
        let calls = Rc::new(Cell::new(0));

        let sum = {
            let (a, b, calls) = (a.clone(), b.clone(), calls.clone());
            Eval::new(move || {
                calls.set(calls.get() + 1);
                Ok(a.get()? + untracked(|| b.get())?)
            })
        };

        let scope = context.open_evaluation("reader", UpdateReason::Requested);
        assert_eq!(sum.get().unwrap(), 3);
        scope.close().unwrap();

        assert_eq!(sum.snapshot().dependencies.len(), 1);
        b.set(20).unwrap();
        assert!(!sum.snapshot().known_stale);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn dropping_a_batch_while_unwinding_only_restores_depth() {
        let context = Rc::new(TrackingContext::new());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = Batch::open(&context);
            panic!("boom");
        }));

        assert!(result.is_err());
        assert_eq!(context.batch_depth(), 0);
    }
}
