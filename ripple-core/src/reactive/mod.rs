//! Reactive Primitives
//!
//! This module wraps the tracking engine in the handful of types application
//! code actually touches: vars, evals, batches and autoruns.
//!
//! # Concepts
//!
//! ## Vars
//!
//! A [`Var`] is a container for mutable state. When it is read inside an
//! evaluation, the evaluation starts depending on it. When a different value
//! is written, everything depending on it is told it is stale and, once the
//! write is done, that it was modified.
//!
//! ## Evals
//!
//! An [`Eval`] is a derived value. It is lazy: it computes on access, and it
//! only caches while something observes it. Errors from its function are
//! cached just like values.
//!
//! ## Autoruns
//!
//! An [`Autorun`] is a side-effecting computation that runs immediately and
//! then again, in the reaction phase, whenever something it read was
//! modified. [`watch`] builds one that hands a trackable's fresh value to a
//! callback.
//!
//! ## Batches
//!
//! Writes inside a [`Batch`] propagate staleness right away, but nothing is
//! recomputed until the outermost batch closes.
//!
//! # Implementation Notes
//!
//! Every primitive is an entity registered with a
//! [`TrackingContext`](crate::tracking::TrackingContext). By default that is
//! the calling thread's context; the `new_in` constructors take an explicit
//! one, which keeps tests isolated from each other.

mod autorun;
mod batch;
mod eval;
mod var;

use std::rc::Rc;

use crate::tracking::{EntityId, Result, TrackingContext};

pub use autorun::{watch, Autorun};
pub use batch::{batch, batched, untracked, Batch};
pub use eval::Eval;
pub use var::Var;

/// Anything whose value can be read, and tracked, as a `T`.
pub trait Trackable<T> {
    /// Read the value, recording a dependency if an evaluation is running.
    fn get(&self) -> Result<T>;

    fn id(&self) -> EntityId;

    fn context(&self) -> &Rc<TrackingContext>;
}

/// A trackable that can also be written.
pub trait WritableTrackable<T>: Trackable<T> {
    fn set(&self, value: T) -> Result<()>;
}
