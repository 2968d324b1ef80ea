//! Ripple Core
//!
//! This crate provides a fine-grained, pull-based reactive runtime. It
//! implements:
//!
//! - Dependency tracking between trackable properties
//! - Two-phase change propagation (stale, then ready)
//! - Batched recomputation in a reaction phase
//! - Automatic release of tracking state nobody observes anymore
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `tracking`: the engine. Entities, edges, per-property state machines
//!   and the context coordinating evaluations, batches and reactions.
//! - `reactive`: the primitives built on top of it (vars, evals, autoruns,
//!   batches).
//!
//! # Example
//!
//! ```rust
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use ripple_core::reactive::{batch, watch, Eval, Var};
//!
//! let a = Var::new(1);
//! let b = Var::new(2);
//! let sum = {
//!     let (a, b) = (a.clone(), b.clone());
//!     Eval::new(move || Ok(a.get()? + b.get()?))
//! };
//!
//! let last = Rc::new(Cell::new(0));
//! let _watch = {
//!     let last = last.clone();
//!     watch(sum.clone(), move |value| {
//!         if let Ok(value) = value {
//!             last.set(value);
//!         }
//!     })?
//! };
//!
//! let guard = batch();
//! a.set(10)?;
//! b.set(20)?;
//! guard.close()?;
//!
//! // One notification, after both writes.
//! assert_eq!(last.get(), 30);
//! # Ok::<(), ripple_core::tracking::TrackingError>(())
//! ```
//!
//! # Threading
//!
//! The runtime is single-threaded. Every thread has its own default
//! [`TrackingContext`](tracking::TrackingContext), and no primitive is
//! `Send`.

pub mod reactive;
pub mod tracking;

pub use reactive::{
    batch, batched, untracked, watch, Autorun, Batch, Eval, Trackable, Var, WritableTrackable,
};
pub use tracking::{TrackingConfig, TrackingContext, TrackingError};
