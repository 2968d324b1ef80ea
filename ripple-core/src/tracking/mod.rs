//! Tracking Engine
//!
//! This module implements the observation graph behind every reactive
//! primitive: who read what, who must be told about changes, and when
//! recomputation happens.
//!
//! # Overview
//!
//! The graph is distributed. There is no central node table; each tracked
//! property keeps its own dependency and subscriber sets as
//! `(entity handle, property index)` edges, and the [`TrackingContext`]
//! resolves handles to live entities when a message has to be delivered.
//!
//! # How Propagation Works
//!
//! 1. A write to a tracked variable broadcasts `Stale` to its subscribers,
//!    which forward it (once) to theirs. Staleness reaches the whole
//!    downstream graph before anything is recomputed.
//!
//! 2. The write then broadcasts `ReadyModified`. A subscriber that has heard
//!    back from every stale dependency schedules a refresh reaction if any
//!    of them was modified, and passes the ready notification on.
//!
//! 3. When the outermost batch closes, queued reactions run in sweeps until
//!    none are left, or the sweep cap is hit.
//!
//! 4. Properties that lost their last subscriber, or whose evaluation read
//!    nothing tracked, are then checked for relaxation: they drop their
//!    tracking data and unsubscribe from their own dependencies.
//!
//! # Design Decisions
//!
//! 1. Properties are passive until observed. Reading an untracked property
//!    outside an evaluation costs nothing beyond the raw read.
//!
//! 2. A property's state machine ([`TrackingProperty`]) never knows where
//!    its value lives. Storage access goes through an [`Accessor`].
//!
//! 3. Evaluation failures are values. They are cached and re-raised to each
//!    reader until a dependency changes.

mod config;
mod context;
mod data;
mod edge;
mod error;
mod notification;
mod object;
mod property;

pub use config::{TrackingConfig, DEFAULT_MAX_REACTION_SWEEPS};
pub use context::{EvaluationRecord, EvaluationScope, PausedScope, Reaction, TrackingContext};
pub use data::{PropertySnapshot, TrackingData};
pub use edge::{Dependency, EntityId, Subscriber};
pub use error::{EvaluationError, InvariantViolation, Result, TrackingError};
pub use notification::{Notification, UpdateReason};
pub use object::{Entity, TrackableObject, TrackingSubscriber};
pub use property::{Accessor, PropertyLabel, TrackingProperty};
