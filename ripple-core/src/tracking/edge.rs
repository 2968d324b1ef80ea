//! Graph edge endpoints.
//!
//! Every trackable entity gets a stable [`EntityId`] when it is created.
//! Edges of the observation graph are plain value pairs of that handle and a
//! property index, so they can be compared, hashed and stored in ordered sets
//! without relying on object identity.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Opaque handle identifying one trackable entity.
///
/// Handles come from a process-wide counter and are never reused, so an edge
/// that outlives its entity can be detected instead of aliasing a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct EntityId(u64);

impl EntityId {
    /// Allocate a fresh handle.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw handle value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Edge "I read this": the property `index` of `entity` was read during an
/// evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Dependency {
    pub entity: EntityId,
    pub index: usize,
}

impl Dependency {
    pub fn new(entity: EntityId, index: usize) -> Self {
        Self { entity, index }
    }
}

/// Edge "notify this on change": property `index` of `entity` wants to hear
/// about staleness of whatever it is subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Subscriber {
    pub entity: EntityId,
    pub index: usize,
}

impl Subscriber {
    pub fn new(entity: EntityId, index: usize) -> Self {
        Self { entity, index }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.entity, self.index)
    }
}

impl fmt::Display for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.entity, self.index)
    }
}
