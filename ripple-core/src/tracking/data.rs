//! Per-property tracking state.
//!
//! A [`TrackingData`] record only exists while a property takes part in the
//! observation graph. Reads of a property without one skip tracking entirely.

use indexmap::IndexSet;
use serde::Serialize;
use smallvec::SmallVec;

use super::edge::{Dependency, Subscriber};
use super::error::Result;

/// Subscriber list copied out of the record before broadcasting, so no borrow
/// is held while other entities run.
pub(crate) type SubscriberSnapshot = SmallVec<[Subscriber; 4]>;

/// Cached reactive state of one property.
#[derive(Debug)]
pub struct TrackingData<T> {
    /// Result of the last evaluation. `None` until the first one ran.
    pub(crate) cached: Option<Result<T>>,

    /// Whether subscribers have been told this property is stale.
    pub(crate) known_stale: bool,

    /// Upstream `Stale` notifications not yet matched by a `Ready`.
    pub(crate) stale_dependencies: usize,

    /// Some dependency reported a modification since the last evaluation.
    pub(crate) modified_dependencies: bool,

    /// The getter is running right now.
    pub(crate) evaluating: bool,

    /// Edges recorded by the last evaluation; we are subscribed to each.
    pub(crate) dependencies: IndexSet<Dependency>,

    pub(crate) subscribers: IndexSet<Subscriber>,
}

impl<T> TrackingData<T> {
    /// A record created on subscription. The subscriber evaluates it right
    /// away, so it doesn't need the modified flag.
    pub fn new() -> Self {
        Self {
            cached: None,
            known_stale: false,
            stale_dependencies: 0,
            modified_dependencies: false,
            evaluating: false,
            dependencies: IndexSet::new(),
            subscribers: IndexSet::new(),
        }
    }

    /// A record created because the property was read inside an evaluation.
    ///
    /// A freshly observed property counts as just modified, which forces the
    /// first read to evaluate it.
    pub fn observed() -> Self {
        Self {
            modified_dependencies: true,
            ..Self::new()
        }
    }

    pub fn needs_update(&self) -> bool {
        self.modified_dependencies || self.stale_dependencies > 0
    }

    pub fn subscriber_snapshot(&self) -> SubscriberSnapshot {
        self.subscribers.iter().copied().collect()
    }

    /// True if the cache holds a successful value equal to `value`.
    pub fn holds_value(&self, value: &T) -> bool
    where
        T: PartialEq,
    {
        matches!(&self.cached, Some(Ok(cached)) if cached == value)
    }

    pub fn snapshot(&self, name: Option<String>) -> PropertySnapshot {
        PropertySnapshot {
            name,
            tracked: true,
            has_value: matches!(self.cached, Some(Ok(_))),
            has_error: matches!(self.cached, Some(Err(_))),
            known_stale: self.known_stale,
            stale_dependencies: self.stale_dependencies,
            modified_dependencies: self.modified_dependencies,
            dependencies: self.dependencies.iter().copied().collect(),
            subscribers: self.subscribers.iter().copied().collect(),
        }
    }
}

impl<T> Default for TrackingData<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of a property's tracking state, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertySnapshot {
    pub name: Option<String>,
    pub tracked: bool,
    pub has_value: bool,
    pub has_error: bool,
    pub known_stale: bool,
    pub stale_dependencies: usize,
    pub modified_dependencies: bool,
    pub dependencies: Vec<Dependency>,
    pub subscribers: Vec<Subscriber>,
}

impl PropertySnapshot {
    /// Snapshot of a property that has no tracking data.
    pub fn untracked(name: Option<String>) -> Self {
        Self {
            name,
            tracked: false,
            has_value: false,
            has_error: false,
            known_stale: false,
            stale_dependencies: 0,
            modified_dependencies: false,
            dependencies: Vec::new(),
            subscribers: Vec::new(),
        }
    }
}
