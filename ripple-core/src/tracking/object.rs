//! Capabilities every trackable entity exposes to the engine.
//!
//! Code that wires ordinary fields into the engine implements these traits
//! once per entity type and routes each call by property index to the
//! matching [`TrackingProperty`](super::TrackingProperty).

use super::context::TrackingContext;
use super::edge::{EntityId, Subscriber};
use super::error::Result;
use super::notification::{Notification, UpdateReason};

/// Identity and context of something that lives in the observation graph.
pub trait Entity {
    /// Stable handle used in graph edges.
    fn handle(&self) -> EntityId;

    /// The engine this entity belongs to.
    fn context(&self) -> &TrackingContext;

    /// Diagnostic name.
    fn name(&self) -> Option<&str> {
        None
    }
}

/// Something that can be told about changes of what it depends on.
///
/// Pure reaction sinks (autoruns) only implement this trait; they are never
/// relaxed because nothing can subscribe to them.
pub trait TrackingSubscriber: Entity {
    fn notify(&self, index: usize, notification: Notification) -> Result<()>;

    fn update(&self, index: usize, reason: UpdateReason) -> Result<()>;

    fn property_name(&self, index: usize) -> Option<&str>;

    /// The dependency side of this entity, if it has one.
    fn as_trackable(&self) -> Option<&dyn TrackableObject> {
        None
    }
}

/// An entity whose properties can be depended upon.
pub trait TrackableObject: TrackingSubscriber {
    fn subscribe(&self, index: usize, subscriber: Subscriber) -> Result<()>;

    fn unsubscribe(&self, index: usize, subscriber: Subscriber) -> Result<()>;
}
