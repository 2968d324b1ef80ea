//! Tracking Property
//!
//! A [`TrackingProperty`] is the state machine behind one reactive slot of an
//! entity. It is deliberately ignorant of where the slot's value lives: raw
//! storage access goes through an [`Accessor`], so the same machine serves
//! plain variables, computed evaluations and hand-written or generated model
//! types with several slots.
//!
//! # States
//!
//! ```text
//! Untracked --(read in evaluation / subscribe)--> Stable <--> Stale
//!     ^                                              |
//!     +-------------------(relax)--------------------+
//! ```
//!
//! - **Untracked**: no [`TrackingData`]. Reads go straight to the accessor.
//! - **Stable**: the cached result is valid.
//! - **Stale**: at least one dependency announced it is changing. The
//!   property recomputes in the reaction phase (or earlier, if someone reads
//!   it), never inside the notification itself.
//!
//! # Borrowing
//!
//! Notifications, evaluations and subscriptions call into other entities,
//! which may call back into this one. The tracking data is therefore only
//! borrowed for short, self-contained updates; anything that leaves the
//! property works on a copy (see [`SubscriberSnapshot`]).

use std::cell::RefCell;
use std::fmt;

use indexmap::IndexSet;
use smallvec::SmallVec;

use super::context::TrackingContext;
use super::data::{PropertySnapshot, SubscriberSnapshot, TrackingData};
use super::edge::{Dependency, EntityId, Subscriber};
use super::error::{InvariantViolation, Result, TrackingError};
use super::notification::{Notification, UpdateReason};
use super::object::Entity;

/// Raw, untracked access to one property of an entity.
///
/// This is the capability the code owning the storage provides. `index` must
/// be stable for the lifetime of the entity and unique among its properties.
pub trait Accessor<E: ?Sized> {
    type Value;

    /// Diagnostic name of the property.
    fn property_name(&self) -> Option<&str>;

    fn index(&self) -> usize;

    /// `true` for read/write storage, `false` for computed properties.
    fn is_variable(&self) -> bool;

    fn get(&self, entity: &E) -> Result<Self::Value>;

    fn set(&self, entity: &E, value: Self::Value) -> Result<()>;
}

/// Display helper naming a property as `entity.property`.
pub struct PropertyLabel<'a> {
    entity: Option<&'a str>,
    handle: EntityId,
    property: Option<&'a str>,
}

impl<'a> PropertyLabel<'a> {
    pub fn new<E, A>(entity: &'a E, accessor: &'a A) -> Self
    where
        E: Entity + ?Sized,
        A: Accessor<E> + ?Sized,
    {
        Self {
            entity: entity.name(),
            handle: entity.handle(),
            property: accessor.property_name(),
        }
    }
}

impl fmt::Display for PropertyLabel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.entity {
            Some(name) => f.write_str(name)?,
            None => write!(f, "{}", self.handle)?,
        }
        if let Some(property) = self.property {
            write!(f, ".{property}")?;
        }
        Ok(())
    }
}

/// Reactive state machine for one property.
pub struct TrackingProperty<T> {
    data: RefCell<Option<TrackingData<T>>>,
}

impl<T> TrackingProperty<T> {
    pub fn new() -> Self {
        Self {
            data: RefCell::new(None),
        }
    }

    /// Whether the property currently has tracking data.
    pub fn is_tracked(&self) -> bool {
        self.data.borrow().is_some()
    }

    pub fn snapshot(&self, name: Option<String>) -> PropertySnapshot {
        match self.data.borrow().as_ref() {
            Some(data) => data.snapshot(name),
            None => PropertySnapshot::untracked(name),
        }
    }

    fn is_evaluating(&self) -> bool {
        matches!(self.data.borrow().as_ref(), Some(data) if data.evaluating)
    }

    fn with_data<R, E, A>(
        &self,
        entity: &E,
        accessor: &A,
        operation: &'static str,
        f: impl FnOnce(&mut TrackingData<T>) -> R,
    ) -> Result<R>
    where
        E: Entity + ?Sized,
        A: Accessor<E, Value = T>,
    {
        match self.data.borrow_mut().as_mut() {
            Some(data) => Ok(f(data)),
            None => Err(InvariantViolation::MissingData {
                property: PropertyLabel::new(entity, accessor).to_string(),
                operation,
            }
            .into()),
        }
    }

    /// Drop the tracking data and every subscription it holds, without
    /// waiting for a relaxation check. Used when the owning entity goes away.
    pub fn detach<E>(&self, entity: &E, index: usize)
    where
        E: Entity + ?Sized,
    {
        let data = self.data.borrow_mut().take();
        let Some(data) = data else {
            return;
        };

        let context = entity.context();
        let ourselves = Subscriber::new(entity.handle(), index);
        for dependency in data.dependencies {
            if let Err(err) = context.unsubscribe(dependency, ourselves) {
                tracing::warn!(entity = %entity.handle(), index, error = %err, "failed to detach from dependency");
            }
        }
    }
}

impl<T: Clone> TrackingProperty<T> {
    /// Read the property.
    ///
    /// Inside an evaluation, the read is recorded as a dependency and the
    /// property starts tracking. A tracked property refreshes itself if its
    /// cache is out of date. An untracked property outside any evaluation is
    /// read straight from the accessor without allocating anything.
    pub fn get<E, A>(&self, entity: &E, accessor: &A) -> Result<T>
    where
        E: Entity + ?Sized,
        A: Accessor<E, Value = T>,
    {
        if self.is_evaluating() {
            return Err(TrackingError::CyclicEvaluation {
                property: PropertyLabel::new(entity, accessor).to_string(),
            });
        }

        let context = entity.context();

        if context.is_evaluating() {
            context.note_evaluation(Dependency::new(entity.handle(), accessor.index()))?;

            let mut data = self.data.borrow_mut();
            if data.is_none() {
                tracing::trace!(property = %PropertyLabel::new(entity, accessor), "observed for the first time");
                *data = Some(TrackingData::observed());
            }
        }

        let needs_update = self.data.borrow().as_ref().map(TrackingData::needs_update);

        match needs_update {
            None => accessor.get(entity),
            Some(false) => self.cached(entity, accessor),
            Some(true) => context.batched(|| {
                self.update(entity, accessor, UpdateReason::ValueRequested)?;
                // Read before the batch closes: closing may relax us.
                self.cached(entity, accessor)
            }),
        }
    }

    fn cached<E, A>(&self, entity: &E, accessor: &A) -> Result<T>
    where
        E: Entity + ?Sized,
        A: Accessor<E, Value = T>,
    {
        let cached = self.with_data(entity, accessor, "read", |data| data.cached.clone())?;
        match cached {
            Some(result) => result,
            None => Err(InvariantViolation::MissingData {
                property: PropertyLabel::new(entity, accessor).to_string(),
                operation: "read of an unevaluated cache",
            }
            .into()),
        }
    }

    /// Write the property.
    ///
    /// A tracked variable receiving a different value announces itself stale,
    /// writes through, and then announces it is ready and modified. Equal
    /// values and untracked variables are written through silently.
    /// Computed properties are handed straight to the accessor, which is
    /// expected to reject the assignment.
    pub fn set<E, A>(&self, entity: &E, accessor: &A, value: T) -> Result<()>
    where
        T: PartialEq,
        E: Entity + ?Sized,
        A: Accessor<E, Value = T>,
    {
        entity.context().batched(|| {
            if !accessor.is_variable() {
                return accessor.set(entity, value);
            }

            let changed = self
                .data
                .borrow()
                .as_ref()
                .map(|data| !data.holds_value(&value));

            if changed != Some(true) {
                return accessor.set(entity, value);
            }

            tracing::debug!(property = %PropertyLabel::new(entity, accessor), "new and different value set on a variable");

            self.ensure_known_as_stale(entity, accessor)?;
            let written = accessor.set(entity, value.clone());
            if written.is_ok() {
                self.with_data(entity, accessor, "write", |data| {
                    data.cached = Some(Ok(value));
                })?;
            }
            self.ensure_known_as_stable(entity, accessor, written.is_ok())?;
            written
        })
    }

    /// Re-evaluate the property through its accessor, caching the value or
    /// the error, and rewire subscriptions to match what was read.
    ///
    /// A reaction queued by stabilization skips the work when a read earlier
    /// in the sweep has already refreshed the property.
    pub fn update<E, A>(&self, entity: &E, accessor: &A, reason: UpdateReason) -> Result<()>
    where
        E: Entity + ?Sized,
        A: Accessor<E, Value = T>,
    {
        let label = PropertyLabel::new(entity, accessor);

        {
            let mut data = self.data.borrow_mut();
            let Some(data) = data.as_mut() else {
                if reason == UpdateReason::DependenciesStabilized {
                    tracing::trace!(property = %label, "relaxed before its reaction ran");
                    return Ok(());
                }
                return Err(InvariantViolation::MissingData {
                    property: label.to_string(),
                    operation: "update",
                }
                .into());
            };

            if reason == UpdateReason::DependenciesStabilized && !data.needs_update() {
                tracing::trace!(property = %label, "already refreshed");
                return Ok(());
            }
            if data.evaluating {
                return Err(TrackingError::CyclicEvaluation {
                    property: label.to_string(),
                });
            }
            data.evaluating = true;
        }

        entity
            .context()
            .batched(|| self.evaluate_and_rectify(entity, accessor, reason))
    }

    fn evaluate_and_rectify<E, A>(&self, entity: &E, accessor: &A, reason: UpdateReason) -> Result<()>
    where
        E: Entity + ?Sized,
        A: Accessor<E, Value = T>,
    {
        let context = entity.context();
        let label = PropertyLabel::new(entity, accessor);

        let scope = context.open_evaluation(&label, reason);
        let outcome = accessor.get(entity);
        let recorded = scope.close();

        tracing::trace!(property = %label, ok = outcome.is_ok(), "evaluation completed");

        let (removed, added, is_constant) = self.with_data(entity, accessor, "update", |data| {
            data.evaluating = false;
            let recorded = recorded?;

            let dependencies: IndexSet<Dependency> = recorded.into_iter().collect();
            let removed: SmallVec<[Dependency; 4]> = data
                .dependencies
                .iter()
                .filter(|dependency| !dependencies.contains(*dependency))
                .copied()
                .collect();
            let added: SmallVec<[Dependency; 4]> = dependencies
                .iter()
                .filter(|dependency| !data.dependencies.contains(*dependency))
                .copied()
                .collect();

            data.dependencies = dependencies;
            data.cached = Some(outcome);
            data.modified_dependencies = false;

            Ok::<_, TrackingError>((removed, added, data.dependencies.is_empty()))
        })??;

        let ourselves = Subscriber::new(entity.handle(), accessor.index());

        for dependency in removed {
            context.unsubscribe(dependency, ourselves)?;
        }
        for dependency in added {
            context.subscribe(dependency, ourselves)?;
        }

        if is_constant {
            tracing::debug!(property = %label, "no dependencies after update, scheduling relaxation");
            context.schedule_for_relaxation(ourselves);
        }

        Ok(())
    }

    /// Handle a notification from a dependency or from the context.
    pub fn notify<E, A>(&self, entity: &E, accessor: &A, notification: Notification) -> Result<()>
    where
        E: Entity + ?Sized,
        A: Accessor<E, Value = T>,
    {
        if notification == Notification::RelaxIfAppropriate {
            return self.relax_if_appropriate(entity, accessor);
        }

        let mut data = self.data.borrow_mut();
        let Some(tracking) = data.as_mut() else {
            return Err(InvariantViolation::NotifyWithoutData {
                property: PropertyLabel::new(entity, accessor).to_string(),
                notification,
            }
            .into());
        };

        if notification == Notification::Stale {
            tracking.stale_dependencies += 1;
            let first = tracking.stale_dependencies == 1;
            drop(data);

            // Fan-in from several stale dependencies broadcasts once.
            if first {
                self.ensure_known_as_stale(entity, accessor)?;
            }
            return Ok(());
        }

        if tracking.stale_dependencies == 0 {
            return Err(InvariantViolation::UnbalancedReady {
                property: PropertyLabel::new(entity, accessor).to_string(),
            }
            .into());
        }
        if notification == Notification::ReadyModified {
            tracking.modified_dependencies = true;
        }
        tracking.stale_dependencies -= 1;
        if tracking.stale_dependencies > 0 {
            return Ok(());
        }
        let modified = tracking.modified_dependencies;
        drop(data);

        if modified {
            self.schedule_refresh(entity, accessor)?;
        }
        self.ensure_known_as_stable(entity, accessor, modified)
    }

    /// Recomputing happens in the reaction phase only.
    fn schedule_refresh<E, A>(&self, entity: &E, accessor: &A) -> Result<()>
    where
        E: Entity + ?Sized,
        A: Accessor<E, Value = T>,
    {
        tracing::trace!(property = %PropertyLabel::new(entity, accessor), "modified dependencies after stabilization");

        let target = Subscriber::new(entity.handle(), accessor.index());
        entity.context().schedule_or_run_reaction(Box::new(move |context: &TrackingContext| {
            context.update(target, UpdateReason::DependenciesStabilized)
        }))
    }

    fn ensure_known_as_stale<E, A>(&self, entity: &E, accessor: &A) -> Result<()>
    where
        E: Entity + ?Sized,
        A: Accessor<E, Value = T>,
    {
        let subscribers = self.with_data(entity, accessor, "stale broadcast", |data| {
            if data.known_stale {
                return None;
            }
            data.known_stale = true;
            Some(data.subscriber_snapshot())
        })?;

        match subscribers {
            Some(subscribers) => self.broadcast(entity, accessor, subscribers, Notification::Stale),
            None => Ok(()),
        }
    }

    fn ensure_known_as_stable<E, A>(&self, entity: &E, accessor: &A, modified: bool) -> Result<()>
    where
        E: Entity + ?Sized,
        A: Accessor<E, Value = T>,
    {
        let subscribers = self.with_data(entity, accessor, "ready broadcast", |data| {
            if !data.known_stale {
                return None;
            }
            data.known_stale = false;
            Some(data.subscriber_snapshot())
        })?;

        let notification = if modified {
            Notification::ReadyModified
        } else {
            Notification::ReadyUnmodified
        };

        match subscribers {
            Some(subscribers) => self.broadcast(entity, accessor, subscribers, notification),
            None => Ok(()),
        }
    }

    fn broadcast<E, A>(
        &self,
        entity: &E,
        accessor: &A,
        subscribers: SubscriberSnapshot,
        notification: Notification,
    ) -> Result<()>
    where
        E: Entity + ?Sized,
        A: Accessor<E, Value = T>,
    {
        tracing::trace!(
            property = %PropertyLabel::new(entity, accessor),
            %notification,
            subscribers = subscribers.len(),
            "broadcasting to subscribers"
        );

        let context = entity.context();
        for subscriber in subscribers {
            context.notify(subscriber, notification)?;
        }
        Ok(())
    }

    fn relax_if_appropriate<E, A>(&self, entity: &E, accessor: &A) -> Result<()>
    where
        E: Entity + ?Sized,
        A: Accessor<E, Value = T>,
    {
        let dependencies = {
            let mut data = self.data.borrow_mut();
            match data.as_ref() {
                // Already relaxed; the queue may hold the same edge twice.
                None => return Ok(()),
                Some(tracking) if !tracking.subscribers.is_empty() => return Ok(()),
                Some(_) => {}
            }
            data.take().map(|tracking| tracking.dependencies).unwrap_or_default()
        };

        tracing::debug!(property = %PropertyLabel::new(entity, accessor), "indeed relaxing");

        let context = entity.context();
        let ourselves = Subscriber::new(entity.handle(), accessor.index());
        for dependency in dependencies {
            context.unsubscribe(dependency, ourselves)?;
        }
        Ok(())
    }

    /// Add a subscriber, starting to track (and evaluating) the property if
    /// it wasn't tracked yet.
    pub fn subscribe<E, A>(&self, entity: &E, accessor: &A, subscriber: Subscriber) -> Result<()>
    where
        E: Entity + ?Sized,
        A: Accessor<E, Value = T>,
    {
        entity.context().batched(|| {
            let fresh = {
                let mut data = self.data.borrow_mut();
                if data.is_none() {
                    *data = Some(TrackingData::new());
                    true
                } else {
                    false
                }
            };

            if fresh {
                self.update(entity, accessor, UpdateReason::Subscribed)?;
            }

            self.with_data(entity, accessor, "subscribe", |data| {
                data.subscribers.insert(subscriber);
            })
        })
    }

    /// Remove a subscriber. Losing the last one queues a relaxation check
    /// that runs once the current batch has settled.
    pub fn unsubscribe<E, A>(&self, entity: &E, accessor: &A, subscriber: Subscriber) -> Result<()>
    where
        E: Entity + ?Sized,
        A: Accessor<E, Value = T>,
    {
        let now_unobserved = match self.data.borrow_mut().as_mut() {
            Some(data) => {
                data.subscribers.shift_remove(&subscriber);
                data.subscribers.is_empty()
            }
            None => {
                return Err(InvariantViolation::UnsubscribeWithoutData {
                    property: PropertyLabel::new(entity, accessor).to_string(),
                }
                .into())
            }
        };

        if now_unobserved {
            tracing::trace!(property = %PropertyLabel::new(entity, accessor), "last subscriber gone, scheduling for relaxation");
            entity
                .context()
                .schedule_for_relaxation(Subscriber::new(entity.handle(), accessor.index()));
        }
        Ok(())
    }
}

impl<T> Default for TrackingProperty<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for TrackingProperty<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.data.borrow();
        let mut debug = f.debug_struct("TrackingProperty");
        debug.field("tracked", &data.is_some());
        if let Some(data) = data.as_ref() {
            debug
                .field("stale_dependencies", &data.stale_dependencies)
                .field("modified_dependencies", &data.modified_dependencies)
                .field("dependencies", &data.dependencies.len())
                .field("subscribers", &data.subscribers.len());
        }
        debug.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    struct Probe {
        id: EntityId,
        context: Rc<TrackingContext>,
        value: RefCell<i32>,
    }

    struct Slot;

    impl Accessor<Probe> for Slot {
        type Value = i32;

        fn property_name(&self) -> Option<&str> {
            Some("slot")
        }

        fn index(&self) -> usize {
            0
        }

        fn is_variable(&self) -> bool {
            true
        }

        fn get(&self, probe: &Probe) -> Result<i32> {
            Ok(*probe.value.borrow())
        }

        fn set(&self, probe: &Probe, value: i32) -> Result<()> {
            *probe.value.borrow_mut() = value;
            Ok(())
        }
    }

    impl Entity for Probe {
        fn handle(&self) -> EntityId {
            self.id
        }

        fn context(&self) -> &TrackingContext {
            &self.context
        }
    }

    fn probe() -> Probe {
        Probe {
            id: EntityId::new(),
            context: Rc::new(TrackingContext::new()),
            value: RefCell::new(1),
        }
    }

    #[test]
    fn label_falls_back_to_the_handle() {
        let probe = probe();
        let label = PropertyLabel::new(&probe, &Slot).to_string();
        assert_eq!(label, format!("{}.slot", probe.id));
    }

    #[test]
    fn untracked_write_goes_straight_through() {
        let probe = probe();
        let property = TrackingProperty::new();

        property.set(&probe, &Slot, 9).unwrap();
        assert_eq!(property.get(&probe, &Slot).unwrap(), 9);
        assert!(!property.is_tracked());
    }

    #[test]
    fn relaxing_an_untracked_property_is_a_no_op() {
        let probe = probe();
        let property = TrackingProperty::<i32>::new();
        property
            .notify(&probe, &Slot, Notification::RelaxIfAppropriate)
            .unwrap();
        assert!(!property.is_tracked());
    }

    #[test]
    fn notifications_need_tracking_data() {
        let probe = probe();
        let property = TrackingProperty::<i32>::new();

        let err = property
            .notify(&probe, &Slot, Notification::Stale)
            .unwrap_err();
        assert!(matches!(
            err,
            TrackingError::Invariant(InvariantViolation::NotifyWithoutData { .. })
        ));

        let err = property
            .unsubscribe(&probe, &Slot, Subscriber::new(EntityId::new(), 0))
            .unwrap_err();
        assert!(matches!(
            err,
            TrackingError::Invariant(InvariantViolation::UnsubscribeWithoutData { .. })
        ));
    }

    #[test]
    fn staleness_is_counted_per_dependency() {
        let probe = probe();
        let property = TrackingProperty::<i32>::new();
        let subscriber = Subscriber::new(EntityId::new(), 0);
        property.subscribe(&probe, &Slot, subscriber).unwrap();

        property.notify(&probe, &Slot, Notification::Stale).unwrap();
        property.notify(&probe, &Slot, Notification::Stale).unwrap();
        let snapshot = property.snapshot(None);
        assert_eq!(snapshot.stale_dependencies, 2);
        assert!(snapshot.known_stale);
        assert_eq!(snapshot.subscribers, vec![subscriber]);

        property
            .notify(&probe, &Slot, Notification::ReadyUnmodified)
            .unwrap();
        assert!(property.snapshot(None).known_stale);

        property
            .notify(&probe, &Slot, Notification::ReadyUnmodified)
            .unwrap();
        let snapshot = property.snapshot(None);
        assert_eq!(snapshot.stale_dependencies, 0);
        assert!(!snapshot.known_stale);
        assert!(!snapshot.modified_dependencies);

        let err = property
            .notify(&probe, &Slot, Notification::ReadyModified)
            .unwrap_err();
        assert!(matches!(
            err,
            TrackingError::Invariant(InvariantViolation::UnbalancedReady { .. })
        ));
    }

    #[test]
    fn subscribing_evaluates_once() {
        let probe = probe();
        let property = TrackingProperty::<i32>::new();
        property
            .subscribe(&probe, &Slot, Subscriber::new(EntityId::new(), 0))
            .unwrap();
        property
            .subscribe(&probe, &Slot, Subscriber::new(EntityId::new(), 0))
            .unwrap();

        let snapshot = property.snapshot(None);
        assert!(snapshot.has_value);
        assert_eq!(snapshot.subscribers.len(), 2);
        assert!(snapshot.dependencies.is_empty());
    }
}
