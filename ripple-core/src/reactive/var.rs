//! Var Implementation
//!
//! A Var is a read-write trackable cell: the fundamental source of change in
//! the observation graph.
//!
//! # How Vars Work
//!
//! 1. Reading a var outside any evaluation just clones the stored value.
//!    Nothing is allocated and nothing is recorded.
//!
//! 2. Reading a var inside an evaluation (a computed [`Eval`](super::Eval)
//!    or an [`Autorun`](super::Autorun)) records the var as a dependency and
//!    starts tracking it.
//!
//! 3. Writing a different value to a tracked var tells its subscribers it is
//!    stale, stores the value, then tells them it is ready and modified.
//!    Writing an equal value is silent.

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use crate::tracking::{
    Accessor, Entity, EntityId, InvariantViolation, Notification, PropertySnapshot, Result,
    Subscriber, TrackableObject, TrackingContext, TrackingProperty, TrackingSubscriber,
    UpdateReason,
};

use super::{Trackable, WritableTrackable};

/// The entity behind a [`Var`].
struct TrackableVariable<T> {
    id: EntityId,
    name: Option<String>,
    context: Rc<TrackingContext>,
    property: TrackingProperty<T>,
    value: RefCell<T>,
}

/// Raw storage accessor of the single slot of a variable.
struct VariableSlot;

impl<T: Clone> Accessor<TrackableVariable<T>> for VariableSlot {
    type Value = T;

    fn property_name(&self) -> Option<&str> {
        None
    }

    fn index(&self) -> usize {
        0
    }

    fn is_variable(&self) -> bool {
        true
    }

    fn get(&self, owner: &TrackableVariable<T>) -> Result<T> {
        Ok(owner.value.borrow().clone())
    }

    fn set(&self, owner: &TrackableVariable<T>, value: T) -> Result<()> {
        *owner.value.borrow_mut() = value;
        Ok(())
    }
}

impl<T> TrackableVariable<T> {
    fn check_index(&self, index: usize) -> Result<()> {
        if index == 0 {
            Ok(())
        } else {
            Err(InvariantViolation::UnknownIndex {
                entity: self.id.to_string(),
                index,
            }
            .into())
        }
    }
}

impl<T> Entity for TrackableVariable<T> {
    fn handle(&self) -> EntityId {
        self.id
    }

    fn context(&self) -> &TrackingContext {
        &self.context
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl<T: Clone + PartialEq + 'static> TrackingSubscriber for TrackableVariable<T> {
    fn notify(&self, index: usize, notification: Notification) -> Result<()> {
        self.check_index(index)?;
        self.property.notify(self, &VariableSlot, notification)
    }

    fn update(&self, index: usize, reason: UpdateReason) -> Result<()> {
        self.check_index(index)?;
        self.property.update(self, &VariableSlot, reason)
    }

    fn property_name(&self, _index: usize) -> Option<&str> {
        None
    }

    fn as_trackable(&self) -> Option<&dyn TrackableObject> {
        Some(self)
    }
}

impl<T: Clone + PartialEq + 'static> TrackableObject for TrackableVariable<T> {
    fn subscribe(&self, index: usize, subscriber: Subscriber) -> Result<()> {
        self.check_index(index)?;
        self.property.subscribe(self, &VariableSlot, subscriber)
    }

    fn unsubscribe(&self, index: usize, subscriber: Subscriber) -> Result<()> {
        self.check_index(index)?;
        self.property.unsubscribe(self, &VariableSlot, subscriber)
    }
}

impl<T> Drop for TrackableVariable<T> {
    fn drop(&mut self) {
        self.context.unregister(self.id);
        self.property.detach(self, 0);
    }
}

/// A read-write trackable cell holding a value of type `T`.
///
/// # Type Parameters
///
/// - `T`: The stored value. `PartialEq` decides whether a write is a change.
///
/// # Example
///
/// ```rust
/// use ripple_core::reactive::Var;
///
/// let count = Var::new(0);
/// count.set(5)?;
/// assert_eq!(count.get()?, 5);
/// # Ok::<(), ripple_core::tracking::TrackingError>(())
/// ```
pub struct Var<T>
where
    T: Clone + PartialEq + 'static,
{
    inner: Rc<TrackableVariable<T>>,
}

impl<T> Var<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Create an unnamed var in the current thread's context.
    pub fn new(value: T) -> Self {
        Self::new_in(&TrackingContext::current(), None, value)
    }

    /// Create a named var in the current thread's context.
    pub fn named(name: impl Into<String>, value: T) -> Self {
        Self::new_in(&TrackingContext::current(), Some(name.into()), value)
    }

    /// Create a var in an explicit context.
    pub fn new_in(context: &Rc<TrackingContext>, name: Option<String>, value: T) -> Self {
        let inner = Rc::new(TrackableVariable {
            id: EntityId::new(),
            name,
            context: Rc::clone(context),
            property: TrackingProperty::new(),
            value: RefCell::new(value),
        });

        let entity: Weak<dyn TrackingSubscriber> = Rc::downgrade(&inner) as Weak<dyn TrackingSubscriber>;
        context.register(inner.id, entity);

        Self { inner }
    }

    pub fn id(&self) -> EntityId {
        self.inner.id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn context(&self) -> &Rc<TrackingContext> {
        &self.inner.context
    }

    /// Read the value, recording a dependency if an evaluation is running.
    pub fn get(&self) -> Result<T> {
        self.inner.property.get(&*self.inner, &VariableSlot)
    }

    /// Read the value without recording a dependency.
    pub fn get_untracked(&self) -> Result<T> {
        self.inner.context.untracked(|| self.get())
    }

    /// Write a new value, notifying dependents if it differs.
    pub fn set(&self, value: T) -> Result<()> {
        self.inner.property.set(&*self.inner, &VariableSlot, value)
    }

    /// Write a value derived from the current one.
    pub fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&T) -> T,
    {
        let current = self.get_untracked()?;
        self.set(f(&current))
    }

    /// Whether the var currently carries tracking data.
    pub fn is_tracked(&self) -> bool {
        self.inner.property.is_tracked()
    }

    pub fn snapshot(&self) -> PropertySnapshot {
        self.inner.property.snapshot(self.inner.name.clone())
    }
}

impl<T> Clone for Var<T>
where
    T: Clone + PartialEq + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Trackable<T> for Var<T>
where
    T: Clone + PartialEq + 'static,
{
    fn get(&self) -> Result<T> {
        Var::get(self)
    }

    fn id(&self) -> EntityId {
        Var::id(self)
    }

    fn context(&self) -> &Rc<TrackingContext> {
        Var::context(self)
    }
}

impl<T> WritableTrackable<T> for Var<T>
where
    T: Clone + PartialEq + 'static,
{
    fn set(&self, value: T) -> Result<()> {
        Var::set(self, value)
    }
}

impl<T> Debug for Var<T>
where
    T: Clone + PartialEq + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Var")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("value", &*self.inner.value.borrow())
            .field("property", &self.inner.property)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Batch;

    #[test]
    fn var_get_and_set() {
        let var = Var::new(0);
        assert_eq!(var.get().unwrap(), 0);

        var.set(42).unwrap();
        assert_eq!(var.get().unwrap(), 42);
    }

    #[test]
    fn var_update() {
        let var = Var::new(10);
        var.update(|v| v + 5).unwrap();
        assert_eq!(var.get().unwrap(), 15);
    }

    #[test]
    fn var_clone_shares_state() {
        let var1 = Var::new(0);
        let var2 = var1.clone();

        var1.set(42).unwrap();
        assert_eq!(var2.get().unwrap(), 42);
        assert_eq!(var1.id(), var2.id());
    }

    #[test]
    fn untracked_read_allocates_nothing() {
        let x = Var::new(5);
        assert_eq!(x.get().unwrap(), 5);
        assert!(!x.is_tracked());
        assert!(!x.snapshot().tracked);
    }

    #[test]
    fn read_inside_an_evaluation_tracks_until_the_batch_settles() {
        let context = Rc::new(TrackingContext::new());
        let x = Var::new_in(&context, Some("x".into()), 5);

        let batch = Batch::open(&context);
        let scope = context.open_evaluation("reader", UpdateReason::Requested);
        assert_eq!(x.get().unwrap(), 5);
        assert!(x.is_tracked());
        let record = scope.close().unwrap();

        assert_eq!(record.len(), 1);
        assert_eq!(record[0].entity, x.id());
        assert!(x.is_tracked());

        // Nobody subscribed, so the var relaxes once the batch settles.
        batch.close().unwrap();
        assert!(!x.is_tracked());
    }

    #[test]
    fn update_closure_may_write_the_same_var() {
        let x = Var::new(1);
        let y = x.clone();

        x.update(|v| {
            y.set(*v + 100).unwrap();
            v + 1
        })
        .unwrap();

        assert_eq!(x.get().unwrap(), 2);
    }

    #[test]
    fn untracked_read_inside_an_evaluation_is_not_recorded() {
        let context = Rc::new(TrackingContext::new());
        let x = Var::new_in(&context, None, 5);

        let scope = context.open_evaluation("reader", UpdateReason::Requested);
        assert_eq!(x.get_untracked().unwrap(), 5);
        assert!(scope.close().unwrap().is_empty());
        assert!(!x.is_tracked());
    }

    #[test]
    fn dropping_the_last_handle_unregisters() {
        let context = Rc::new(TrackingContext::new());
        let var = Var::new_in(&context, None, 1);
        let id = var.id();
        assert!(context.resolve(id).is_some());

        drop(var);
        assert!(context.resolve(id).is_none());
        assert_eq!(context.entity_count(), 0);
    }

    #[test]
    fn unknown_index_is_rejected() {
        let context = Rc::new(TrackingContext::new());
        let var = Var::new_in(&context, None, 1);
        let entity = context.resolve(var.id()).unwrap();

        assert!(entity.update(3, UpdateReason::Requested).is_err());
    }

    #[test]
    fn named_var_reports_its_name() {
        let var = Var::named("count", 0);
        assert_eq!(var.name(), Some("count"));
        assert_eq!(var.snapshot().name.as_deref(), Some("count"));
    }
}
