//! Eval Implementation
//!
//! An Eval is a read-only computed cell derived from a function over other
//! trackables.
//!
//! # How Evals Work
//!
//! 1. While nobody observes an eval, reading it just calls the function.
//!    There is no cache and no bookkeeping.
//!
//! 2. Once the eval is read inside another evaluation or gains a subscriber,
//!    it caches its result (value or error) and the dependencies the function
//!    read.
//!
//! 3. When a dependency changes, the eval is marked stale and recomputes in
//!    the reaction phase after the outermost batch closes, or earlier if it
//!    is read first.
//!
//! 4. An eval whose function reads no tracked state can never go stale, so it
//!    drops its tracking data again as soon as nobody subscribes to it.

use std::fmt::Debug;
use std::rc::{Rc, Weak};

use crate::tracking::{
    Accessor, Entity, EntityId, InvariantViolation, Notification, PropertyLabel, PropertySnapshot,
    Result, Subscriber, TrackableObject, TrackingContext, TrackingProperty, TrackingSubscriber,
    UpdateReason,
};

use super::Trackable;

type Evaluation<T> = Box<dyn Fn() -> Result<T>>;

/// The entity behind an [`Eval`].
struct TrackableEvaluation<T> {
    id: EntityId,
    name: Option<String>,
    context: Rc<TrackingContext>,
    property: TrackingProperty<T>,
    evaluation: Evaluation<T>,
}

/// Accessor of the single computed slot of an evaluation.
struct EvaluationSlot;

impl<T: Clone> Accessor<TrackableEvaluation<T>> for EvaluationSlot {
    type Value = T;

    fn property_name(&self) -> Option<&str> {
        None
    }

    fn index(&self) -> usize {
        0
    }

    fn is_variable(&self) -> bool {
        false
    }

    fn get(&self, owner: &TrackableEvaluation<T>) -> Result<T> {
        (owner.evaluation)()
    }

    fn set(&self, owner: &TrackableEvaluation<T>, _value: T) -> Result<()> {
        Err(InvariantViolation::AssignToComputed {
            property: PropertyLabel::new(owner, self).to_string(),
        }
        .into())
    }
}

impl<T> TrackableEvaluation<T> {
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

impl<T> Entity for TrackableEvaluation<T> {
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

impl<T: Clone + 'static> TrackingSubscriber for TrackableEvaluation<T> {
    fn notify(&self, index: usize, notification: Notification) -> Result<()> {
        self.check_index(index)?;
        self.property.notify(self, &EvaluationSlot, notification)
    }

    fn update(&self, index: usize, reason: UpdateReason) -> Result<()> {
        self.check_index(index)?;
        self.property.update(self, &EvaluationSlot, reason)
    }

    fn property_name(&self, _index: usize) -> Option<&str> {
        None
    }

    fn as_trackable(&self) -> Option<&dyn TrackableObject> {
        Some(self)
    }
}

impl<T: Clone + 'static> TrackableObject for TrackableEvaluation<T> {
    fn subscribe(&self, index: usize, subscriber: Subscriber) -> Result<()> {
        self.check_index(index)?;
        self.property.subscribe(self, &EvaluationSlot, subscriber)
    }

    fn unsubscribe(&self, index: usize, subscriber: Subscriber) -> Result<()> {
        self.check_index(index)?;
        self.property.unsubscribe(self, &EvaluationSlot, subscriber)
    }
}

impl<T> Drop for TrackableEvaluation<T> {
    fn drop(&mut self) {
        self.context.unregister(self.id);
        self.property.detach(self, 0);
    }
}

/// A read-only computed cell.
///
/// The function returns a [`Result`]; an error is cached just like a value
/// and handed to every reader until a dependency changes.
///
/// # Example
///
/// ```rust
/// use ripple_core::reactive::{Eval, Var};
///
/// let a = Var::new(1);
/// let b = Var::new(2);
/// let sum = {
///     let (a, b) = (a.clone(), b.clone());
///     Eval::new(move || Ok(a.get()? + b.get()?))
/// };
///
/// a.set(10)?;
/// assert_eq!(sum.get()?, 12);
/// # Ok::<(), ripple_core::tracking::TrackingError>(())
/// ```
pub struct Eval<T>
where
    T: Clone + 'static,
{
    inner: Rc<TrackableEvaluation<T>>,
}

impl<T> Eval<T>
where
    T: Clone + 'static,
{
    /// Create an unnamed eval in the current thread's context.
    ///
    /// The function is not run until the eval is first read.
    pub fn new<F>(evaluation: F) -> Self
    where
        F: Fn() -> Result<T> + 'static,
    {
        Self::new_in(&TrackingContext::current(), None, evaluation)
    }

    /// Create a named eval in the current thread's context.
    pub fn named<F>(name: impl Into<String>, evaluation: F) -> Self
    where
        F: Fn() -> Result<T> + 'static,
    {
        Self::new_in(&TrackingContext::current(), Some(name.into()), evaluation)
    }

    /// Create an eval in an explicit context.
    pub fn new_in<F>(context: &Rc<TrackingContext>, name: Option<String>, evaluation: F) -> Self
    where
        F: Fn() -> Result<T> + 'static,
    {
        let inner = Rc::new(TrackableEvaluation {
            id: EntityId::new(),
            name,
            context: Rc::clone(context),
            property: TrackingProperty::new(),
            evaluation: Box::new(evaluation),
        });

        let entity = Rc::downgrade(&inner) as Weak<dyn TrackingSubscriber>;
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

    /// Get the current result, recomputing if necessary.
    pub fn get(&self) -> Result<T> {
        self.inner.property.get(&*self.inner, &EvaluationSlot)
    }

    /// Get the current result without recording a dependency.
    pub fn get_untracked(&self) -> Result<T> {
        self.inner.context.untracked(|| self.get())
    }

    /// Whether the eval currently carries tracking data.
    pub fn is_tracked(&self) -> bool {
        self.inner.property.is_tracked()
    }

    pub fn snapshot(&self) -> PropertySnapshot {
        self.inner.property.snapshot(self.inner.name.clone())
    }
}

impl<T> Clone for Eval<T>
where
    T: Clone + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Trackable<T> for Eval<T>
where
    T: Clone + 'static,
{
    fn get(&self) -> Result<T> {
        Eval::get(self)
    }

    fn id(&self) -> EntityId {
        Eval::id(self)
    }

    fn context(&self) -> &Rc<TrackingContext> {
        Eval::context(self)
    }
}

impl<T> Debug for Eval<T>
where
    T: Clone + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Eval")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("property", &self.inner.property)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
