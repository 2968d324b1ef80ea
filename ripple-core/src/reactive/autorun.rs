//! Autorun Implementation
//!
//! An Autorun is a side-effecting computation that runs whenever something it
//! read was modified.
//!
//! # How Autoruns Work
//!
//! 1. When created, the autorun runs its action immediately inside a tracked
//!    evaluation, and subscribes to everything the action read.
//!
//! 2. Dependencies tell it when they go stale and when they are ready again.
//!    Once every stale dependency is ready and at least one of them reported
//!    a modification, a re-run is queued for the reaction phase.
//!
//! 3. Each run records dependencies afresh; subscriptions are rewired to
//!    match, so branches not taken stop triggering re-runs.
//!
//! # Differences from Eval
//!
//! - Evals return a value; autoruns do not.
//! - Evals are lazy (compute on access); autoruns are eager.
//! - Nothing can subscribe to an autorun, so it is never relaxed. It stays
//!   subscribed until it is disposed or dropped.
//!
//! # Failures
//!
//! An evaluation error returned by the action is contained: it is logged and
//! kept in [`Autorun::last_error`], and the autorun keeps running on later
//! changes. Engine errors (cycles, broken invariants) still propagate.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexSet;

use crate::tracking::{
    Dependency, Entity, EntityId, EvaluationRecord, InvariantViolation, Notification, Result,
    Subscriber, TrackingContext, TrackingError, TrackingSubscriber, UpdateReason,
};

use super::Trackable;

type Action = Box<dyn FnMut() -> Result<()>>;

#[derive(Debug, Default)]
struct RunState {
    dependencies: IndexSet<Dependency>,
    stale_dependencies: usize,
    modified_dependencies: bool,
    disposed: bool,
    runs: usize,
    last_error: Option<TrackingError>,
}

/// The entity behind an [`Autorun`].
struct AutorunEntity {
    id: EntityId,
    name: Option<String>,
    context: Rc<TrackingContext>,
    action: RefCell<Action>,
    state: RefCell<RunState>,
}

impl AutorunEntity {
    fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.id.to_string(),
        }
    }

    fn ourselves(&self) -> Subscriber {
        Subscriber::new(self.id, 0)
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index == 0 {
            Ok(())
        } else {
            Err(InvariantViolation::UnknownIndex {
                entity: self.label(),
                index,
            }
            .into())
        }
    }

    /// Run the action once, tracking what it reads.
    fn run(&self, reason: UpdateReason) -> Result<()> {
        let label = self.label();
        let context = &self.context;

        let outcome = context.batched(|| {
            let (result, recorded) = {
                let mut action = self.action.try_borrow_mut().map_err(|_| {
                    TrackingError::CyclicEvaluation {
                        property: label.clone(),
                    }
                })?;

                let scope = context.open_evaluation(&label, reason);
                let result = (*action)();
                (result, scope.close())
            };

            let recorded = recorded?;
            let disposed = {
                let mut state = self.state.borrow_mut();
                state.runs += 1;
                state.disposed
            };

            // Disposed from inside the action: keep no subscriptions.
            if disposed {
                tracing::trace!(autorun = %label, "disposed during its own run");
            } else {
                self.rectify(recorded)?;
            }
            Ok(result)
        })?;

        match outcome {
            Ok(()) => {
                self.state.borrow_mut().last_error = None;
                Ok(())
            }
            Err(err) if err.is_evaluation() => {
                tracing::warn!(autorun = %label, error = %err, "autorun action failed");
                self.state.borrow_mut().last_error = Some(err);
                Ok(())
            }
            Err(err) => {
                self.state.borrow_mut().last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Rewire subscriptions to match the dependencies of the last run.
    fn rectify(&self, recorded: EvaluationRecord) -> Result<()> {
        let dependencies: IndexSet<Dependency> = recorded.into_iter().collect();

        let (removed, added): (Vec<Dependency>, Vec<Dependency>) = {
            let mut state = self.state.borrow_mut();
            let removed = state
                .dependencies
                .iter()
                .filter(|dependency| !dependencies.contains(*dependency))
                .copied()
                .collect();
            let added = dependencies
                .iter()
                .filter(|dependency| !state.dependencies.contains(*dependency))
                .copied()
                .collect();
            state.dependencies = dependencies;
            (removed, added)
        };

        let ourselves = self.ourselves();
        for dependency in removed {
            self.context.unsubscribe(dependency, ourselves)?;
        }
        for dependency in added {
            self.context.subscribe(dependency, ourselves)?;
        }
        Ok(())
    }

    fn dispose(&self) -> Result<()> {
        let dependencies = {
            let mut state = self.state.borrow_mut();
            if state.disposed {
                return Ok(());
            }
            state.disposed = true;
            std::mem::take(&mut state.dependencies)
        };

        tracing::debug!(autorun = %self.label(), dependencies = dependencies.len(), "disposing autorun");

        let ourselves = self.ourselves();
        self.context.batched(|| {
            for dependency in dependencies {
                self.context.unsubscribe(dependency, ourselves)?;
            }
            Ok(())
        })
    }
}

impl Entity for AutorunEntity {
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

impl TrackingSubscriber for AutorunEntity {
    fn notify(&self, index: usize, notification: Notification) -> Result<()> {
        self.check_index(index)?;

        let rerun = {
            let mut state = self.state.borrow_mut();
            if state.disposed {
                return Ok(());
            }

            match notification {
                Notification::Stale => {
                    state.stale_dependencies += 1;
                    false
                }
                Notification::ReadyUnmodified | Notification::ReadyModified => {
                    if state.stale_dependencies == 0 {
                        return Err(InvariantViolation::UnbalancedReady {
                            property: self.label(),
                        }
                        .into());
                    }
                    if notification == Notification::ReadyModified {
                        state.modified_dependencies = true;
                    }
                    state.stale_dependencies -= 1;
                    state.stale_dependencies == 0 && state.modified_dependencies
                }
                Notification::RelaxIfAppropriate => false,
            }
        };

        if rerun {
            tracing::trace!(autorun = %self.label(), "dependencies stabilized, scheduling a re-run");
            let target = self.ourselves();
            self.context
                .schedule_or_run_reaction(Box::new(move |context: &TrackingContext| {
                    context.update(target, UpdateReason::DependenciesStabilized)
                }))?;
        }
        Ok(())
    }

    fn update(&self, index: usize, reason: UpdateReason) -> Result<()> {
        self.check_index(index)?;

        {
            let mut state = self.state.borrow_mut();
            if state.disposed {
                return Ok(());
            }
            if reason == UpdateReason::DependenciesStabilized && !state.modified_dependencies {
                return Ok(());
            }
            state.modified_dependencies = false;
        }

        self.run(reason)
    }

    fn property_name(&self, _index: usize) -> Option<&str> {
        None
    }
}

impl Drop for AutorunEntity {
    fn drop(&mut self) {
        self.context.unregister(self.id);
    }
}

/// A side-effecting computation that re-runs when what it read changes.
///
/// Dropping the handle disposes the autorun.
///
/// # Example
///
/// ```rust
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use ripple_core::reactive::{Autorun, Var};
///
/// let count = Var::new(0);
/// let seen = Rc::new(Cell::new(0));
///
/// let _autorun = {
///     let (count, seen) = (count.clone(), seen.clone());
///     Autorun::new(move || {
///         seen.set(count.get()?);
///         Ok(())
///     })?
/// };
///
/// count.set(5)?;
/// assert_eq!(seen.get(), 5);
/// # Ok::<(), ripple_core::tracking::TrackingError>(())
/// ```
pub struct Autorun {
    inner: Rc<AutorunEntity>,
}

impl Autorun {
    /// Create an autorun in the current thread's context and run it once.
    pub fn new<F>(action: F) -> Result<Self>
    where
        F: FnMut() -> Result<()> + 'static,
    {
        Self::new_in(&TrackingContext::current(), None, action)
    }

    /// Create a named autorun in the current thread's context.
    pub fn named<F>(name: impl Into<String>, action: F) -> Result<Self>
    where
        F: FnMut() -> Result<()> + 'static,
    {
        Self::new_in(&TrackingContext::current(), Some(name.into()), action)
    }

    /// Create an autorun in an explicit context and run it once.
    ///
    /// Fails if the first run hits an engine error. An evaluation error from
    /// the action is kept in [`last_error`](Self::last_error) instead.
    pub fn new_in<F>(context: &Rc<TrackingContext>, name: Option<String>, action: F) -> Result<Self>
    where
        F: FnMut() -> Result<()> + 'static,
    {
        let inner = Rc::new(AutorunEntity {
            id: EntityId::new(),
            name,
            context: Rc::clone(context),
            action: RefCell::new(Box::new(action)),
            state: RefCell::new(RunState::default()),
        });

        let entity = Rc::downgrade(&inner) as Weak<dyn TrackingSubscriber>;
        context.register(inner.id, entity);

        let autorun = Self { inner };
        autorun.inner.run(UpdateReason::Requested)?;
        Ok(autorun)
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

    /// How many times the action has run.
    pub fn run_count(&self) -> usize {
        self.inner.state.borrow().runs
    }

    /// The error returned by the most recent run, if it failed.
    pub fn last_error(&self) -> Option<TrackingError> {
        self.inner.state.borrow().last_error.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.state.borrow().disposed
    }

    pub fn dependencies(&self) -> Vec<Dependency> {
        self.inner.state.borrow().dependencies.iter().copied().collect()
    }

    /// Unsubscribe from every dependency and stop running.
    pub fn dispose(&self) -> Result<()> {
        self.inner.dispose()
    }
}

impl Drop for Autorun {
    fn drop(&mut self) {
        if let Err(err) = self.inner.dispose() {
            tracing::warn!(autorun = %self.inner.label(), error = %err, "failed to dispose dropped autorun");
        }
    }
}

impl fmt::Debug for Autorun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Autorun")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("runs", &state.runs)
            .field("dependencies", &state.dependencies.len())
            .field("disposed", &state.disposed)
            .finish()
    }
}

/// Call `callback` with the fresh result of `source` every time it is
/// modified.
///
/// The source is read once right away to start tracking it, without calling
/// the callback. Evaluation errors are handed to the callback like values;
/// engine errors fail the watch. The callback itself runs untracked.
pub fn watch<T, S, F>(source: S, mut callback: F) -> Result<Autorun>
where
    T: 'static,
    S: Trackable<T> + 'static,
    F: FnMut(Result<T>) + 'static,
{
    let context = Rc::clone(source.context());
    let name = format!("watch({})", source.id());
    let mut first = true;

    Autorun::new_in(&context, Some(name), move || {
        let value = source.get();
        if let Err(err) = &value {
            if !err.is_evaluation() {
                return Err(err.clone());
            }
        }

        if std::mem::take(&mut first) {
            return Ok(());
        }

        source.context().untracked(|| callback(value));
        Ok(())
    })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
