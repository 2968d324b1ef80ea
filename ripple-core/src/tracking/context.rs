//! Tracking Context
//!
//! The context is the process-wide coordinator of the engine. It owns:
//!
//! - the evaluation stack, one record per evaluation currently running, plus
//!   `None` frames pushed by untracked sections;
//! - the batch depth counter;
//! - the reaction queue, drained to a fixpoint when the outermost batch
//!   closes;
//! - the relaxation queue, drained once the reactions have settled;
//! - the registry mapping entity handles to live entities, so edges can stay
//!   plain `(handle, index)` values.
//!
//! # Threading
//!
//! All state lives in `Cell`/`RefCell`, so a context is neither `Send` nor
//! `Sync`: one logical caller at a time, enforced by the compiler. Every
//! thread gets its own default context from [`TrackingContext::current`].

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;
use tracing::span::EnteredSpan;

use super::config::TrackingConfig;
use super::edge::{Dependency, EntityId, Subscriber};
use super::error::{InvariantViolation, Result, TrackingError};
use super::notification::{Notification, UpdateReason};
use super::object::TrackingSubscriber;

/// Dependencies discovered during one evaluation pass, in read order.
pub type EvaluationRecord = SmallVec<[Dependency; 8]>;

/// A deferred callback run in the reaction phase.
pub type Reaction = Box<dyn FnOnce(&TrackingContext) -> Result<()>>;

thread_local! {
    static CURRENT: Rc<TrackingContext> = Rc::new(TrackingContext::new());
}

/// The engine's shared coordination state.
pub struct TrackingContext {
    config: TrackingConfig,
    evaluations: RefCell<Vec<Option<EvaluationRecord>>>,
    batch_depth: Cell<usize>,
    reactions: RefCell<Vec<Reaction>>,
    relaxations: RefCell<VecDeque<Subscriber>>,
    running_reactions: Cell<bool>,
    registry: RefCell<HashMap<EntityId, Weak<dyn TrackingSubscriber>>>,
}

impl TrackingContext {
    pub fn new() -> Self {
        Self::with_config(TrackingConfig::default())
    }

    pub fn with_config(config: TrackingConfig) -> Self {
        Self {
            config,
            evaluations: RefCell::new(Vec::new()),
            batch_depth: Cell::new(0),
            reactions: RefCell::new(Vec::new()),
            relaxations: RefCell::new(VecDeque::new()),
            running_reactions: Cell::new(false),
            registry: RefCell::new(HashMap::new()),
        }
    }

    /// The calling thread's default context.
    pub fn current() -> Rc<TrackingContext> {
        CURRENT.with(Rc::clone)
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Evaluation scoping
    // ------------------------------------------------------------------

    /// True if the innermost frame is a tracked evaluation.
    pub fn is_evaluating(&self) -> bool {
        matches!(self.evaluations.borrow().last(), Some(Some(_)))
    }

    pub fn evaluation_depth(&self) -> usize {
        self.evaluations.borrow().len()
    }

    /// Open a tracked evaluation. Every tracked read until the scope closes
    /// is recorded as a dependency of it.
    pub fn open_evaluation(
        &self,
        agent: impl fmt::Display,
        reason: UpdateReason,
    ) -> EvaluationScope<'_> {
        let span = tracing::trace_span!("evaluation", agent = %agent, reason = %reason).entered();
        let mut stack = self.evaluations.borrow_mut();
        stack.push(Some(EvaluationRecord::new()));
        EvaluationScope {
            context: self,
            depth: stack.len(),
            closed: false,
            _span: span,
        }
    }

    /// Push an untracked frame: reads below it are not attributed to any
    /// enclosing evaluation.
    pub fn pause_evaluation(&self) -> PausedScope<'_> {
        self.evaluations.borrow_mut().push(None);
        PausedScope { context: self }
    }

    /// Run `f` with tracking paused.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _paused = self.pause_evaluation();
        f()
    }

    /// Record a read in the innermost evaluation.
    pub fn note_evaluation(&self, dependency: Dependency) -> Result<()> {
        match self.evaluations.borrow_mut().last_mut() {
            Some(Some(record)) => {
                record.push(dependency);
                Ok(())
            }
            _ => Err(InvariantViolation::NoteOutsideEvaluation.into()),
        }
    }

    fn pop_evaluation(&self, depth: usize) -> Result<EvaluationRecord> {
        let mut stack = self.evaluations.borrow_mut();
        if stack.len() != depth {
            return Err(InvariantViolation::UnbalancedScope("evaluation").into());
        }
        match stack.pop() {
            Some(Some(record)) => Ok(record),
            Some(None) => {
                stack.push(None);
                Err(InvariantViolation::UnbalancedScope("evaluation").into())
            }
            None => Err(InvariantViolation::UnbalancedScope("evaluation").into()),
        }
    }

    // ------------------------------------------------------------------
    // Batching
    // ------------------------------------------------------------------

    pub fn batch_depth(&self) -> usize {
        self.batch_depth.get()
    }

    pub fn is_in_batch(&self) -> bool {
        self.batch_depth.get() > 0
    }

    pub fn open_batch(&self) {
        let depth = self.batch_depth.get() + 1;
        self.batch_depth.set(depth);
        tracing::trace!(depth, "batch opened");
    }

    /// Close a batch. Closing the outermost one runs queued reactions to a
    /// fixpoint and then checks queued relaxations.
    pub fn close_batch(&self) -> Result<()> {
        let depth = self.batch_depth.get();
        if depth == 0 {
            return Err(InvariantViolation::UnbalancedScope("batch").into());
        }
        self.batch_depth.set(depth - 1);

        if depth > 1 {
            tracing::trace!(depth = depth - 1, "inner batch closed");
            return Ok(());
        }

        tracing::trace!("outermost batch closed, now running reactions");
        self.settle()
    }

    /// Drop one batch level without settling. Used while unwinding, where
    /// running user reactions could only make matters worse.
    pub(crate) fn abandon_batch(&self) {
        let depth = self.batch_depth.get();
        self.batch_depth.set(depth.saturating_sub(1));
        tracing::warn!(depth, "batch abandoned during unwinding");
    }

    /// Run `f` inside a batch. A fatal error from closing the batch wins over
    /// an evaluation failure returned by `f`.
    pub fn batched<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        self.open_batch();
        let result = f();
        let closed = self.close_batch();
        match (result, closed) {
            (result, Ok(())) => result,
            (Ok(_), Err(err)) => Err(err),
            (Err(err), Err(close_err)) => {
                if err.is_evaluation() {
                    Err(close_err)
                } else {
                    tracing::error!(error = %close_err, "closing batch failed after an earlier error");
                    Err(err)
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Reactions and relaxation
    // ------------------------------------------------------------------

    pub fn pending_reactions(&self) -> usize {
        self.reactions.borrow().len()
    }

    pub fn pending_relaxations(&self) -> usize {
        self.relaxations.borrow().len()
    }

    pub fn is_running_reactions(&self) -> bool {
        self.running_reactions.get()
    }

    /// Queue a reaction, and run the queue right away unless a batch is open
    /// or a drain is already in progress.
    pub fn schedule_or_run_reaction(&self, reaction: Reaction) -> Result<()> {
        self.reactions.borrow_mut().push(reaction);
        self.settle()
    }

    /// Queue a relaxation check for a property. Pure reaction sinks are
    /// skipped since nothing can subscribe to them.
    pub fn schedule_for_relaxation(&self, target: Subscriber) {
        let Some(entity) = self.resolve(target.entity) else {
            return;
        };
        if entity.as_trackable().is_none() {
            return;
        }
        tracing::trace!(target = %target, "scheduled for relaxation");
        self.relaxations.borrow_mut().push_back(target);
    }

    fn settle(&self) -> Result<()> {
        // A drain already running relaxes once its reactions are done.
        if self.is_in_batch() || self.running_reactions.get() {
            return Ok(());
        }

        self.run_reactions()?;
        tracing::trace!("reactions done, now relaxing");
        self.relax_scheduled()?;
        tracing::trace!("relaxing completed, batch finished");
        Ok(())
    }

    fn run_reactions(&self) -> Result<()> {
        self.running_reactions.set(true);
        let _drain = DrainGuard(&self.running_reactions);

        let cap = self.config.max_reaction_sweeps;
        let mut sweeps = 0;

        loop {
            let sweep = std::mem::take(&mut *self.reactions.borrow_mut());
            if sweep.is_empty() {
                return Ok(());
            }

            if sweeps == cap {
                self.reactions.borrow_mut().clear();
                tracing::error!(sweeps, "reactions didn't settle, giving up");
                return Err(TrackingError::ReactionCycle { sweeps });
            }
            sweeps += 1;

            tracing::debug!(sweep = sweeps, reactions = sweep.len(), "running reaction sweep");

            for reaction in sweep {
                if let Err(err) = reaction(self) {
                    self.reactions.borrow_mut().clear();
                    return Err(err);
                }
            }
        }
    }

    fn relax_scheduled(&self) -> Result<()> {
        loop {
            let next = self.relaxations.borrow_mut().pop_front();
            let Some(target) = next else {
                return Ok(());
            };
            self.notify(target, Notification::RelaxIfAppropriate)?;
        }
    }

    // ------------------------------------------------------------------
    // Entity registry and dispatch
    // ------------------------------------------------------------------

    /// Make an entity reachable through its handle.
    pub fn register(&self, id: EntityId, entity: Weak<dyn TrackingSubscriber>) {
        self.registry.borrow_mut().insert(id, entity);
    }

    pub fn unregister(&self, id: EntityId) {
        self.registry.borrow_mut().remove(&id);
    }

    pub fn resolve(&self, id: EntityId) -> Option<Rc<dyn TrackingSubscriber>> {
        let entity = self.registry.borrow().get(&id).and_then(Weak::upgrade);
        if entity.is_none() {
            tracing::trace!(entity = %id, "edge points at a dropped entity");
        }
        entity
    }

    pub fn entity_count(&self) -> usize {
        self.registry.borrow().len()
    }

    /// Deliver a notification along a subscriber edge.
    pub fn notify(&self, target: Subscriber, notification: Notification) -> Result<()> {
        match self.resolve(target.entity) {
            Some(entity) => entity.notify(target.index, notification),
            None => Ok(()),
        }
    }

    pub fn update(&self, target: Subscriber, reason: UpdateReason) -> Result<()> {
        match self.resolve(target.entity) {
            Some(entity) => entity.update(target.index, reason),
            None => Ok(()),
        }
    }

    pub fn subscribe(&self, dependency: Dependency, subscriber: Subscriber) -> Result<()> {
        let Some(entity) = self.resolve(dependency.entity) else {
            return Ok(());
        };
        match entity.as_trackable() {
            Some(object) => object.subscribe(dependency.index, subscriber),
            None => Err(not_trackable(dependency)),
        }
    }

    pub fn unsubscribe(&self, dependency: Dependency, subscriber: Subscriber) -> Result<()> {
        let Some(entity) = self.resolve(dependency.entity) else {
            return Ok(());
        };
        match entity.as_trackable() {
            Some(object) => object.unsubscribe(dependency.index, subscriber),
            None => Err(not_trackable(dependency)),
        }
    }
}

fn not_trackable(dependency: Dependency) -> TrackingError {
    InvariantViolation::UnknownIndex {
        entity: dependency.entity.to_string(),
        index: dependency.index,
    }
    .into()
}

impl Default for TrackingContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TrackingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingContext")
            .field("evaluation_depth", &self.evaluation_depth())
            .field("batch_depth", &self.batch_depth())
            .field("pending_reactions", &self.pending_reactions())
            .field("pending_relaxations", &self.pending_relaxations())
            .field("entities", &self.entity_count())
            .finish()
    }
}

struct DrainGuard<'a>(&'a Cell<bool>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Guard for an open evaluation.
///
/// [`close`](EvaluationScope::close) hands back the recorded dependencies.
/// Dropping the guard without closing discards them, which keeps the stack
/// balanced on early returns and unwinding.
pub struct EvaluationScope<'a> {
    context: &'a TrackingContext,
    depth: usize,
    closed: bool,
    _span: EnteredSpan,
}

impl EvaluationScope<'_> {
    pub fn close(mut self) -> Result<EvaluationRecord> {
        self.closed = true;
        self.context.pop_evaluation(self.depth)
    }
}

impl Drop for EvaluationScope<'_> {
    fn drop(&mut self) {
        if !self.closed {
            let mut stack = self.context.evaluations.borrow_mut();
            stack.truncate(self.depth - 1);
        }
    }
}

/// Guard for an untracked section; resumes tracking on drop.
pub struct PausedScope<'a> {
    context: &'a TrackingContext,
}

impl Drop for PausedScope<'_> {
    fn drop(&mut self) {
        self.context.evaluations.borrow_mut().pop();
    }
}
