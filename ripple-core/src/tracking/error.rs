//! Error types for the tracking engine.
//!
//! Three families of failure exist. A user evaluation failure is ordinary
//! data: it is cached in place of a value and handed to every reader. A
//! reaction cycle and the invariant violations indicate a defect in the
//! engine or in the code driving it; they always go straight back to the
//! immediate caller and are never retried.

use std::error::Error as StdError;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use super::notification::Notification;

/// Result alias used throughout the engine.
pub type Result<T, E = TrackingError> = std::result::Result<T, E>;

/// Everything that can go wrong while reading, writing or propagating.
///
/// The type is `Clone` because a failed evaluation is cached and returned to
/// each subsequent reader.
#[derive(Debug, Clone, Error)]
pub enum TrackingError {
    /// A computed function failed.
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    /// Reactions kept re-triggering each other past the sweep cap.
    #[error("reactions didn't settle after {sweeps} sweeps")]
    ReactionCycle { sweeps: usize },

    /// A property was read from inside its own evaluation.
    #[error("`{property}` was read while it was being evaluated")]
    CyclicEvaluation { property: String },

    /// The engine or its caller broke a tracking invariant.
    #[error("tracking invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),
}

impl TrackingError {
    /// Shorthand for a user-level evaluation failure with a message.
    pub fn msg(message: impl Into<String>) -> Self {
        TrackingError::Evaluation(EvaluationError::msg(message))
    }

    /// True for failures that come from user code rather than the engine.
    pub fn is_evaluation(&self) -> bool {
        matches!(self, TrackingError::Evaluation(_))
    }
}

/// Broken engine invariants. Seeing one of these is a bug.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("`{property}` received {notification} without tracking data")]
    NotifyWithoutData {
        property: String,
        notification: Notification,
    },

    #[error("unknown notification code {0}")]
    UnknownNotification(u8),

    #[error("dependency noted outside of an evaluation")]
    NoteOutsideEvaluation,

    #[error("`{property}` is computed and can't be assigned")]
    AssignToComputed { property: String },

    #[error("`{property}` received more ready notifications than stale ones")]
    UnbalancedReady { property: String },

    #[error("`{property}` was unsubscribed from while untracked")]
    UnsubscribeWithoutData { property: String },

    #[error("`{property}` lost its tracking data during {operation}")]
    MissingData {
        property: String,
        operation: &'static str,
    },

    #[error("{0} closed without a matching open")]
    UnbalancedScope(&'static str),

    #[error("no property with index {index} on `{entity}`")]
    UnknownIndex { entity: String, index: usize },
}

/// A failure raised by a computed function.
///
/// The underlying error is shared, so every read of a failed property sees
/// the very same error object until the property is re-evaluated.
#[derive(Clone)]
pub struct EvaluationError {
    inner: Rc<dyn StdError + 'static>,
}

impl EvaluationError {
    /// Wrap an arbitrary error.
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + 'static,
    {
        Self {
            inner: Rc::new(error),
        }
    }

    /// An error carrying just a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(Message(message.into()))
    }

    /// Try to view the underlying error as a concrete type.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: StdError + 'static,
    {
        self.inner.downcast_ref::<E>()
    }

    /// True if both values share the same underlying error object.
    pub fn ptr_eq(&self, other: &EvaluationError) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for EvaluationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EvaluationError").field(&self.inner).finish()
    }
}

impl fmt::Display for EvaluationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl StdError for EvaluationError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source()
    }
}

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for Message {}
