//! Messages exchanged along subscription edges.

use std::fmt;

use serde::Serialize;

use super::error::{InvariantViolation, TrackingError};

/// A notification sent from a dependency to one of its subscribers.
///
/// A property that starts changing sends `Stale` once; when it has settled it
/// sends exactly one of the two `Ready` kinds. `RelaxIfAppropriate` is only
/// sent by the context while draining the relaxation queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum Notification {
    Stale = 0,
    ReadyUnmodified = 1,
    ReadyModified = 2,
    RelaxIfAppropriate = 3,
}

impl TryFrom<u8> for Notification {
    type Error = TrackingError;

    /// Decode a raw notification code as passed through generated delegation
    /// methods.
    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Notification::Stale),
            1 => Ok(Notification::ReadyUnmodified),
            2 => Ok(Notification::ReadyModified),
            3 => Ok(Notification::RelaxIfAppropriate),
            other => Err(InvariantViolation::UnknownNotification(other).into()),
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Notification::Stale => "stale",
            Notification::ReadyUnmodified => "ready-unmodified",
            Notification::ReadyModified => "ready-modified",
            Notification::RelaxIfAppropriate => "relax-if-appropriate",
        };
        f.write_str(name)
    }
}

/// Why a property is being re-evaluated. Only used for logging, except for
/// `DependenciesStabilized`, which lets a queued reaction skip a property that
/// an earlier read already refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateReason {
    /// First subscription forced the property to start tracking.
    Subscribed,
    /// A read found the cached result out of date.
    ValueRequested,
    /// The reaction phase is catching up after dependencies settled.
    DependenciesStabilized,
    /// Explicit refresh requested by the owner of the entity.
    Requested,
}

impl fmt::Display for UpdateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            UpdateReason::Subscribed => "on alert due to subscription",
            UpdateReason::ValueRequested => "on value request",
            UpdateReason::DependenciesStabilized => "on stabilized dependencies",
            UpdateReason::Requested => "on request",
        };
        f.write_str(reason)
    }
}
