//! Engine configuration.

/// Sweep cap used when nothing else is configured.
pub const DEFAULT_MAX_REACTION_SWEEPS: usize = 100;

/// Tunables of a [`TrackingContext`](super::TrackingContext).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingConfig {
    /// How many reaction sweeps one outermost batch close may run before the
    /// drain gives up and reports a reactive cycle.
    pub max_reaction_sweeps: usize,
}

impl TrackingConfig {
    pub fn new() -> Self {
        Self {
            max_reaction_sweeps: DEFAULT_MAX_REACTION_SWEEPS,
        }
    }

    /// Override the sweep cap. A cap of zero is raised to one so a single
    /// round of reactions can always run.
    pub fn with_max_reaction_sweeps(mut self, sweeps: usize) -> Self {
        self.max_reaction_sweeps = sweeps.max(1);
        self
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self::new()
    }
}
