//! Reconciliation loop primitives.
//!
//! Helpers for loops that poll an externally managed object until it
//! converges:
//!
//! - **Deadline**: an absolute point on the tokio clock bounding a loop,
//!   independent of how many iterations ran.
//! - **Convergence**: whether an observed state ends the loop.
//! - **Transition tracking**: reporting a state only when it changes, so
//!   repeated identical observations collapse into one.

use std::time::Duration;

use tokio::time::Instant;

/// Convergence status for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStatus {
    /// Resource has converged (current matches desired).
    Converged,

    /// Resource is converging (current is moving toward desired).
    Converging,

    /// Resource has diverged and will not converge on its own.
    Diverged,

    /// Status is unknown (insufficient data).
    Unknown,
}

/// An absolute deadline on the tokio clock.
///
/// Loops check the deadline rather than counting attempts, so a slow
/// external call cannot stretch the total time budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// A deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    /// Returns true once the deadline has been reached.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }
}

/// Tracks the last reported value and reports only changes.
#[derive(Debug, Clone)]
pub struct TransitionTracker<T> {
    last: Option<T>,
}

impl<T> Default for TransitionTracker<T> {
    fn default() -> Self {
        Self { last: None }
    }
}

impl<T: PartialEq + Clone> TransitionTracker<T> {
    /// A tracker that has observed nothing yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// A tracker seeded with an already-reported value.
    pub fn starting_at(value: T) -> Self {
        Self { last: Some(value) }
    }

    /// Would observing `value` be a transition?
    pub fn is_transition(&self, value: &T) -> bool {
        self.last.as_ref() != Some(value)
    }

    /// Records `value`; returns true if it differs from the last one.
    pub fn observe(&mut self, value: T) -> bool {
        if self.is_transition(&value) {
            self.last = Some(value);
            true
        } else {
            false
        }
    }

    /// The last observed value.
    pub fn last(&self) -> Option<&T> {
        self.last.as_ref()
    }
}
