//! Per-phase timing of an authorization call.
//!
//! A `PhaseTimer` adds the time it was alive to a `Duration` slot when it is
//! dropped, so every exit path of a phase is counted. A disabled timer does
//! nothing, which lets callers time phases only when asked to.

use std::time::{Duration, Instant};

/// Accumulated wall time of the evaluator's phases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseDurations {
    /// Matching policy scopes against the request.
    pub scope: Duration,
    /// Evaluating `when`/`unless` conditions of the scope matches.
    pub conditions: Duration,
}

impl PhaseDurations {
    pub fn total(&self) -> Duration {
        self.scope + self.conditions
    }
}

/// RAII timer that records elapsed time to an optional slot on drop.
pub struct PhaseTimer<'a> {
    running: Option<(Instant, &'a mut Duration)>,
}

impl<'a> PhaseTimer<'a> {
    pub fn start(slot: &'a mut Duration) -> Self {
        Self {
            running: Some((Instant::now(), slot)),
        }
    }

    /// Start timing if a slot is given.
    pub fn optional(slot: Option<&'a mut Duration>) -> Self {
        Self {
            running: slot.map(|slot| (Instant::now(), slot)),
        }
    }
}

impl Drop for PhaseTimer<'_> {
    fn drop(&mut self) {
        if let Some((start, slot)) = self.running.as_mut() {
            **slot += start.elapsed();
        }
    }
}
