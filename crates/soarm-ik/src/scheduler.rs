//! Solve scheduling: attempt throttling and budget escalation.
//!
//! Keypoint streams arrive faster than solves are worth running. The
//! scheduler throttles attempts to a minimum interval, and when the last
//! accepted solve is getting old it hands out a larger iteration budget
//! (and eventually a relaxed tolerance) so the solver can catch up from
//! further away.

use std::time::Duration;

use soarm_core::config::{SchedulerConfig, SolverConfig};
use soarm_core::time::MonoTime;
use tracing::debug;

use crate::solver::SolveBudget;

/// Decides when to solve and with what budget.
#[derive(Debug, Clone)]
pub struct SolveScheduler {
    config: SchedulerConfig,
    last_attempt: Option<MonoTime>,
    last_accepted: Option<MonoTime>,
}

impl SolveScheduler {
    #[must_use]
    pub const fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            last_attempt: None,
            last_accepted: None,
        }
    }

    /// Whether enough time has passed since the last attempt.
    #[must_use]
    pub fn should_attempt(&self, now: MonoTime) -> bool {
        match self.last_attempt {
            None => true,
            Some(last) => {
                now.elapsed_since(last) >= Duration::from_millis(self.config.min_solve_interval_ms)
            }
        }
    }

    /// Gates an attempt at `now` and returns its budget.
    ///
    /// Returns `None` when the attempt falls inside the minimum interval;
    /// otherwise records the attempt and scales the configured budget by
    /// how stale the last accepted solve is. A chain that has never had an
    /// accepted solve gets the full escalation.
    pub fn plan(&mut self, now: MonoTime, solver: &SolverConfig) -> Option<SolveBudget> {
        if !self.should_attempt(now) {
            return None;
        }
        self.last_attempt = Some(now);
        Some(self.budget_at(now, solver))
    }

    /// Marks a committed solve at `now`.
    pub fn record_accepted(&mut self, now: MonoTime) {
        self.last_accepted = Some(now);
    }

    #[must_use]
    pub const fn last_attempt(&self) -> Option<MonoTime> {
        self.last_attempt
    }

    #[must_use]
    pub const fn last_accepted(&self) -> Option<MonoTime> {
        self.last_accepted
    }

    fn budget_at(&self, now: MonoTime, solver: &SolverConfig) -> SolveBudget {
        let base = SolveBudget::from_config(solver);
        let gap = match self.last_accepted {
            Some(accepted) => now.elapsed_since(accepted),
            None => Duration::from_millis(self.config.long_gap_ms),
        };
        if gap >= Duration::from_millis(self.config.long_gap_ms) {
            debug!(?gap, "long gap since accepted solve, escalating budget and relaxing tolerance");
            SolveBudget {
                max_iterations: scale_iterations(base.max_iterations, self.config.long_budget_scale),
                position_tolerance: base.position_tolerance * self.config.relaxed_tolerance_scale,
            }
        } else if gap >= Duration::from_millis(self.config.moderate_gap_ms) {
            debug!(?gap, "moderate gap since accepted solve, escalating budget");
            SolveBudget {
                max_iterations: scale_iterations(
                    base.max_iterations,
                    self.config.moderate_budget_scale,
                ),
                position_tolerance: base.position_tolerance,
            }
        } else {
            base
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scale_iterations(iterations: u32, scale: f64) -> u32 {
    (f64::from(iterations) * scale).round() as u32
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
