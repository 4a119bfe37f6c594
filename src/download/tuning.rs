//! Per-batch concurrency auto-tuning.
//!
//! After each batch the scheduler folds the batch's outcome into a single
//! decision: halve on a rate-limit signal, step down on a high failure
//! ratio, step up on a fast clean batch, otherwise hold.

use std::time::Duration;

/// Thresholds for the re-tuning rules.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuningParams {
    /// Failure ratio above which concurrency steps down by one.
    pub failure_ratio_threshold: f64,
    /// Mean seconds per item below which a clean batch steps up by one.
    pub fast_item_secs: f64,
}

impl Default for TuningParams {
    fn default() -> Self {
        Self {
            failure_ratio_threshold: 0.30,
            fast_item_secs: 1.5,
        }
    }
}

/// What one batch looked like once every item in it finished.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchOutcome {
    pub attempted: usize,
    pub failed: usize,
    pub rate_limited: bool,
    pub elapsed: Duration,
}

impl BatchOutcome {
    pub fn failure_ratio(&self) -> f64 {
        self.failed as f64 / self.attempted.max(1) as f64
    }

    pub fn secs_per_item(&self) -> f64 {
        self.elapsed.as_secs_f64() / self.attempted.max(1) as f64
    }
}

/// Decision taken by [`ConcurrencyState::retune`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    RateLimited { from: usize, to: usize },
    HighFailureRate { from: usize, to: usize },
    Increased { from: usize, to: usize },
    Unchanged,
}

/// Concurrency level for the next batch, always within `[floor, ceiling]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyState {
    current: usize,
    ceiling: usize,
    floor: usize,
}

impl ConcurrencyState {
    pub const FLOOR: usize = 1;

    /// Start at `min(configured_max, pending)`, never below the floor.
    pub fn new(configured_max: usize, pending: usize) -> Self {
        let ceiling = configured_max.max(Self::FLOOR);
        Self {
            current: ceiling.min(pending).max(Self::FLOOR),
            ceiling,
            floor: Self::FLOOR,
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Apply the re-tuning rules in priority order.
    pub fn retune(&mut self, outcome: &BatchOutcome, params: &TuningParams) -> Adjustment {
        let from = self.current;

        let adjustment = if outcome.rate_limited {
            self.current = (from / 2).max(self.floor);
            Adjustment::RateLimited {
                from,
                to: self.current,
            }
        } else if outcome.failure_ratio() > params.failure_ratio_threshold {
            self.current = from.saturating_sub(1).max(self.floor);
            Adjustment::HighFailureRate {
                from,
                to: self.current,
            }
        } else if outcome.failed == 0
            && outcome.secs_per_item() < params.fast_item_secs
            && from < self.ceiling
        {
            self.current = from + 1;
            Adjustment::Increased {
                from,
                to: self.current,
            }
        } else {
            Adjustment::Unchanged
        };

        debug_assert!(self.current >= self.floor && self.current <= self.ceiling);
        adjustment
    }
}
