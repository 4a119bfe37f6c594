use std::time::Duration;

use rand::Rng as _;
use tokio_util::sync::CancellationToken;

/// Exponential cooldown with jitter, applied between batches after the
/// remote service signals a rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: 2,
            max_delay_secs: 30,
        }
    }
}

impl BackoffConfig {
    /// No cooldown at all.
    pub const DISABLED: Self = Self {
        base_delay_secs: 0,
        max_delay_secs: 0,
    };

    /// Compute the delay for a given retry attempt (0-indexed).
    ///
    /// Formula: `min(base_delay * 2^retry, max_delay) + random_jitter(0..base_delay)`
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exp_delay = self
            .base_delay_secs
            .saturating_mul(1u64.checked_shl(retry).unwrap_or(u64::MAX));
        let capped = exp_delay.min(self.max_delay_secs);
        let jitter = if self.base_delay_secs > 0 {
            rand::thread_rng().gen_range(0..self.base_delay_secs)
        } else {
            0
        };
        Duration::from_secs(capped.saturating_add(jitter))
    }
}

/// Sleep for `delay` unless `cancel` fires first. Returns `false` when the
/// wait was cut short by cancellation.
pub async fn wait_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancel.cancelled() => false,
    }
}
