use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff shared by every remote call the job retries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the backoff delay randomised around it.
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            jitter_ratio: 0.25,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    pub fn allows_another(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts.max(1)
    }

    /// Un-jittered delay before retry number `attempt` (1 = first retry).
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(31));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Backoff spread by the jitter ratio; `unit` in `[0, 1]` picks the point
    /// inside the window.
    pub fn jittered_backoff(&self, attempt: u32, unit: f64) -> Duration {
        let anchor = self.backoff(attempt).as_secs_f64();
        if anchor == 0.0 {
            return Duration::ZERO;
        }

        let span = anchor * self.jitter_ratio.clamp(0.0, 1.0);
        let lower = (anchor - span).max(0.0);
        let upper = (anchor + span).min(self.max_delay.as_secs_f64());
        if upper <= lower {
            return Duration::from_secs_f64(lower);
        }
        Duration::from_secs_f64(lower + (upper - lower) * unit.clamp(0.0, 1.0))
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.jittered_backoff(attempt, rand::random::<f64>())
    }
}
