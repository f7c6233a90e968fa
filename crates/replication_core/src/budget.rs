use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Wall-clock budget of one invocation.
pub trait Budget: Send + Sync {
    fn remaining(&self) -> Duration;

    fn should_stop(&self, safety_margin: Duration) -> bool {
        self.remaining() <= safety_margin
    }
}

/// Budget ending at a fixed instant, e.g. the Lambda invocation deadline.
#[derive(Debug, Clone, Copy)]
pub struct DeadlineBudget {
    deadline: Instant,
}

impl DeadlineBudget {
    pub fn new(deadline: Instant) -> Self {
        Self { deadline }
    }

    pub fn from_remaining(remaining: Duration) -> Self {
        Self::new(Instant::now() + remaining)
    }

    /// Budget for a deadline given in epoch milliseconds, as the Lambda
    /// runtime reports it. A deadline in the past leaves nothing.
    pub fn from_epoch_millis(deadline_ms: u64, now: DateTime<Utc>) -> Self {
        let now_ms = u64::try_from(now.timestamp_millis()).unwrap_or(0);
        Self::from_remaining(Duration::from_millis(deadline_ms.saturating_sub(now_ms)))
    }
}

impl Budget for DeadlineBudget {
    fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}
