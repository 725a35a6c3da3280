use std::cmp;
use std::time::Duration;

/// Shortest delay the poll cycle ever waits
pub(crate) const MIN_DELAY: Duration = Duration::from_millis(1);

/// Retry delay that doubles on every consecutive failure.
///
/// A zero delay means the caller should use its regular interval.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    initial: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = cmp::max(max, MIN_DELAY);
        Self {
            current: Duration::ZERO,
            initial: initial.clamp(MIN_DELAY, max),
            max,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Record a failure and return the new delay
    pub fn fail(&mut self) -> Duration {
        self.current = if self.current.is_zero() {
            self.initial
        } else {
            cmp::min(self.current.saturating_mul(2), self.max)
        };
        self.current
    }

    pub fn reset(&mut self) {
        self.current = Duration::ZERO;
    }

    /// Delay until the next attempt, `base` while no failures are recorded
    pub fn delay(&self, base: Duration) -> Duration {
        if self.current.is_zero() {
            base
        } else {
            self.current
        }
    }
}
