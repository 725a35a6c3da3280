use std::time::Duration;

use tokio::time::Instant;

/// Trailing-edge debouncer.
///
/// Holds the latest pushed value until no new value arrives for `delay`.
#[derive(Debug)]
pub struct Debouncer<T> {
    delay: Duration,
    pending: Option<(T, Instant)>,
}

impl<T> Debouncer<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    /// Replace the pending value and restart the quiet period.
    ///
    /// Returns the value that was replaced, if any.
    pub fn push(&mut self, value: T, now: Instant) -> Option<T> {
        self.pending
            .replace((value, now + self.delay))
            .map(|(value, _)| value)
    }

    /// Instant at which the pending value becomes due
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(_, deadline)| *deadline)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Take the pending value if its quiet period has elapsed
    pub fn take_due(&mut self, now: Instant) -> Option<T> {
        match self.pending {
            Some((_, deadline)) if deadline <= now => self.pending.take().map(|(value, _)| value),
            _ => None,
        }
    }

    /// Drop the pending value without waiting for it to become due
    pub fn cancel(&mut self) -> Option<T> {
        self.pending.take().map(|(value, _)| value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test(start_paused = true)]
    async fn test_only_latest_value_is_emitted() {
        let mut debouncer = Debouncer::new(Duration::from_millis(150));
        let start = Instant::now();

        assert_eq!(debouncer.push(10, start), None);
        assert_eq!(debouncer.push(20, start + Duration::from_millis(50)), Some(10));
        assert_eq!(debouncer.push(30, start + Duration::from_millis(100)), Some(20));

        // the quiet period restarts with every push
        assert_eq!(debouncer.take_due(start + Duration::from_millis(200)), None);
        assert_eq!(
            debouncer.deadline(),
            Some(start + Duration::from_millis(250))
        );
        assert_eq!(debouncer.take_due(start + Duration::from_millis(250)), Some(30));
        assert!(!debouncer.is_pending());
        assert_eq!(debouncer.take_due(start + Duration::from_secs(1)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_pending_value() {
        let mut debouncer = Debouncer::new(Duration::from_millis(150));
        let start = Instant::now();

        debouncer.push("fast", start);
        assert!(debouncer.is_pending());
        assert_eq!(debouncer.cancel(), Some("fast"));
        assert_eq!(debouncer.deadline(), None);
        assert_eq!(debouncer.take_due(start + Duration::from_secs(1)), None);
        assert_eq!(debouncer.cancel(), None);
    }
}
