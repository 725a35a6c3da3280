use std::time::Duration;

use tokio::time::Instant;

use crate::backoff::{Backoff, MIN_DELAY};
use crate::models::PollStatus;
use crate::util::interrupt::Interrupt;

/// Bookkeeping for the status poll cycle.
///
/// The scheduler does no I/O. The controller asks it to `begin` a cycle,
/// performs the request with the returned interrupt and reports the outcome
/// back through `succeed` or `fail`. At most one cycle is in flight, starting
/// a new one interrupts the previous request.
#[derive(Debug)]
pub struct PollScheduler {
    status: PollStatus,
    interval: Duration,
    backoff: Backoff,
    next_poll: Option<Instant>,
    in_flight: Option<Interrupt>,
}

impl PollScheduler {
    pub fn new(interval: Duration, backoff: Backoff) -> Self {
        Self {
            status: PollStatus::Idle,
            interval: interval.max(MIN_DELAY),
            backoff,
            next_poll: None,
            in_flight: None,
        }
    }

    pub fn status(&self) -> PollStatus {
        self.status
    }

    pub fn is_polling(&self) -> bool {
        self.status == PollStatus::Polling
    }

    /// Current retry delay, zero while polls succeed
    pub fn backoff(&self) -> Duration {
        self.backoff.current()
    }

    /// Deadline of the next cycle, if one is scheduled
    pub fn next_poll(&self) -> Option<Instant> {
        self.next_poll
    }

    /// Start a new cycle, interrupting the one in flight.
    ///
    /// Returns the interrupt for the new request, or `None` once stopped.
    pub fn begin(&mut self) -> Option<Interrupt> {
        if self.status == PollStatus::Stopped {
            return None;
        }

        self.cancel_in_flight();
        self.next_poll = None;

        let interrupt = Interrupt::new();
        self.in_flight = Some(interrupt.clone());
        self.status = PollStatus::Polling;
        Some(interrupt)
    }

    /// Start a new cycle right away with the backoff cleared
    pub fn retry(&mut self) -> Option<Interrupt> {
        if self.status == PollStatus::Stopped {
            return None;
        }
        self.backoff.reset();
        self.begin()
    }

    /// Complete the cycle in flight and schedule the next one at the regular
    /// interval
    pub fn succeed(&mut self, now: Instant) -> Instant {
        self.backoff.reset();
        self.schedule(now)
    }

    /// Complete the cycle in flight and schedule the next one after the
    /// increased backoff
    pub fn fail(&mut self, now: Instant) -> Instant {
        self.backoff.fail();
        self.schedule(now)
    }

    /// Cancel the pending timer and the request in flight. No further cycles
    /// can be started afterwards.
    pub fn stop(&mut self) {
        self.cancel_in_flight();
        self.next_poll = None;
        self.status = PollStatus::Stopped;
    }

    fn schedule(&mut self, now: Instant) -> Instant {
        self.in_flight = None;
        let next_poll = now + self.backoff.delay(self.interval);
        self.next_poll = Some(next_poll);
        self.status = PollStatus::Scheduled;
        next_poll
    }

    fn cancel_in_flight(&mut self) {
        if let Some(interrupt) = self.in_flight.take() {
            interrupt.trigger();
        }
    }
}
