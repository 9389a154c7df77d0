//! Pull-based fallback loop.
//!
//! At most one poll timer and one poll fetch exist at a time. The driver is
//! only active while the push channel is not open, stops for good on a
//! terminal status, and stalls once the cycle ceiling is reached.

use std::time::Duration;

use crate::backoff;
use crate::session::{Effect, FetchPurpose};

/// What a fired poll timer leads to.
#[derive(Debug, Clone, PartialEq)]
pub enum PollTick {
    Fetch(Effect),
    /// Ceiling reached without a terminal status.
    Stalled { cycles: u32 },
    Idle,
}

#[derive(Debug, Clone)]
pub struct PollDriver {
    active: bool,
    timer_pending: bool,
    in_flight: bool,
    consecutive_failures: u32,
    cycles: u32,
    stalled: bool,
    stopped: bool,
    base_interval: Duration,
    max_interval: Duration,
    max_cycles: u32,
}

impl PollDriver {
    pub fn new(base_interval: Duration, max_interval: Duration, max_cycles: u32) -> Self {
        Self {
            active: false,
            timer_pending: false,
            in_flight: false,
            consecutive_failures: 0,
            cycles: 0,
            stalled: false,
            stopped: false,
            base_interval,
            max_interval,
            max_cycles,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Interval for the next cycle given the current failure streak.
    pub fn current_interval(&self) -> Duration {
        backoff::poll_interval(
            self.base_interval,
            self.consecutive_failures,
            self.max_interval,
        )
    }

    /// Become active and poll on the next scheduling tick.
    pub fn activate(&mut self) -> Vec<Effect> {
        if self.active || self.stopped || self.stalled {
            return Vec::new();
        }
        self.active = true;
        tracing::debug!("Poll fallback activated");
        self.schedule(Duration::ZERO).into_iter().collect()
    }

    /// Push is open again. An in-flight fetch still lands but is not
    /// followed by another cycle.
    pub fn deactivate(&mut self) -> Vec<Effect> {
        if !self.active {
            return Vec::new();
        }
        self.active = false;
        tracing::debug!(cycles = self.cycles, "Poll fallback deactivated");
        self.cancel_timer()
    }

    pub fn on_timer(&mut self) -> PollTick {
        self.timer_pending = false;
        if !self.active || self.in_flight || self.stalled || self.stopped {
            return PollTick::Idle;
        }
        if self.cycles >= self.max_cycles {
            self.stalled = true;
            self.active = false;
            return PollTick::Stalled {
                cycles: self.cycles,
            };
        }
        self.cycles += 1;
        self.in_flight = true;
        PollTick::Fetch(Effect::Fetch(FetchPurpose::Poll))
    }

    /// Record the outcome of a poll fetch and schedule the next cycle.
    pub fn on_result(&mut self, success: bool) -> Vec<Effect> {
        self.in_flight = false;
        if success {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }
        if !self.active || self.stopped || self.stalled {
            return Vec::new();
        }
        let delay = self.current_interval();
        self.schedule(delay).into_iter().collect()
    }

    /// Terminal status: never poll again.
    pub fn stop(&mut self) -> Vec<Effect> {
        self.stopped = true;
        self.active = false;
        self.cancel_timer()
    }

    /// Clear the stall and the counters for a manual restart.
    pub fn reset(&mut self) {
        *self = Self::new(self.base_interval, self.max_interval, self.max_cycles);
    }

    fn schedule(&mut self, delay: Duration) -> Option<Effect> {
        if self.timer_pending || self.in_flight {
            return None;
        }
        self.timer_pending = true;
        Some(Effect::SchedulePoll(delay))
    }

    fn cancel_timer(&mut self) -> Vec<Effect> {
        if std::mem::take(&mut self.timer_pending) {
            vec![Effect::CancelPoll]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn driver(max_cycles: u32) -> PollDriver {
        PollDriver::new(Duration::from_millis(500), Duration::from_secs(8), max_cycles)
    }

    #[test]
    fn activation_polls_immediately_once() {
        let mut poll = driver(10);
        assert_eq!(poll.activate(), vec![Effect::SchedulePoll(Duration::ZERO)]);
        assert!(poll.activate().is_empty());
    }

    #[test]
    fn failures_back_off_and_success_resets() {
        let mut poll = driver(10);
        poll.activate();
        let mut delays = Vec::new();
        for success in [false, false, false, true] {
            assert_matches!(poll.on_timer(), PollTick::Fetch(_));
            match poll.on_result(success).as_slice() {
                [Effect::SchedulePoll(d)] => delays.push(d.as_millis()),
                other => panic!("unexpected effects {other:?}"),
            }
        }
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 500]);
    }

    #[test]
    fn no_second_cycle_while_fetch_in_flight() {
        let mut poll = driver(10);
        poll.activate();
        assert_matches!(poll.on_timer(), PollTick::Fetch(_));
        assert_eq!(poll.on_timer(), PollTick::Idle);
        assert_eq!(poll.cycles(), 1);
    }

    #[test]
    fn ceiling_stalls_the_driver() {
        let mut poll = driver(2);
        poll.activate();
        for _ in 0..2 {
            assert_matches!(poll.on_timer(), PollTick::Fetch(_));
            poll.on_result(true);
        }
        assert_eq!(poll.on_timer(), PollTick::Stalled { cycles: 2 });
        assert!(poll.is_stalled());
        assert!(poll.activate().is_empty());

        poll.reset();
        assert!(!poll.is_stalled());
        assert_eq!(poll.activate().len(), 1);
    }

    #[test]
    fn deactivation_cancels_pending_timer() {
        let mut poll = driver(10);
        poll.activate();
        assert_eq!(poll.deactivate(), vec![Effect::CancelPoll]);
        assert_eq!(poll.on_timer(), PollTick::Idle);
    }

    #[test]
    fn result_after_deactivation_does_not_reschedule() {
        let mut poll = driver(10);
        poll.activate();
        poll.on_timer();
        poll.deactivate();
        assert!(poll.on_result(true).is_empty());
    }

    #[test]
    fn stopped_driver_never_restarts() {
        let mut poll = driver(10);
        poll.activate();
        poll.stop();
        assert!(poll.activate().is_empty());
    }
}
