//! Tunable intervals and limits for one sync session.

use std::time::Duration;

use crate::activity::DEFAULT_ACTIVITY_CAPACITY;

/// Poll interval while the fallback is healthy.
pub const DEFAULT_POLL_BASE_INTERVAL: Duration = Duration::from_millis(500);
/// Upper bound on the poll interval after repeated failures.
pub const DEFAULT_POLL_MAX_INTERVAL: Duration = Duration::from_secs(8);
/// Poll cycles allowed without a terminal status before the session stalls.
pub const DEFAULT_MAX_POLL_CYCLES: u32 = 600;
/// Delay before reopening the push channel after a transport failure.
pub const DEFAULT_REOPEN_DELAY: Duration = Duration::from_secs(3);
/// Delay before reopening after a graceful server-side reset.
pub const DEFAULT_FAST_REOPEN_DELAY: Duration = Duration::from_millis(500);
/// Maximum events requested per event-list call.
pub const DEFAULT_EVENT_LIMIT: u32 = 200;
/// Consecutive poll failures are surfaced on the first and every Nth one.
pub const DEFAULT_POLL_ERROR_REPORT_EVERY: u32 = 5;
/// Local clock tick driving elapsed/ETA.
pub const DEFAULT_CLOCK_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub poll_base_interval: Duration,
    pub poll_max_interval: Duration,
    pub max_poll_cycles: u32,
    pub reopen_delay: Duration,
    pub fast_reopen_delay: Duration,
    pub event_limit: u32,
    pub poll_error_report_every: u32,
    pub activity_capacity: usize,
    pub clock_tick: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_base_interval: DEFAULT_POLL_BASE_INTERVAL,
            poll_max_interval: DEFAULT_POLL_MAX_INTERVAL,
            max_poll_cycles: DEFAULT_MAX_POLL_CYCLES,
            reopen_delay: DEFAULT_REOPEN_DELAY,
            fast_reopen_delay: DEFAULT_FAST_REOPEN_DELAY,
            event_limit: DEFAULT_EVENT_LIMIT,
            poll_error_report_every: DEFAULT_POLL_ERROR_REPORT_EVERY,
            activity_capacity: DEFAULT_ACTIVITY_CAPACITY,
            clock_tick: DEFAULT_CLOCK_TICK,
        }
    }
}
