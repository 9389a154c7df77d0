//! Elapsed time and ETA.
//!
//! Values are recomputed from a local clock tick rather than from event
//! arrival, so the display keeps moving between updates. Once the run is
//! terminal the elapsed time freezes at the terminal event's timestamp.

use crate::types::Timestamp;

/// Placeholder shown when no ETA can be estimated.
pub const UNKNOWN_DURATION: &str = "--";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimingEstimator {
    started_at: Option<Timestamp>,
    frozen_at: Option<Timestamp>,
    elapsed_seconds: Option<u64>,
    eta_seconds: Option<u64>,
}

impl TimingEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the run start. The earliest reported start wins.
    pub fn set_started(&mut self, at: Timestamp) {
        self.started_at = Some(self.started_at.map_or(at, |prev| prev.min(at)));
    }

    /// Stop the clock at `at`. Later calls are ignored.
    pub fn freeze(&mut self, at: Timestamp) {
        if self.frozen_at.is_none() {
            let at = self.started_at.map_or(at, |start| at.max(start));
            self.frozen_at = Some(at);
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen_at.is_some()
    }

    pub fn started_at(&self) -> Option<Timestamp> {
        self.started_at
    }

    pub fn frozen_at(&self) -> Option<Timestamp> {
        self.frozen_at
    }

    pub fn elapsed_seconds(&self) -> Option<u64> {
        self.elapsed_seconds
    }

    pub fn eta_seconds(&self) -> Option<u64> {
        self.eta_seconds
    }

    /// Recompute elapsed and ETA for `now` and `progress` (0-100).
    pub fn recompute(&mut self, now: Timestamp, progress: f64) {
        let Some(start) = self.started_at else {
            self.elapsed_seconds = None;
            self.eta_seconds = None;
            return;
        };
        let reference = self.frozen_at.unwrap_or(now);
        let elapsed = (reference - start).num_seconds().max(0) as u64;
        self.elapsed_seconds = Some(elapsed);
        self.eta_seconds = estimate_eta(elapsed, progress, self.is_frozen());
    }
}

/// `eta = max(0, elapsed / (progress / 100) - elapsed)`.
///
/// Zero once finished, unknown while nothing has progressed.
pub fn estimate_eta(elapsed_seconds: u64, progress: f64, terminal: bool) -> Option<u64> {
    if terminal || progress >= 100.0 {
        return Some(0);
    }
    if progress <= 0.0 || !progress.is_finite() {
        return None;
    }
    let elapsed = elapsed_seconds as f64;
    let total = elapsed / (progress / 100.0);
    Some((total - elapsed).max(0.0).round() as u64)
}

/// `45s`, `3m 05s`, `1h 02m 03s`.
pub fn format_duration(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    if hours > 0 {
        format!("{hours}h {minutes:02}m {seconds:02}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}

pub fn format_optional(seconds: Option<u64>) -> String {
    seconds.map_or_else(|| UNKNOWN_DURATION.to_string(), format_duration)
}
