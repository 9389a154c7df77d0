//! Exponential backoff for the poll fallback.

use std::time::Duration;

/// `min(base * 2^failures, max)`.
///
/// Saturates instead of overflowing for large failure counts.
pub fn poll_interval(base: Duration, consecutive_failures: u32, max: Duration) -> Duration {
    let factor = 1u32.checked_shl(consecutive_failures).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(max).min(max)
}

/// Whether the `failures`-th consecutive failure should be surfaced.
///
/// The first failure is always reported, then every `every`-th one.
pub fn should_report_failure(failures: u32, every: u32) -> bool {
    failures == 1 || (every > 0 && failures % every == 0)
}
