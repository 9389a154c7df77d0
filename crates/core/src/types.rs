use chrono::{DateTime, NaiveDateTime, Utc};

/// Server-assigned job identifier. Retries keep the same id.
pub type JobId = String;

/// Unique id of a single job event within a session.
pub type EventId = String;

/// All timestamps are UTC.
pub type Timestamp = DateTime<Utc>;

/// Naive layouts the job engine is known to emit (no offset, implied UTC).
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

/// Parse a server timestamp.
///
/// Accepts RFC 3339 (with any offset) and the naive ISO layouts in
/// [`NAIVE_FORMATS`], which are interpreted as UTC. Returns `None` for
/// anything else; callers treat an unparseable time as "unknown".
pub fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
