//! Bounded, append-only activity log shown under the progress view.

use std::collections::VecDeque;

use serde::Serialize;

use crate::types::Timestamp;

/// Default number of retained entries.
pub const DEFAULT_ACTIVITY_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl ActivityLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityEntry {
    pub at: Timestamp,
    pub level: ActivityLevel,
    pub message: String,
}

/// Oldest entries are discarded first once `capacity` is reached.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    entries: VecDeque<ActivityEntry>,
    capacity: usize,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_ACTIVITY_CAPACITY)
    }
}

impl ActivityLog {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, at: Timestamp, level: ActivityLevel, message: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(ActivityEntry {
            at,
            level,
            message: message.into(),
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActivityEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn drops_oldest_when_full() {
        let mut log = ActivityLog::with_capacity(3);
        let now = Utc::now();
        for i in 0..5 {
            log.push(now, ActivityLevel::Info, format!("entry {i}"));
        }
        let messages: Vec<&str> = log.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["entry 2", "entry 3", "entry 4"]);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut log = ActivityLog::with_capacity(0);
        log.push(Utc::now(), ActivityLevel::Warning, "kept");
        assert_eq!(log.len(), 1);
        assert_eq!(log.capacity(), 1);
    }
}
