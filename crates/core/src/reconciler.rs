//! The single funnel for everything either channel delivers.
//!
//! The reconciler owns the seen-set, the watermark and the [`JobTracker`]
//! they protect. Producers (push stream, poll fetches) hand it raw events
//! and never touch the tracker directly.

use std::collections::HashSet;

use crate::activity::ActivityLevel;
use crate::channel::{ConnectionInfo, Heartbeat};
use crate::event::JobEvent;
use crate::snapshot::JobSnapshot;
use crate::tracker::{Applied, JobTracker};
use crate::types::{EventId, Timestamp};

/// What happened to one incoming event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    Applied(Applied),
    /// Id already applied once.
    Duplicate,
    /// Id-less event older than the watermark.
    Stale,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub received: usize,
    pub applied: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct EventReconciler {
    seen: HashSet<EventId>,
    watermark: Option<Timestamp>,
    duplicates: u64,
    tracker: JobTracker,
}

impl EventReconciler {
    pub fn new(activity_capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            watermark: None,
            duplicates: 0,
            tracker: JobTracker::new(activity_capacity),
        }
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    pub fn watermark(&self) -> Option<Timestamp> {
        self.watermark
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    pub fn has_seen(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Events dropped because their id had already been applied.
    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    /// Apply one event in arrival order.
    ///
    /// Events with an id are deduplicated by id and dispatched regardless of
    /// where their timestamp falls; the handlers guard their own
    /// monotonicity. Events without an id are applied only when they are
    /// not older than the watermark.
    pub fn ingest(&mut self, event: &JobEvent, now: Timestamp) -> Ingest {
        let at = event.timestamp();
        match event.id.as_deref() {
            Some(id) => {
                if !self.seen.insert(id.to_string()) {
                    self.duplicates += 1;
                    tracing::trace!(event_id = %id, "Skipping duplicate event");
                    return Ingest::Duplicate;
                }
            }
            None => {
                if let (Some(at), Some(mark)) = (at, self.watermark) {
                    if at < mark {
                        tracing::debug!(event_type = %event.event_type, "Skipping stale id-less event");
                        return Ingest::Stale;
                    }
                }
            }
        }
        if let Some(at) = at {
            self.advance_watermark(at);
        }
        Ingest::Applied(self.tracker.apply_event(event, now))
    }

    /// Reduce a pulled, newest-first event list to the events that still
    /// need applying, in arrival order.
    ///
    /// Pulled lists overlap between polls, so id-less events need a
    /// timestamp strictly after the watermark.
    pub fn filter_batch(&self, newest_first: Vec<JobEvent>) -> Vec<JobEvent> {
        let mut batch = newest_first;
        batch.reverse();
        batch.retain(|event| match (event.id.as_deref(), event.timestamp(), self.watermark) {
            (Some(id), _, _) if self.seen.contains(id) => false,
            (Some(_), Some(at), Some(mark)) => at >= mark,
            (Some(_), _, _) | (None, _, None) => true,
            // An id-less event at the watermark may already have been
            // applied; only a strictly newer one is known to be new.
            (None, Some(at), Some(mark)) => at > mark,
            (None, None, Some(_)) => false,
        });
        batch
    }

    /// Filter and apply a pulled batch.
    pub fn ingest_batch(&mut self, newest_first: Vec<JobEvent>, now: Timestamp) -> BatchSummary {
        let received = newest_first.len();
        let mut summary = BatchSummary {
            received,
            ..Default::default()
        };
        for event in self.filter_batch(newest_first) {
            if matches!(self.ingest(&event, now), Ingest::Applied(_)) {
                summary.applied += 1;
            }
        }
        summary.skipped = received - summary.applied;
        summary
    }

    pub fn apply_snapshot(&mut self, snapshot: &JobSnapshot, now: Timestamp) {
        self.tracker.apply_snapshot(snapshot, now);
    }

    /// Heartbeats carry no id, so the watermark decides whether their status
    /// is still current.
    pub fn apply_heartbeat(&mut self, heartbeat: &Heartbeat, now: Timestamp) {
        self.tracker.apply_heartbeat(heartbeat, self.watermark, now);
    }

    pub fn apply_connection_info(&mut self, info: &ConnectionInfo, now: Timestamp) {
        self.tracker.apply_connection_info(info, now);
    }

    pub fn tick(&mut self, now: Timestamp) {
        self.tracker.tick(now);
    }

    pub fn note(&mut self, at: Timestamp, level: ActivityLevel, message: impl Into<String>) {
        self.tracker.note(at, level, message);
    }

    /// Forget everything about the current run: seen-set, watermark, steps,
    /// files and timing. The activity history is kept.
    pub fn reset(&mut self) {
        self.seen.clear();
        self.watermark = None;
        self.duplicates = 0;
        self.tracker.reset_run();
    }

    fn advance_watermark(&mut self, at: Timestamp) {
        if self.watermark.map_or(true, |mark| at > mark) {
            self.watermark = Some(at);
        }
    }
}
