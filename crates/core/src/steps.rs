//! Pipeline step tracking with an upgrade-only status policy.
//!
//! Steps are seeded from [`DEFAULT_PIPELINE`] so the view has a stable
//! order before any event arrives; unknown step ids are appended lazily.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::status::StepStatus;
use crate::types::Timestamp;

/// Known pipeline steps in display order, as `(id, label)`.
pub const DEFAULT_PIPELINE: &[(&str, &str)] = &[
    ("preparation", "Preparing job"),
    ("file_processing", "Processing files"),
    ("chunking", "Chunking logs"),
    ("embedding", "Generating embeddings"),
    ("redaction", "Redacting sensitive data"),
    ("analysis", "Analyzing with LLM"),
    ("report", "Building report"),
];

/// Completing this step means the run has produced its final output.
pub const TERMINAL_STEP: &str = "report";

/// Step receiving `analysis-progress` updates that name no step.
pub const DEFAULT_PROGRESS_STEP: &str = "analysis";

/// Step receiving per-file lifecycle updates.
pub const FILE_STEP: &str = "file_processing";

/// Step covering job creation and start-up.
pub const PREPARATION_STEP: &str = "preparation";

/// Current state of one pipeline step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepState {
    pub id: String,
    pub label: String,
    pub status: StepStatus,
    pub last_message: Option<String>,
    pub last_updated: Option<Timestamp>,
    pub details: Option<Value>,
}

impl StepState {
    fn new(id: &str, label: String) -> Self {
        Self {
            id: id.to_string(),
            label,
            status: StepStatus::Pending,
            last_message: None,
            last_updated: None,
            details: None,
        }
    }
}

/// An incoming update for one step.
#[derive(Debug, Clone, Default)]
pub struct StepUpdate {
    pub status: StepStatus,
    pub label: Option<String>,
    pub message: Option<String>,
    pub details: Option<Value>,
}

impl StepUpdate {
    pub fn status(status: StepStatus) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// What an update did to a step's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The step did not exist and was created with this status.
    Created(StepStatus),
    Advanced { from: StepStatus, to: StepStatus },
    /// Status held; descriptive fields may still have changed.
    Unchanged,
}

/// Resolve the status transition policy.
///
/// Completed and failed are final. Failed is reachable from pending or
/// in-progress directly; otherwise a step only moves to a higher rank.
pub fn next_status(current: StepStatus, incoming: StepStatus) -> StepStatus {
    match (current, incoming) {
        (StepStatus::Completed | StepStatus::Failed, _) => current,
        (_, StepStatus::Failed) => StepStatus::Failed,
        _ if incoming.rank() > current.rank() => incoming,
        _ => current,
    }
}

/// `file_processing` → `File processing`.
fn humanize(id: &str) -> String {
    let spaced = id.replace(['_', '-'], " ");
    let mut chars = spaced.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => "Unnamed step".to_string(),
    }
}

/// Ordered per-step state for one run.
#[derive(Debug, Clone)]
pub struct StepTracker {
    steps: IndexMap<String, StepState>,
}

impl Default for StepTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StepTracker {
    /// A tracker seeded with the default pipeline, all pending.
    pub fn new() -> Self {
        let steps = DEFAULT_PIPELINE
            .iter()
            .map(|(id, label)| (id.to_string(), StepState::new(id, label.to_string())))
            .collect();
        Self { steps }
    }

    /// Apply an update, creating the step when unseen.
    pub fn apply(&mut self, id: &str, update: StepUpdate, at: Timestamp) -> Transition {
        let transition = match self.steps.get_mut(id) {
            Some(step) => {
                let from = step.status;
                let to = next_status(from, update.status);
                step.status = to;
                if from == to {
                    Transition::Unchanged
                } else {
                    Transition::Advanced { from, to }
                }
            }
            None => {
                let label = update.label.clone().unwrap_or_else(|| humanize(id));
                let mut step = StepState::new(id, label);
                step.status = update.status;
                self.steps.insert(id.to_string(), step);
                Transition::Created(update.status)
            }
        };

        if let Some(step) = self.steps.get_mut(id) {
            if let Some(label) = update.label {
                step.label = label;
            }
            if update.message.is_some() {
                step.last_message = update.message;
            }
            if update.details.is_some() {
                step.details = update.details;
            }
            step.last_updated = Some(step.last_updated.map_or(at, |prev| prev.max(at)));
        }
        transition
    }

    /// Move every in-progress step to `status` (completed or failed).
    ///
    /// Returns the ids of the steps that changed.
    pub fn settle_in_progress(
        &mut self,
        status: StepStatus,
        message: Option<&str>,
        at: Timestamp,
    ) -> Vec<String> {
        let ids: Vec<String> = self
            .steps
            .values()
            .filter(|s| s.status == StepStatus::InProgress)
            .map(|s| s.id.clone())
            .collect();
        for id in &ids {
            let update = StepUpdate {
                status,
                message: message.map(str::to_string),
                ..Default::default()
            };
            self.apply(id, update, at);
        }
        ids
    }

    pub fn get(&self, id: &str) -> Option<&StepState> {
        self.steps.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StepState> {
        self.steps.values()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn t(secs: i64) -> Timestamp {
        Utc.timestamp_opt(1_770_000_000 + secs, 0).unwrap()
    }

    // -- next_status policy --

    #[test]
    fn upgrades_follow_rank() {
        assert_eq!(
            next_status(StepStatus::Pending, StepStatus::InProgress),
            StepStatus::InProgress
        );
        assert_eq!(
            next_status(StepStatus::InProgress, StepStatus::Completed),
            StepStatus::Completed
        );
        assert_eq!(
            next_status(StepStatus::InProgress, StepStatus::Pending),
            StepStatus::InProgress
        );
    }

    #[test]
    fn completed_never_regresses_or_fails() {
        for incoming in [
            StepStatus::Pending,
            StepStatus::InProgress,
            StepStatus::Failed,
        ] {
            assert_eq!(
                next_status(StepStatus::Completed, incoming),
                StepStatus::Completed
            );
        }
    }

    #[test]
    fn failed_short_circuits_from_pending() {
        assert_eq!(
            next_status(StepStatus::Pending, StepStatus::Failed),
            StepStatus::Failed
        );
        assert_eq!(
            next_status(StepStatus::Failed, StepStatus::Completed),
            StepStatus::Failed
        );
    }

    // -- StepTracker --

    #[test]
    fn seeded_in_pipeline_order() {
        let tracker = StepTracker::new();
        let ids: Vec<&str> = tracker.iter().map(|s| s.id.as_str()).collect();
        let expected: Vec<&str> = DEFAULT_PIPELINE.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, expected);
        assert!(tracker.iter().all(|s| s.status == StepStatus::Pending));
    }

    #[test]
    fn unseen_step_created_with_incoming_status() {
        let mut tracker = StepTracker::new();
        let tr = tracker.apply(
            "ticket_sync",
            StepUpdate::status(StepStatus::InProgress),
            t(0),
        );
        assert_eq!(tr, Transition::Created(StepStatus::InProgress));
        let step = tracker.get("ticket_sync").unwrap();
        assert_eq!(step.label, "Ticket sync");
        assert_eq!(tracker.iter().last().unwrap().id, "ticket_sync");
    }

    #[test]
    fn message_updates_without_status_change() {
        let mut tracker = StepTracker::new();
        tracker.apply("chunking", StepUpdate::status(StepStatus::Completed), t(0));
        let tr = tracker.apply(
            "chunking",
            StepUpdate::status(StepStatus::InProgress).with_message("late message"),
            t(5),
        );
        assert_eq!(tr, Transition::Unchanged);
        let step = tracker.get("chunking").unwrap();
        assert_eq!(step.status, StepStatus::Completed);
        assert_eq!(step.last_message.as_deref(), Some("late message"));
        assert_eq!(step.last_updated, Some(t(5)));
    }

    #[test]
    fn last_updated_never_moves_backwards() {
        let mut tracker = StepTracker::new();
        tracker.apply("analysis", StepUpdate::status(StepStatus::InProgress), t(10));
        tracker.apply("analysis", StepUpdate::status(StepStatus::InProgress), t(3));
        assert_eq!(tracker.get("analysis").unwrap().last_updated, Some(t(10)));
    }

    #[test]
    fn settle_in_progress_only_touches_running_steps() {
        let mut tracker = StepTracker::new();
        tracker.apply("chunking", StepUpdate::status(StepStatus::Completed), t(0));
        tracker.apply("analysis", StepUpdate::status(StepStatus::InProgress), t(1));
        let changed = tracker.settle_in_progress(StepStatus::Failed, Some("boom"), t(2));
        assert_eq!(changed, vec!["analysis".to_string()]);
        assert_eq!(tracker.get("analysis").unwrap().status, StepStatus::Failed);
        assert_eq!(tracker.get("chunking").unwrap().status, StepStatus::Completed);
        assert_eq!(tracker.get("report").unwrap().status, StepStatus::Pending);
    }
}
