//! Reconciled job state and the handlers that mutate it.
//!
//! [`JobTracker`] is fed only by the reconciler (for events) and the session
//! (for snapshots, heartbeats and connection info). Every handler is
//! content-idempotent: re-applying the same information changes nothing and
//! writes no activity entries. Once the run status is terminal, nothing but
//! the local clock reads from it.

use serde::Serialize;

use crate::activity::{ActivityLevel, ActivityLog};
use crate::channel::{ConnectionInfo, Heartbeat};
use crate::event::{EventKind, FileCompleted, FileStarted, JobEvent, PhaseUpdate, ProgressUpdate};
use crate::files::{FileChange, FileStatus, FileTracker};
use crate::snapshot::JobSnapshot;
use crate::status::{JobStatus, StepStatus};
use crate::steps::{
    StepTracker, StepUpdate, Transition, DEFAULT_PROGRESS_STEP, FILE_STEP, PREPARATION_STEP,
    TERMINAL_STEP,
};
use crate::timing::TimingEstimator;
use crate::types::Timestamp;

/// Run-level numbers shown in the header.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRunState {
    pub status: JobStatus,
    pub started_at: Option<Timestamp>,
    pub elapsed_seconds: Option<u64>,
    pub eta_seconds: Option<u64>,
    pub progress_percentage: f64,
}

/// Result of handing one event to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Applied,
    /// The run is terminal; the event was dropped.
    Frozen,
    /// Unknown event type; nothing to do.
    Ignored,
}

#[derive(Debug, Clone)]
pub struct JobTracker {
    status: JobStatus,
    /// Time of the event behind the last status change, if known.
    status_at: Option<Timestamp>,
    progress: f64,
    terminal_message: Option<String>,
    last_heartbeat_at: Option<Timestamp>,
    steps: StepTracker,
    files: FileTracker,
    timing: TimingEstimator,
    activity: ActivityLog,
}

impl JobTracker {
    pub fn new(activity_capacity: usize) -> Self {
        Self {
            status: JobStatus::Idle,
            status_at: None,
            progress: 0.0,
            terminal_message: None,
            last_heartbeat_at: None,
            steps: StepTracker::new(),
            files: FileTracker::new(),
            timing: TimingEstimator::new(),
            activity: ActivityLog::with_capacity(activity_capacity),
        }
    }

    /// Forget the current run but keep the activity history.
    pub fn reset_run(&mut self) {
        self.status = JobStatus::Idle;
        self.status_at = None;
        self.progress = 0.0;
        self.terminal_message = None;
        self.last_heartbeat_at = None;
        self.steps = StepTracker::new();
        self.files = FileTracker::new();
        self.timing = TimingEstimator::new();
    }

    // ---- accessors ----

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn terminal_message(&self) -> Option<&str> {
        self.terminal_message.as_deref()
    }

    pub fn last_heartbeat_at(&self) -> Option<Timestamp> {
        self.last_heartbeat_at
    }

    pub fn steps(&self) -> &StepTracker {
        &self.steps
    }

    pub fn files(&self) -> &FileTracker {
        &self.files
    }

    pub fn timing(&self) -> &TimingEstimator {
        &self.timing
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    pub fn run_state(&self) -> JobRunState {
        JobRunState {
            status: self.status,
            started_at: self.timing.started_at(),
            elapsed_seconds: self.timing.elapsed_seconds(),
            eta_seconds: self.timing.eta_seconds(),
            progress_percentage: self.progress,
        }
    }

    /// Append an activity entry that did not come from an event.
    pub fn note(&mut self, at: Timestamp, level: ActivityLevel, message: impl Into<String>) {
        self.activity.push(at, level, message);
    }

    /// Local clock tick: refresh elapsed and ETA.
    pub fn tick(&mut self, now: Timestamp) {
        self.timing.recompute(now, self.progress);
    }

    // ---- inputs ----

    /// Apply one reconciled event. `now` stands in for a missing timestamp.
    pub fn apply_event(&mut self, event: &JobEvent, now: Timestamp) -> Applied {
        if self.is_terminal() {
            return Applied::Frozen;
        }
        let at = event.timestamp();
        let when = at.unwrap_or(now);

        match event.kind() {
            EventKind::Created => {
                self.set_status(JobStatus::Queued, at, now, None);
                self.step(
                    PREPARATION_STEP,
                    StepUpdate::status(StepStatus::InProgress).with_message("Job created"),
                    when,
                );
            }
            EventKind::Ready => {
                self.set_status(JobStatus::Queued, at, now, None);
                self.step(
                    PREPARATION_STEP,
                    StepUpdate::status(StepStatus::Completed).with_message("Files ready"),
                    when,
                );
            }
            EventKind::Running => {
                self.timing.set_started(when);
                self.set_status(JobStatus::Running, at, now, None);
                self.step(
                    PREPARATION_STEP,
                    StepUpdate::status(StepStatus::Completed),
                    when,
                );
            }
            EventKind::AnalysisProgress(update) => self.on_progress(update, at, when, now),
            EventKind::FileStarted(started) => self.on_file_started(&started, at, when, now),
            EventKind::FileCompleted(done) => {
                self.ensure_running(at, when, now);
                self.on_file_completed(&done, when);
            }
            EventKind::AnalysisPhase(phase) => self.on_phase(phase, when),
            EventKind::Completed { message } => {
                self.set_status(JobStatus::Completed, at, now, message);
            }
            EventKind::Failed { error } => {
                self.set_status(JobStatus::Failed, at, now, error);
            }
            EventKind::Cancelled { reason } => {
                self.set_status(JobStatus::Cancelled, at, now, reason);
            }
            EventKind::Paused { reason } => {
                self.set_status(JobStatus::Paused, at, now, reason);
            }
            EventKind::Resumed { note } => {
                if self.status == JobStatus::Paused {
                    self.set_status(JobStatus::Running, at, now, note);
                }
            }
            EventKind::Unknown(event_type) => {
                tracing::debug!(event_type = %event_type, "Ignoring unknown event type");
                return Applied::Ignored;
            }
        }
        self.tick(now);
        Applied::Applied
    }

    /// Apply a pulled snapshot. Snapshot status is authoritative at fetch
    /// time, so it skips the event-time staleness check.
    pub fn apply_snapshot(&mut self, snapshot: &JobSnapshot, now: Timestamp) {
        if self.is_terminal() {
            return;
        }
        if let Some(started) = snapshot.started() {
            self.timing.set_started(started);
        }
        let finished_at = snapshot.completed().unwrap_or(now);
        for summary in snapshot.file_summaries() {
            self.on_file_completed(&summary, finished_at);
        }
        if let Some(status) = snapshot.job_status() {
            let at = if status.is_terminal() { snapshot.completed() } else { None };
            self.set_status(status, at, now, None);
        }
        self.tick(now);
    }

    /// Apply a heartbeat. Its status only counts when it is not older than
    /// `watermark`, since heartbeats carry no event id. Once a watermark
    /// exists an untimed heartbeat cannot be ordered and only marks liveness.
    pub fn apply_heartbeat(
        &mut self,
        heartbeat: &Heartbeat,
        watermark: Option<Timestamp>,
        now: Timestamp,
    ) {
        if self.is_terminal() {
            return;
        }
        let at = heartbeat.at();
        self.last_heartbeat_at = Some(at.unwrap_or(now));
        let stale = match (at, watermark) {
            (Some(at), Some(mark)) => at < mark,
            (None, Some(_)) => true,
            (_, None) => false,
        };
        if let (Some(status), false) = (heartbeat.job_status(), stale) {
            self.set_status(status, at, now, None);
        }
        self.tick(now);
    }

    /// Apply the initial `connection-info` snapshot from the push channel.
    pub fn apply_connection_info(&mut self, info: &ConnectionInfo, now: Timestamp) {
        if self.is_terminal() {
            return;
        }
        if let Some(started) = info.started_at.as_deref().and_then(crate::types::parse_timestamp) {
            self.timing.set_started(started);
        }
        if let Some(status) = info.job_status() {
            let at = info
                .completed_at
                .as_deref()
                .and_then(crate::types::parse_timestamp)
                .filter(|_| status.is_terminal());
            self.set_status(status, at, now, None);
        }
        self.tick(now);
    }

    // ---- handlers ----

    fn on_progress(
        &mut self,
        update: ProgressUpdate,
        at: Option<Timestamp>,
        when: Timestamp,
        now: Timestamp,
    ) {
        self.ensure_running(at, when, now);
        if let Some(progress) = update.progress {
            self.progress = progress;
        }
        self.files.observe_total(update.total_files);
        let status = update.effective_status();
        let step_id = update.step.unwrap_or_else(|| DEFAULT_PROGRESS_STEP.to_string());
        let step_update = StepUpdate {
            status,
            label: None,
            message: update.message,
            details: update.details,
        };
        self.step(&step_id, step_update, when);
        if self.terminal_step_done() {
            self.progress = 100.0;
        }
    }

    fn terminal_step_done(&self) -> bool {
        self.steps
            .get(TERMINAL_STEP)
            .is_some_and(|s| s.status == StepStatus::Completed)
    }

    fn on_phase(&mut self, phase: PhaseUpdate, when: Timestamp) {
        let step_id = phase.phase.unwrap_or_else(|| DEFAULT_PROGRESS_STEP.to_string());
        let update = StepUpdate {
            status: phase.status.unwrap_or(StepStatus::InProgress),
            label: None,
            message: phase.message,
            details: phase.details,
        };
        self.step(&step_id, update, when);
    }

    fn on_file_started(
        &mut self,
        started: &FileStarted,
        at: Option<Timestamp>,
        when: Timestamp,
        now: Timestamp,
    ) {
        self.ensure_running(at, when, now);
        let change = self.files.on_started(started, when);
        let name = started.file.name.as_deref().unwrap_or("file");
        let message = match (started.file.file_number, started.file.total_files) {
            (Some(n), Some(total)) => format!("Processing {name} ({n}/{total})"),
            _ => format!("Processing {name}"),
        };
        if matches!(change, FileChange::Created | FileChange::Started) {
            self.activity.push(when, ActivityLevel::Info, message.clone());
        }
        self.step(
            FILE_STEP,
            StepUpdate::status(StepStatus::InProgress).with_message(message),
            when,
        );
    }

    fn on_file_completed(&mut self, done: &FileCompleted, when: Timestamp) {
        let change = self.files.on_completed(done, when);
        if !done.finished {
            return;
        }
        let name = done.file.name.as_deref().unwrap_or("file");

        if let FileChange::Finished(status) = change {
            let warnings = done.warnings().unwrap_or(0);
            let (level, message) = match status {
                FileStatus::Quarantined => (
                    ActivityLevel::Warning,
                    format!("Quarantined {name}: content blocked by safety checks"),
                ),
                _ if warnings > 0 => (
                    ActivityLevel::Warning,
                    format!("Processed {name} with {warnings} validation warning(s)"),
                ),
                _ => (
                    ActivityLevel::Success,
                    format!(
                        "Processed {name}: {} chunks, {} redactions",
                        done.chunk_count.unwrap_or(0),
                        done.redaction_count.unwrap_or(0)
                    ),
                ),
            };
            self.activity.push(when, level, message);
        }

        let status = if done.file.is_last() {
            StepStatus::Completed
        } else {
            StepStatus::InProgress
        };
        let message = match (done.file.file_number, done.file.total_files) {
            (Some(n), Some(total)) => format!("Processed {name} ({n}/{total})"),
            _ => format!("Processed {name}"),
        };
        self.step(FILE_STEP, StepUpdate::status(status).with_message(message), when);
    }

    /// Apply a step update and log real status transitions.
    fn step(&mut self, id: &str, update: StepUpdate, when: Timestamp) {
        let transition = self.steps.apply(id, update, when);
        let status = match transition {
            Transition::Created(StepStatus::Pending) | Transition::Unchanged => return,
            Transition::Created(status) => status,
            Transition::Advanced { to, .. } => to,
        };
        let label = self
            .steps
            .get(id)
            .map(|s| s.label.clone())
            .unwrap_or_else(|| id.to_string());
        let (level, message) = match status {
            StepStatus::Pending => return,
            StepStatus::InProgress => (ActivityLevel::Info, format!("{label} started")),
            StepStatus::Completed => (ActivityLevel::Success, format!("{label} completed")),
            StepStatus::Failed => (ActivityLevel::Error, format!("{label} failed")),
        };
        self.activity.push(when, level, message);

        if id == TERMINAL_STEP && status == StepStatus::Completed {
            self.progress = 100.0;
        }
    }

    /// Any progress implies the run has started.
    fn ensure_running(&mut self, at: Option<Timestamp>, when: Timestamp, now: Timestamp) {
        if matches!(self.status, JobStatus::Idle | JobStatus::Queued) {
            self.timing.set_started(when);
            self.set_status(JobStatus::Running, at, now, None);
        }
    }

    /// Move the run status, enforcing monotonicity and terminal freeze.
    ///
    /// `at` is the server time behind the change; a non-terminal change
    /// older than the last applied one is ignored. Returns whether the status
    /// changed.
    fn set_status(
        &mut self,
        to: JobStatus,
        at: Option<Timestamp>,
        now: Timestamp,
        message: Option<String>,
    ) -> bool {
        let from = self.status;
        if from.is_terminal() || from == to {
            return false;
        }
        let allowed = match to {
            JobStatus::Idle => false,
            JobStatus::Queued => from == JobStatus::Idle,
            JobStatus::Running => true,
            JobStatus::Paused => matches!(from, JobStatus::Running | JobStatus::Queued),
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => true,
        };
        if !allowed {
            return false;
        }
        if !to.is_terminal() {
            if let (Some(at), Some(prev)) = (at, self.status_at) {
                if at < prev {
                    tracing::debug!(from = %from, to = %to, "Ignoring stale status change");
                    return false;
                }
            }
        }

        self.status = to;
        if let Some(at) = at {
            self.status_at = Some(self.status_at.map_or(at, |prev| prev.max(at)));
        }
        let when = at.unwrap_or(now);
        let suffix = message.as_deref().map(|m| format!(": {m}")).unwrap_or_default();
        let (level, text) = match to {
            JobStatus::Idle => (ActivityLevel::Info, "Job idle".to_string()),
            JobStatus::Queued => (ActivityLevel::Info, "Job queued".to_string()),
            JobStatus::Running if from == JobStatus::Paused => {
                (ActivityLevel::Info, format!("Job resumed{suffix}"))
            }
            JobStatus::Running => (ActivityLevel::Info, "Job running".to_string()),
            JobStatus::Paused => (ActivityLevel::Warning, format!("Job paused{suffix}")),
            JobStatus::Completed => (ActivityLevel::Success, format!("Job completed{suffix}")),
            JobStatus::Failed => (ActivityLevel::Error, format!("Job failed{suffix}")),
            JobStatus::Cancelled => (ActivityLevel::Warning, format!("Job cancelled{suffix}")),
        };
        self.activity.push(when, level, text);
        tracing::info!(from = %from, to = %to, "Job status changed");

        if to.is_terminal() {
            self.finish(to, when, message);
        }
        true
    }

    fn finish(&mut self, status: JobStatus, at: Timestamp, message: Option<String>) {
        match status {
            JobStatus::Completed => {
                self.step(TERMINAL_STEP, StepUpdate::status(StepStatus::Completed), at);
                self.steps.settle_in_progress(StepStatus::Completed, None, at);
                self.progress = 100.0;
            }
            JobStatus::Failed => {
                self.steps
                    .settle_in_progress(StepStatus::Failed, message.as_deref(), at);
            }
            _ => {}
        }
        self.terminal_message = message;
        self.timing.freeze(at);
        self.timing.recompute(at, self.progress);
    }
}
