//! Read-only projection of a session for display and export.
//!
//! Everything here is derived from reconciled state on demand; nothing is
//! cached between builds.

use serde::Serialize;

use crate::activity::ActivityEntry;
use crate::commands::CommandKind;
use crate::files::{FileProgressEntry, FileStats, SecurityStats};
use crate::session::{SessionPhase, SyncSession};
use crate::status::{ConnectionState, HealthLevel, JobStatus};
use crate::steps::StepState;
use crate::timing::format_optional;
use crate::tracker::JobRunState;
use crate::types::{JobId, Timestamp};

/// Connection health with a reason fit for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionHealth {
    pub level: HealthLevel,
    pub reason: String,
    /// Automatic recovery is exhausted; the operator has to reconnect.
    pub needs_manual_retry: bool,
}

impl ConnectionHealth {
    fn new(level: HealthLevel, reason: impl Into<String>) -> Self {
        Self {
            level,
            reason: reason.into(),
            needs_manual_retry: false,
        }
    }

    pub fn assess(session: &SyncSession) -> Self {
        let poll = session.poll();
        match session.phase() {
            SessionPhase::Idle => return Self::new(HealthLevel::Degraded, "Not started"),
            SessionPhase::TornDown => return Self::new(HealthLevel::Failed, "Session closed"),
            SessionPhase::Finished => return Self::new(HealthLevel::Healthy, "Job finished"),
            SessionPhase::Stalled => {
                return Self {
                    level: HealthLevel::Failed,
                    reason: format!(
                        "No final status after {} poll cycles; reconnect to resume",
                        poll.cycles()
                    ),
                    needs_manual_retry: true,
                }
            }
            SessionPhase::Active => {}
        }

        let failures = poll.consecutive_failures();
        if poll.is_active() && failures > 0 {
            return Self::new(
                HealthLevel::Degraded,
                format!("Polling failing ({failures} in a row), retrying"),
            );
        }
        match session.connection().state() {
            ConnectionState::Open => Self::new(HealthLevel::Healthy, "Live updates connected"),
            ConnectionState::Unsupported => Self::new(
                HealthLevel::Degraded,
                "Live updates unavailable; polling for progress",
            ),
            ConnectionState::Error | ConnectionState::Closed => Self::new(
                HealthLevel::Degraded,
                "Live updates interrupted; polling for progress",
            ),
            ConnectionState::Idle | ConnectionState::Connecting => {
                Self::new(HealthLevel::Degraded, "Connecting to live updates")
            }
        }
    }
}

/// Everything a progress screen shows for one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressView {
    pub job_id: JobId,
    pub generation: u64,
    pub phase: SessionPhase,
    pub status: JobStatus,
    pub status_label: &'static str,
    pub progress: f64,
    pub elapsed: String,
    pub eta: String,
    pub run: JobRunState,
    pub terminal_message: Option<String>,
    pub steps: Vec<StepState>,
    pub files: Vec<FileProgressEntry>,
    pub file_stats: FileStats,
    pub security_stats: SecurityStats,
    pub activity: Vec<ActivityEntry>,
    pub connection: ConnectionState,
    pub polling: bool,
    pub health: ConnectionHealth,
    pub command_in_flight: Option<CommandKind>,
    pub last_heartbeat_at: Option<Timestamp>,
    pub watermark: Option<Timestamp>,
    pub duplicates_skipped: u64,
}

impl ProgressView {
    pub fn build(session: &SyncSession) -> Self {
        let reconciler = session.reconciler();
        let tracker = reconciler.tracker();
        let run = tracker.run_state();
        Self {
            job_id: session.job_id().to_string(),
            generation: session.generation(),
            phase: session.phase(),
            status: run.status,
            status_label: run.status.label(),
            progress: run.progress_percentage,
            elapsed: format_optional(run.elapsed_seconds),
            eta: format_optional(run.eta_seconds),
            run,
            terminal_message: tracker.terminal_message().map(str::to_string),
            steps: tracker.steps().iter().cloned().collect(),
            files: tracker.files().ordered().into_iter().cloned().collect(),
            file_stats: tracker.files().stats(),
            security_stats: tracker.files().security_stats(),
            activity: tracker.activity().iter().cloned().collect(),
            connection: session.connection().state(),
            polling: session.poll().is_active(),
            health: ConnectionHealth::assess(session),
            command_in_flight: session.commands().in_flight(),
            last_heartbeat_at: tracker.last_heartbeat_at(),
            watermark: reconciler.watermark(),
            duplicates_skipped: reconciler.duplicates(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Progress rounded for display, e.g. `42%`.
    pub fn progress_label(&self) -> String {
        format!("{:.0}%", self.progress.clamp(0.0, 100.0))
    }
}
