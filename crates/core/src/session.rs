//! One job's sync session as a pure state machine.
//!
//! [`SyncSession::handle`] takes a [`SessionInput`] plus the current time and
//! returns the [`Effect`]s the caller must carry out: open or close the push
//! channel, arm timers, fetch, run a command. Results of that work come back
//! as further inputs tagged with the generation that requested them; inputs
//! from an older generation are dropped without touching state.

use std::time::Duration;

use serde::Serialize;

use crate::activity::ActivityLevel;
use crate::channel::ChannelMessage;
use crate::commands::{Command, CommandDispatcher, CommandKind, CommandOutcome};
use crate::config::SyncConfig;
use crate::connection::ConnectionManager;
use crate::error::{CommandError, SyncError};
use crate::event::JobEvent;
use crate::poll::{PollDriver, PollTick};
use crate::reconciler::EventReconciler;
use crate::snapshot::JobSnapshot;
use crate::types::{JobId, Timestamp};
use crate::view::{ConnectionHealth, ProgressView};

/// Why a fetch was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchPurpose {
    /// One-shot catch-up after the push channel opened.
    CatchUp,
    /// A poll-fallback cycle.
    Poll,
}

/// Snapshot plus the newest-first event list from one pull.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchBatch {
    pub snapshot: JobSnapshot,
    pub events: Vec<JobEvent>,
}

#[derive(Debug, Clone)]
pub enum SessionInput {
    Start,
    PushOpened {
        generation: u64,
        attempt: u32,
    },
    PushMessage {
        generation: u64,
        attempt: u32,
        message: ChannelMessage,
    },
    PushFailed {
        generation: u64,
        attempt: u32,
        reason: String,
    },
    PushUnsupported {
        generation: u64,
    },
    ReopenTimerFired {
        generation: u64,
    },
    PollTimerFired {
        generation: u64,
    },
    FetchCompleted {
        generation: u64,
        purpose: FetchPurpose,
        result: Result<FetchBatch, String>,
    },
    Tick,
    CommandRequested(Command),
    /// Not generation-gated: the command lock must always release.
    CommandCompleted {
        kind: CommandKind,
        result: Result<String, CommandError>,
    },
    ManualReconnect,
    Teardown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    OpenPush { attempt: u32 },
    ClosePush,
    ScheduleReopen(Duration),
    SchedulePoll(Duration),
    CancelPoll,
    Fetch(FetchPurpose),
    ExecuteCommand(Command),
    /// Report a command's final outcome to whoever requested it.
    CommandFinished(CommandOutcome),
    /// Abort every timer and fetch owned by the current generation.
    CancelTimers,
    StartClock,
    StopClock,
}

/// Coarse lifecycle of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Active,
    /// Job reached a terminal status; channels are closed.
    Finished,
    /// Poll ceiling reached; waiting for a manual reconnect.
    Stalled,
    TornDown,
}

#[derive(Debug, Clone)]
pub struct SyncSession {
    job_id: JobId,
    config: SyncConfig,
    generation: u64,
    phase: SessionPhase,
    clock_running: bool,
    connection: ConnectionManager,
    poll: PollDriver,
    reconciler: EventReconciler,
    commands: CommandDispatcher,
    last_error: Option<SyncError>,
}

impl SyncSession {
    pub fn new(job_id: impl Into<JobId>, config: SyncConfig) -> Self {
        let connection = ConnectionManager::new(config.reopen_delay, config.fast_reopen_delay);
        let poll = PollDriver::new(
            config.poll_base_interval,
            config.poll_max_interval,
            config.max_poll_cycles,
        );
        let reconciler = EventReconciler::new(config.activity_capacity);
        Self {
            job_id: job_id.into(),
            config,
            generation: 0,
            phase: SessionPhase::Idle,
            clock_running: false,
            connection,
            poll,
            reconciler,
            commands: CommandDispatcher::new(),
            last_error: None,
        }
    }

    // ---- accessors ----

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn poll(&self) -> &PollDriver {
        &self.poll
    }

    pub fn reconciler(&self) -> &EventReconciler {
        &self.reconciler
    }

    pub fn commands(&self) -> &CommandDispatcher {
        &self.commands
    }

    pub fn last_error(&self) -> Option<&SyncError> {
        self.last_error.as_ref()
    }

    pub fn health(&self) -> ConnectionHealth {
        ConnectionHealth::assess(self)
    }

    pub fn view(&self) -> ProgressView {
        ProgressView::build(self)
    }

    // ---- update ----

    pub fn handle(&mut self, input: SessionInput, now: Timestamp) -> Vec<Effect> {
        if self.phase == SessionPhase::TornDown {
            return match input {
                SessionInput::CommandRequested(command) => {
                    vec![finished(command.kind(), Err(CommandError::SessionClosed))]
                }
                _ => Vec::new(),
            };
        }
        if let Some(generation) = input_generation(&input) {
            if generation != self.generation {
                tracing::trace!(
                    generation,
                    current = self.generation,
                    "Dropping input from stale generation"
                );
                return Vec::new();
            }
        }

        let mut effects = match input {
            SessionInput::Start => self.start(now),
            SessionInput::PushOpened { attempt, .. } => self.on_push_opened(attempt, now),
            SessionInput::PushMessage {
                attempt, message, ..
            } => self.on_push_message(attempt, message, now),
            SessionInput::PushFailed {
                attempt, reason, ..
            } => {
                if !self.connection.is_current(attempt) {
                    return Vec::new();
                }
                self.on_push_failed(&reason, now)
            }
            SessionInput::PushUnsupported { .. } => self.on_push_unsupported(now),
            SessionInput::ReopenTimerFired { .. } => {
                if self.phase != SessionPhase::Active {
                    return Vec::new();
                }
                self.connection.on_reopen_timer()
            }
            SessionInput::PollTimerFired { .. } => self.on_poll_timer(now),
            SessionInput::FetchCompleted {
                purpose, result, ..
            } => self.on_fetch_completed(purpose, result, now),
            SessionInput::Tick => {
                self.reconciler.tick(now);
                Vec::new()
            }
            SessionInput::CommandRequested(command) => self.on_command_requested(command, now),
            SessionInput::CommandCompleted { kind, result } => {
                self.on_command_completed(kind, result, now)
            }
            SessionInput::ManualReconnect => self.on_manual_reconnect(now),
            SessionInput::Teardown => self.teardown(),
        };
        effects.extend(self.check_terminal(now));
        effects
    }

    fn start(&mut self, now: Timestamp) -> Vec<Effect> {
        if self.phase != SessionPhase::Idle {
            return Vec::new();
        }
        tracing::info!(job_id = %self.job_id, generation = self.generation, "Starting sync session");
        self.phase = SessionPhase::Active;
        self.reconciler.tick(now);
        let mut effects = self.start_clock();
        effects.extend(self.connection.open());
        effects
    }

    fn on_push_opened(&mut self, attempt: u32, now: Timestamp) -> Vec<Effect> {
        if !self.connection.is_current(attempt) || self.phase != SessionPhase::Active {
            return Vec::new();
        }
        let first = !self.connection.has_opened();
        let restored = self.connection.on_opened();
        if restored {
            tracing::info!(job_id = %self.job_id, attempt, "Live updates restored");
            self.reconciler
                .note(now, ActivityLevel::Success, "Live updates restored");
        } else if first {
            tracing::info!(job_id = %self.job_id, attempt, "Live updates connected");
            self.reconciler
                .note(now, ActivityLevel::Info, "Connected to live updates");
        }
        let mut effects = self.poll.deactivate();
        effects.push(Effect::Fetch(FetchPurpose::CatchUp));
        effects
    }

    fn on_push_message(
        &mut self,
        attempt: u32,
        message: ChannelMessage,
        now: Timestamp,
    ) -> Vec<Effect> {
        if !self.connection.is_current(attempt) || self.phase != SessionPhase::Active {
            return Vec::new();
        }
        match message {
            ChannelMessage::ConnectionInfo(info) => {
                self.reconciler.apply_connection_info(&info, now);
                Vec::new()
            }
            ChannelMessage::JobEvent(event) => {
                self.reconciler.ingest(&event, now);
                Vec::new()
            }
            ChannelMessage::Heartbeat(heartbeat) => {
                self.reconciler.apply_heartbeat(&heartbeat, now);
                Vec::new()
            }
            ChannelMessage::ConnectionReset(reset) => {
                let reason = reset.reason.unwrap_or_else(|| "server restart".to_string());
                tracing::info!(job_id = %self.job_id, reason = %reason, "Push channel reset by server");
                self.reconciler.note(
                    now,
                    ActivityLevel::Info,
                    format!("Live updates restarting ({reason})"),
                );
                let mut effects = self.connection.on_reset();
                effects.extend(self.poll.activate());
                effects
            }
            ChannelMessage::Error(err) => {
                let reason = err
                    .message
                    .unwrap_or_else(|| "stream error".to_string());
                let mut effects = vec![Effect::ClosePush];
                effects.extend(self.on_push_failed(&reason, now));
                effects
            }
        }
    }

    fn on_push_failed(&mut self, reason: &str, now: Timestamp) -> Vec<Effect> {
        if self.phase != SessionPhase::Active {
            return Vec::new();
        }
        let outcome = self.connection.on_failed(reason);
        if outcome.warn {
            tracing::warn!(job_id = %self.job_id, error = %reason, "Live updates interrupted, polling for progress");
            self.reconciler.note(
                now,
                ActivityLevel::Warning,
                "Live updates interrupted; polling for progress",
            );
        }
        self.last_error = Some(SyncError::Transport(reason.to_string()));
        let mut effects = outcome.effects;
        effects.extend(self.poll.activate());
        effects
    }

    fn on_push_unsupported(&mut self, now: Timestamp) -> Vec<Effect> {
        if self.phase != SessionPhase::Active {
            return Vec::new();
        }
        tracing::warn!(job_id = %self.job_id, "Push channel unsupported, polling only");
        self.connection.on_unsupported();
        self.reconciler.note(
            now,
            ActivityLevel::Warning,
            "Live updates unavailable; polling for progress",
        );
        self.poll.activate()
    }

    fn on_poll_timer(&mut self, now: Timestamp) -> Vec<Effect> {
        if self.phase != SessionPhase::Active {
            return Vec::new();
        }
        match self.poll.on_timer() {
            PollTick::Fetch(effect) => vec![effect],
            PollTick::Idle => Vec::new(),
            PollTick::Stalled { cycles } => {
                let err = SyncError::Stalled { cycles };
                tracing::error!(job_id = %self.job_id, cycles, "Sync stalled");
                self.reconciler.note(
                    now,
                    ActivityLevel::Error,
                    format!("{err}; reconnect to resume"),
                );
                self.last_error = Some(err);
                self.phase = SessionPhase::Stalled;
                let mut effects = self.connection.close();
                effects.push(Effect::CancelTimers);
                effects
            }
        }
    }

    fn on_fetch_completed(
        &mut self,
        purpose: FetchPurpose,
        result: Result<FetchBatch, String>,
        now: Timestamp,
    ) -> Vec<Effect> {
        if !matches!(self.phase, SessionPhase::Active | SessionPhase::Stalled) {
            return Vec::new();
        }
        let success = result.is_ok();
        match result {
            Ok(batch) => {
                let summary = self.reconciler.ingest_batch(batch.events, now);
                tracing::debug!(
                    job_id = %self.job_id,
                    purpose = ?purpose,
                    applied = summary.applied,
                    skipped = summary.skipped,
                    "Applied pulled events"
                );
                self.reconciler.apply_snapshot(&batch.snapshot, now);
            }
            Err(reason) => {
                let err = SyncError::Poll(reason);
                match purpose {
                    FetchPurpose::CatchUp => {
                        tracing::warn!(job_id = %self.job_id, error = %err, "Catch-up fetch failed");
                    }
                    FetchPurpose::Poll => {
                        let failures = self.poll.consecutive_failures() + 1;
                        if crate::backoff::should_report_failure(
                            failures,
                            self.config.poll_error_report_every,
                        ) {
                            tracing::warn!(job_id = %self.job_id, failures, error = %err, "Poll failed");
                            self.reconciler.note(
                                now,
                                ActivityLevel::Warning,
                                format!("{err} ({failures} in a row)"),
                            );
                        } else {
                            tracing::debug!(job_id = %self.job_id, failures, error = %err, "Poll failed");
                        }
                    }
                }
                self.last_error = Some(err);
            }
        }
        match purpose {
            FetchPurpose::Poll => self.poll.on_result(success),
            FetchPurpose::CatchUp => Vec::new(),
        }
    }

    fn on_command_requested(&mut self, command: Command, now: Timestamp) -> Vec<Effect> {
        let kind = command.kind();
        if let Err(err) = self.commands.begin(&command, self.reconciler.tracker().status()) {
            tracing::info!(job_id = %self.job_id, command = %kind, error = %err, "Command refused");
            self.reconciler
                .note(now, ActivityLevel::Warning, err.to_string());
            return vec![finished(kind, Err(err))];
        }
        tracing::info!(job_id = %self.job_id, command = %kind, "Sending command");
        vec![Effect::ExecuteCommand(command)]
    }

    fn on_command_completed(
        &mut self,
        kind: CommandKind,
        result: Result<String, CommandError>,
        now: Timestamp,
    ) -> Vec<Effect> {
        if !self.commands.finish(kind) {
            return Vec::new();
        }
        let mut effects = Vec::new();
        match &result {
            Ok(message) => {
                tracing::info!(job_id = %self.job_id, command = %kind, "Command accepted");
                let text = if message.is_empty() {
                    format!("{} request accepted", capitalize(kind.as_str()))
                } else {
                    message.clone()
                };
                self.reconciler.note(now, ActivityLevel::Success, text);
                if kind == CommandKind::Retry {
                    effects.extend(self.reset_for_retry(now));
                }
            }
            Err(err) => {
                tracing::warn!(job_id = %self.job_id, command = %kind, error = %err, "Command failed");
                self.reconciler.note(
                    now,
                    ActivityLevel::Error,
                    format!("{} failed: {err}", capitalize(kind.as_str())),
                );
                self.last_error = Some(SyncError::Command(err.clone()));
            }
        }
        effects.push(finished(kind, result));
        effects
    }

    fn on_manual_reconnect(&mut self, now: Timestamp) -> Vec<Effect> {
        if !matches!(self.phase, SessionPhase::Active | SessionPhase::Stalled) {
            return Vec::new();
        }
        self.generation += 1;
        tracing::info!(job_id = %self.job_id, generation = self.generation, "Manual reconnect");
        self.reconciler
            .note(now, ActivityLevel::Info, "Reconnecting to live updates");
        self.phase = SessionPhase::Active;
        self.last_error = None;
        self.poll.reset();
        self.connection.reset();

        let mut effects = vec![Effect::CancelTimers, Effect::ClosePush];
        effects.extend(self.start_clock());
        effects.extend(self.connection.open());
        effects
    }

    /// A confirmed retry starts a new run under the same job id.
    fn reset_for_retry(&mut self, now: Timestamp) -> Vec<Effect> {
        self.generation += 1;
        tracing::info!(job_id = %self.job_id, generation = self.generation, "Resetting session for retry");
        self.reconciler.reset();
        self.reconciler
            .note(now, ActivityLevel::Info, "Retry started a new run");
        self.poll.reset();
        self.connection.reset();
        self.phase = SessionPhase::Active;
        self.last_error = None;

        let mut effects = vec![Effect::CancelTimers, Effect::ClosePush];
        effects.extend(self.start_clock());
        effects.extend(self.connection.open());
        effects
    }

    fn teardown(&mut self) -> Vec<Effect> {
        tracing::info!(job_id = %self.job_id, "Tearing down sync session");
        self.phase = SessionPhase::TornDown;
        self.commands.clear();
        let mut effects = self.connection.close();
        effects.extend(self.poll.stop());
        effects.push(Effect::CancelTimers);
        effects.extend(self.stop_clock());
        effects
    }

    /// Close everything once the job is terminal.
    fn check_terminal(&mut self, now: Timestamp) -> Vec<Effect> {
        if !self.reconciler.tracker().is_terminal()
            || !matches!(self.phase, SessionPhase::Active | SessionPhase::Stalled)
        {
            return Vec::new();
        }
        let status = self.reconciler.tracker().status();
        tracing::info!(job_id = %self.job_id, status = %status, "Job finished, closing channels");
        self.phase = SessionPhase::Finished;
        self.reconciler.tick(now);
        let mut effects = self.connection.close();
        effects.extend(self.poll.stop());
        effects.push(Effect::CancelTimers);
        effects.extend(self.stop_clock());
        effects
    }

    fn start_clock(&mut self) -> Vec<Effect> {
        if self.clock_running {
            return Vec::new();
        }
        self.clock_running = true;
        vec![Effect::StartClock]
    }

    fn stop_clock(&mut self) -> Vec<Effect> {
        if !self.clock_running {
            return Vec::new();
        }
        self.clock_running = false;
        vec![Effect::StopClock]
    }
}

fn input_generation(input: &SessionInput) -> Option<u64> {
    match input {
        SessionInput::PushOpened { generation, .. }
        | SessionInput::PushMessage { generation, .. }
        | SessionInput::PushFailed { generation, .. }
        | SessionInput::PushUnsupported { generation }
        | SessionInput::ReopenTimerFired { generation }
        | SessionInput::PollTimerFired { generation }
        | SessionInput::FetchCompleted { generation, .. } => Some(*generation),
        _ => None,
    }
}

fn finished(kind: CommandKind, result: Result<String, CommandError>) -> Effect {
    Effect::CommandFinished(CommandOutcome { kind, result })
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
