//! Async runner for one [`SyncSession`].
//!
//! The driver owns the session on a single task and is the only code that
//! mutates it. Inputs arrive through one `tokio::select!` loop: results from
//! spawned work (push frames, timers, fetches, commands) on an mpsc inbox,
//! operator requests on a control channel, and the local clock. Every
//! spawned task carries the session generation it was started for and a
//! [`CancellationToken`] derived from it, so a reset both aborts outstanding
//! work and makes any late result a no-op.
//!
//! The current [`ProgressView`] is published on a `watch` channel after
//! every input.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use jobwatch_core::commands::Command;
use jobwatch_core::config::SyncConfig;
use jobwatch_core::error::CommandError;
use jobwatch_core::export;
use jobwatch_core::session::{Effect, FetchBatch, FetchPurpose, SessionInput, SyncSession};
use jobwatch_core::view::ProgressView;

use crate::api::{ApiError, JobBackend};
use crate::stream::{PushConnector, PushError};

/// Shortest clock tick the driver will arm.
const MIN_CLOCK_TICK: Duration = Duration::from_millis(10);

/// Capacity of the operator control channel.
const CONTROL_CAPACITY: usize = 16;

type CommandReply = oneshot::Sender<Result<String, CommandError>>;

enum Control {
    Command(Command, CommandReply),
    Reconnect,
    Shutdown,
}

/// Cloneable handle to a running [`SyncDriver`].
#[derive(Clone)]
pub struct SyncHandle {
    control: mpsc::Sender<Control>,
    view: watch::Receiver<ProgressView>,
}

impl SyncHandle {
    /// Latest published view.
    pub fn view(&self) -> ProgressView {
        self.view.borrow().clone()
    }

    /// A receiver that is notified whenever the view is republished.
    pub fn subscribe(&self) -> watch::Receiver<ProgressView> {
        self.view.clone()
    }

    pub async fn pause(&self, reason: Option<String>) -> Result<String, CommandError> {
        self.command(Command::Pause { reason }).await
    }

    pub async fn resume(&self, note: Option<String>) -> Result<String, CommandError> {
        self.command(Command::Resume { note }).await
    }

    pub async fn cancel(&self, reason: Option<String>) -> Result<String, CommandError> {
        self.command(Command::Cancel { reason }).await
    }

    pub async fn retry(&self) -> Result<String, CommandError> {
        self.command(Command::Retry).await
    }

    /// Send `command` and wait for the controller's verdict.
    ///
    /// Resolves once the command is confirmed or rejected; the view only
    /// changes when the resulting event arrives.
    pub async fn command(&self, command: Command) -> Result<String, CommandError> {
        let (tx, rx) = oneshot::channel();
        self.control
            .send(Control::Command(command, tx))
            .await
            .map_err(|_| CommandError::SessionClosed)?;
        rx.await.map_err(|_| CommandError::SessionClosed)?
    }

    /// Restart the push channel and the poll fallback, clearing a stall.
    pub async fn reconnect(&self) -> Result<(), CommandError> {
        self.control
            .send(Control::Reconnect)
            .await
            .map_err(|_| CommandError::SessionClosed)
    }

    /// Text export of the current view.
    pub fn export(&self) -> String {
        export::render(&self.view(), Utc::now())
    }

    /// Tear the session down. Returns once the request is queued.
    pub async fn shutdown(&self) {
        let _ = self.control.send(Control::Shutdown).await;
    }
}

pub struct SyncDriver {
    session: SyncSession,
    backend: Arc<dyn JobBackend>,
    connector: Arc<dyn PushConnector>,
    inbox_tx: mpsc::UnboundedSender<SessionInput>,
    inbox_rx: mpsc::UnboundedReceiver<SessionInput>,
    control_rx: mpsc::Receiver<Control>,
    view_tx: watch::Sender<ProgressView>,
    /// Cancelled on shutdown; parent of everything else.
    root: CancellationToken,
    /// Cancelled whenever the session drops its timers.
    generation_token: CancellationToken,
    push_token: Option<CancellationToken>,
    poll_token: Option<CancellationToken>,
    clock: Option<Interval>,
    /// Reply slot for the command currently in flight.
    pending_reply: Option<CommandReply>,
}

impl SyncDriver {
    pub fn new(
        job_id: impl Into<String>,
        config: SyncConfig,
        backend: Arc<dyn JobBackend>,
        connector: Arc<dyn PushConnector>,
    ) -> (Self, SyncHandle) {
        let session = SyncSession::new(job_id, config);
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
        let (view_tx, view_rx) = watch::channel(session.view());
        let root = CancellationToken::new();
        let generation_token = root.child_token();

        let driver = Self {
            session,
            backend,
            connector,
            inbox_tx,
            inbox_rx,
            control_rx,
            view_tx,
            root,
            generation_token,
            push_token: None,
            poll_token: None,
            clock: None,
            pending_reply: None,
        };
        let handle = SyncHandle {
            control: control_tx,
            view: view_rx,
        };
        (driver, handle)
    }

    /// Build a driver and run it on a new task.
    pub fn spawn(
        job_id: impl Into<String>,
        config: SyncConfig,
        backend: Arc<dyn JobBackend>,
        connector: Arc<dyn PushConnector>,
    ) -> (SyncHandle, JoinHandle<()>) {
        let (driver, handle) = Self::new(job_id, config, backend, connector);
        (handle, tokio::spawn(driver.run()))
    }

    /// Run until shutdown is requested or every handle is dropped.
    pub async fn run(mut self) {
        tracing::info!(job_id = %self.session.job_id(), "Sync driver started");
        self.apply(SessionInput::Start, None);

        loop {
            tokio::select! {
                Some(input) = self.inbox_rx.recv() => self.apply(input, None),
                control = self.control_rx.recv() => match control {
                    Some(Control::Command(command, reply)) => {
                        self.apply(SessionInput::CommandRequested(command), Some(reply));
                    }
                    Some(Control::Reconnect) => self.apply(SessionInput::ManualReconnect, None),
                    Some(Control::Shutdown) | None => break,
                },
                _ = next_tick(&mut self.clock) => self.apply(SessionInput::Tick, None),
            }
        }

        self.apply(SessionInput::Teardown, None);
        self.root.cancel();
        tracing::info!(job_id = %self.session.job_id(), "Sync driver stopped");
    }

    /// Feed one input to the session, carry out its effects, publish.
    fn apply(&mut self, input: SessionInput, reply: Option<CommandReply>) {
        let effects = self.session.handle(input, Utc::now());
        // Publish before any command reply goes out.
        self.view_tx.send_replace(self.session.view());
        let mut reply = reply;
        for effect in effects {
            self.execute(effect, &mut reply);
        }
        if let Some(reply) = reply {
            let _ = reply.send(Err(CommandError::SessionClosed));
        }
    }

    fn execute(&mut self, effect: Effect, reply: &mut Option<CommandReply>) {
        let generation = self.session.generation();
        match effect {
            Effect::OpenPush { attempt } => self.open_push(generation, attempt),
            Effect::ClosePush => {
                if let Some(token) = self.push_token.take() {
                    token.cancel();
                }
            }
            Effect::ScheduleReopen(delay) => {
                tracing::debug!(generation, delay_ms = delay.as_millis() as u64, "Reopen scheduled");
                let token = self.generation_token.clone();
                self.spawn_timer(delay, token, SessionInput::ReopenTimerFired { generation });
            }
            Effect::SchedulePoll(delay) => {
                let token = self.generation_token.child_token();
                if let Some(old) = self.poll_token.replace(token.clone()) {
                    old.cancel();
                }
                self.spawn_timer(delay, token, SessionInput::PollTimerFired { generation });
            }
            Effect::CancelPoll => {
                if let Some(token) = self.poll_token.take() {
                    token.cancel();
                }
            }
            Effect::Fetch(purpose) => self.spawn_fetch(generation, purpose),
            Effect::ExecuteCommand(command) => {
                self.pending_reply = reply.take();
                self.spawn_command(command);
            }
            Effect::CommandFinished(outcome) => {
                if let Some(tx) = reply.take().or_else(|| self.pending_reply.take()) {
                    let _ = tx.send(outcome.result);
                }
            }
            Effect::CancelTimers => {
                self.generation_token.cancel();
                self.generation_token = self.root.child_token();
                self.push_token = None;
                self.poll_token = None;
            }
            Effect::StartClock => {
                let period = self.session.config().clock_tick.max(MIN_CLOCK_TICK);
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                self.clock = Some(interval);
            }
            Effect::StopClock => self.clock = None,
        }
    }

    /// Connect and forward frames until the stream ends or the token fires.
    fn open_push(&mut self, generation: u64, attempt: u32) {
        let token = self.generation_token.child_token();
        if let Some(old) = self.push_token.replace(token.clone()) {
            old.cancel();
        }
        let connector = Arc::clone(&self.connector);
        let inbox = self.inbox_tx.clone();
        let job_id = self.session.job_id().to_string();

        tokio::spawn(async move {
            let connected = tokio::select! {
                _ = token.cancelled() => return,
                result = connector.connect(&job_id) => result,
            };
            let mut stream = match connected {
                Ok(stream) => stream,
                Err(PushError::Unsupported(reason)) => {
                    tracing::debug!(job_id = %job_id, reason = %reason, "No push transport");
                    let _ = inbox.send(SessionInput::PushUnsupported { generation });
                    return;
                }
                Err(e) => {
                    tracing::debug!(job_id = %job_id, attempt, error = %e, "Push connect failed");
                    let _ = inbox.send(SessionInput::PushFailed {
                        generation,
                        attempt,
                        reason: e.to_string(),
                    });
                    return;
                }
            };
            if inbox
                .send(SessionInput::PushOpened {
                    generation,
                    attempt,
                })
                .is_err()
            {
                return;
            }

            loop {
                let next = tokio::select! {
                    _ = token.cancelled() => return,
                    next = stream.next() => next,
                };
                let input = match next {
                    Some(Ok(message)) => SessionInput::PushMessage {
                        generation,
                        attempt,
                        message,
                    },
                    Some(Err(e)) => SessionInput::PushFailed {
                        generation,
                        attempt,
                        reason: e.to_string(),
                    },
                    None => SessionInput::PushFailed {
                        generation,
                        attempt,
                        reason: "stream closed".to_string(),
                    },
                };
                let last = !matches!(input, SessionInput::PushMessage { .. });
                if inbox.send(input).is_err() || last {
                    return;
                }
            }
        });
    }

    fn spawn_timer(&self, delay: Duration, token: CancellationToken, input: SessionInput) {
        let inbox = self.inbox_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = inbox.send(input);
                }
            }
        });
    }

    /// Snapshot and event list, fetched together.
    fn spawn_fetch(&self, generation: u64, purpose: FetchPurpose) {
        let token = self.generation_token.clone();
        let backend = Arc::clone(&self.backend);
        let inbox = self.inbox_tx.clone();
        let job_id = self.session.job_id().to_string();
        let limit = self.session.config().event_limit;

        tokio::spawn(async move {
            let fetch = async {
                let (snapshot, events) =
                    tokio::try_join!(backend.snapshot(&job_id), backend.events(&job_id, limit))?;
                Ok::<_, ApiError>(FetchBatch { snapshot, events })
            };
            let result = tokio::select! {
                _ = token.cancelled() => return,
                result = fetch => result.map_err(|e| e.to_string()),
            };
            let _ = inbox.send(SessionInput::FetchCompleted {
                generation,
                purpose,
                result,
            });
        });
    }

    /// Commands outlive generation resets so the lock always releases.
    fn spawn_command(&self, command: Command) {
        let root = self.root.clone();
        let backend = Arc::clone(&self.backend);
        let inbox = self.inbox_tx.clone();
        let job_id = self.session.job_id().to_string();

        tokio::spawn(async move {
            let kind = command.kind();
            let result = tokio::select! {
                _ = root.cancelled() => return,
                result = backend.command(&job_id, &command) => result,
            };
            let _ = inbox.send(SessionInput::CommandCompleted {
                kind,
                result: result.map_err(CommandError::from),
            });
        });
    }
}

/// Resolves on the next clock tick, or never while the clock is stopped.
async fn next_tick(clock: &mut Option<Interval>) {
    match clock {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
