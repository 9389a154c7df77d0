#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::channel::mpsc;
use futures::StreamExt;
use serde_json::{json, Value};

use jobwatch_client::api::{ApiError, JobBackend};
use jobwatch_client::driver::SyncHandle;
use jobwatch_client::stream::{PushConnector, PushError, PushStream};
use jobwatch_core::channel::{parse_frame, ChannelMessage};
use jobwatch_core::commands::{Command, CommandKind};
use jobwatch_core::config::SyncConfig;
use jobwatch_core::event::JobEvent;
use jobwatch_core::snapshot::JobSnapshot;
use jobwatch_core::view::ProgressView;

/// Short intervals so failover and polling happen within a test.
pub fn fast_config() -> SyncConfig {
    SyncConfig {
        poll_base_interval: Duration::from_millis(20),
        poll_max_interval: Duration::from_millis(100),
        reopen_delay: Duration::from_millis(50),
        fast_reopen_delay: Duration::from_millis(10),
        clock_tick: Duration::from_millis(50),
        ..SyncConfig::default()
    }
}

/// A job event stamped with the current time.
pub fn live_event(id: &str, event_type: &str, data: Value) -> JobEvent {
    JobEvent::new(id, event_type, data, Utc::now().to_rfc3339())
}

pub fn snapshot(raw: Value) -> JobSnapshot {
    serde_json::from_value(raw).unwrap()
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct BackendState {
    pub snapshot: JobSnapshot,
    pub events: Vec<JobEvent>,
    /// When set, every fetch fails with a 503.
    pub fail_fetches: bool,
    /// Controller answer for commands; `None` confirms with an empty message.
    pub command_result: Option<Result<String, (u16, String)>>,
    pub commands: Vec<(CommandKind, Value)>,
    pub fetches: usize,
}

#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<BackendState>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn update(&self, f: impl FnOnce(&mut BackendState)) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn fetches(&self) -> usize {
        self.state.lock().unwrap().fetches
    }

    pub fn commands(&self) -> Vec<(CommandKind, Value)> {
        self.state.lock().unwrap().commands.clone()
    }
}

fn unavailable() -> ApiError {
    ApiError::Api {
        status: 503,
        message: "Service unavailable".to_string(),
    }
}

#[async_trait]
impl JobBackend for FakeBackend {
    async fn snapshot(&self, _job_id: &str) -> Result<JobSnapshot, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.fetches += 1;
        if state.fail_fetches {
            return Err(unavailable());
        }
        Ok(state.snapshot.clone())
    }

    async fn events(&self, _job_id: &str, limit: u32) -> Result<Vec<JobEvent>, ApiError> {
        let state = self.state.lock().unwrap();
        if state.fail_fetches {
            return Err(unavailable());
        }
        // Newest first, like the real endpoint.
        Ok(state
            .events
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn command(&self, _job_id: &str, command: &Command) -> Result<String, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.commands.push((command.kind(), command.body()));
        match state.command_result.clone() {
            None => Ok(String::new()),
            Some(Ok(message)) => Ok(message),
            Some(Err((status, message))) => Err(ApiError::Api { status, message }),
        }
    }
}

// ---------------------------------------------------------------------------
// Scripted push connector
// ---------------------------------------------------------------------------

pub type FrameSender = mpsc::UnboundedSender<Result<ChannelMessage, PushError>>;

pub enum Connect {
    Stream(mpsc::UnboundedReceiver<Result<ChannelMessage, PushError>>),
    Fail,
    Unsupported,
}

/// Hands out scripted connections in order; once the script runs out every
/// connect reports the push channel as unsupported.
#[derive(Default)]
pub struct FakeConnector {
    script: Mutex<VecDeque<Connect>>,
    connects: AtomicUsize,
}

impl FakeConnector {
    pub fn new(script: Vec<Connect>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            connects: AtomicUsize::new(0),
        })
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

/// A push connection the test feeds frames into.
pub fn open_stream() -> (Connect, FrameSender) {
    let (tx, rx) = mpsc::unbounded();
    (Connect::Stream(rx), tx)
}

#[async_trait]
impl PushConnector for FakeConnector {
    async fn connect(&self, _job_id: &str) -> Result<PushStream, PushError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Connect::Stream(rx)) => Ok(rx.boxed()),
            Some(Connect::Fail) => Err(PushError::Connection("connection refused".to_string())),
            Some(Connect::Unsupported) | None => {
                Err(PushError::Unsupported("no stream endpoint".to_string()))
            }
        }
    }
}

/// Send `e` as a `job-event` frame.
pub fn send_event(tx: &FrameSender, e: &JobEvent) {
    send_frame(tx, json!({"type": "job-event", "data": e}));
}

pub fn send_frame(tx: &FrameSender, frame: Value) {
    let message = parse_frame(&frame.to_string()).unwrap();
    tx.unbounded_send(Ok(message)).unwrap();
}

// ---------------------------------------------------------------------------
// Waiting on the published view
// ---------------------------------------------------------------------------

/// Wait until the published view satisfies `pred`, failing after 5 s.
pub async fn wait_for(
    handle: &SyncHandle,
    what: &str,
    pred: impl Fn(&ProgressView) -> bool,
) -> ProgressView {
    let mut views = handle.subscribe();
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let view = views.borrow_and_update();
                if pred(&view) {
                    return view.clone();
                }
            }
            if views.changed().await.is_err() {
                panic!("driver stopped while waiting for {what}");
            }
        }
    })
    .await;
    waited.unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

pub fn activity_messages(view: &ProgressView) -> Vec<String> {
    view.activity.iter().map(|a| a.message.clone()).collect()
}
