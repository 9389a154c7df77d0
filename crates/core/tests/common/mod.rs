#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use serde_json::Value;

use jobwatch_core::channel::parse_frame;
use jobwatch_core::config::SyncConfig;
use jobwatch_core::event::JobEvent;
use jobwatch_core::session::{
    Effect, FetchBatch, FetchPurpose, SessionInput, SyncSession,
};
use jobwatch_core::snapshot::JobSnapshot;
use jobwatch_core::types::Timestamp;

/// Fixed test clock: `secs` seconds after an arbitrary epoch.
pub fn t(secs: i64) -> Timestamp {
    Utc.timestamp_opt(1_770_000_000 + secs, 0).unwrap()
}

/// A job event stamped at `t(secs)`.
pub fn event(id: &str, event_type: &str, data: Value, secs: i64) -> JobEvent {
    JobEvent::new(id, event_type, data, t(secs).to_rfc3339())
}

pub fn snapshot(raw: Value) -> JobSnapshot {
    serde_json::from_value(raw).unwrap()
}

/// A started session with default config.
pub fn started_session() -> SyncSession {
    let mut session = SyncSession::new("job-42", SyncConfig::default());
    session.handle(SessionInput::Start, t(0));
    session
}

pub fn push_opened(session: &mut SyncSession, secs: i64) -> Vec<Effect> {
    let input = SessionInput::PushOpened {
        generation: session.generation(),
        attempt: session.connection().attempt(),
    };
    session.handle(input, t(secs))
}

pub fn push_failed(session: &mut SyncSession, reason: &str, secs: i64) -> Vec<Effect> {
    let input = SessionInput::PushFailed {
        generation: session.generation(),
        attempt: session.connection().attempt(),
        reason: reason.to_string(),
    };
    session.handle(input, t(secs))
}

/// Deliver `e` over the push channel as a `job-event` frame.
pub fn push_event(session: &mut SyncSession, e: &JobEvent, secs: i64) -> Vec<Effect> {
    let frame = serde_json::json!({"type": "job-event", "data": e});
    push_frame(session, frame, secs)
}

pub fn push_frame(session: &mut SyncSession, frame: Value, secs: i64) -> Vec<Effect> {
    let input = SessionInput::PushMessage {
        generation: session.generation(),
        attempt: session.connection().attempt(),
        message: parse_frame(&frame.to_string()).unwrap(),
    };
    session.handle(input, t(secs))
}

/// Run one full poll cycle: timer fires, then the fetch returns `batch`.
pub fn poll_cycle(session: &mut SyncSession, batch: FetchBatch, secs: i64) -> Vec<Effect> {
    let generation = session.generation();
    let mut effects = session.handle(SessionInput::PollTimerFired { generation }, t(secs));
    effects.extend(session.handle(
        SessionInput::FetchCompleted {
            generation,
            purpose: FetchPurpose::Poll,
            result: Ok(batch),
        },
        t(secs),
    ));
    effects
}

/// Messages of every activity entry, oldest first.
pub fn activity_messages(session: &SyncSession) -> Vec<String> {
    session
        .reconciler()
        .tracker()
        .activity()
        .iter()
        .map(|e| e.message.clone())
        .collect()
}
