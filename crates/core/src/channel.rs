//! Push-channel frame types and parser.
//!
//! The job stream sends JSON frames shaped `{"type": "<name>", "data": {...}}`.
//! This module deserializes them into a strongly-typed [`ChannelMessage`].

use serde::Deserialize;

use crate::event::JobEvent;
use crate::status::JobStatus;
use crate::types::{parse_timestamp, Timestamp};

/// All sub-events the job stream emits.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChannelMessage {
    /// Initial status snapshot sent right after subscribing.
    #[serde(rename = "connection-info", alias = "connection_info")]
    ConnectionInfo(ConnectionInfo),

    /// A job event (same shape as the event-list endpoint).
    #[serde(rename = "job-event", alias = "job_event")]
    JobEvent(JobEvent),

    /// Liveness signal with the latest job status.
    #[serde(rename = "heartbeat")]
    Heartbeat(Heartbeat),

    /// The server is restarting the stream; reconnect quickly.
    #[serde(rename = "connection-reset", alias = "connection_reset")]
    ConnectionReset(ConnectionReset),

    /// Stream-level error reported by the server.
    #[serde(rename = "error")]
    Error(StreamError),
}

/// Payload for `connection-info` frames.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectionInfo {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
}

impl ConnectionInfo {
    pub fn job_status(&self) -> Option<JobStatus> {
        self.status.as_deref().and_then(JobStatus::parse)
    }
}

/// Payload for `heartbeat` frames.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Heartbeat {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl Heartbeat {
    pub fn job_status(&self) -> Option<JobStatus> {
        self.status.as_deref().and_then(JobStatus::parse)
    }

    pub fn at(&self) -> Option<Timestamp> {
        self.timestamp.as_deref().and_then(parse_timestamp)
    }
}

/// Payload for `connection-reset` frames.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectionReset {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Payload for `error` frames.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamError {
    #[serde(default, alias = "error")]
    pub message: Option<String>,
}

/// Parse one text frame from the job stream.
///
/// Returns `Err` for malformed JSON or unknown `type` values. Callers
/// should log and continue; an unknown frame never closes the stream.
pub fn parse_frame(text: &str) -> Result<ChannelMessage, serde_json::Error> {
    serde_json::from_str(text)
}
