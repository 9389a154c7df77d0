//! Job event wire type and its typed interpretation.
//!
//! A [`JobEvent`] is what both the push channel and the event-list
//! endpoint deliver. [`JobEvent::kind`] turns its `event_type` string and
//! free-form `data` into an [`EventKind`] variant with a typed payload, so
//! downstream handlers match exhaustively instead of comparing strings.

use std::borrow::Cow;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::SyncError;
use crate::payload;
use crate::status::{normalize_token, StepStatus};
use crate::types::{parse_timestamp, EventId, Timestamp};

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

/// One immutable unit of job progress information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    /// Unique per session. Numeric ids are accepted and stringified.
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<EventId>,
    #[serde(alias = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, alias = "timestamp")]
    pub created_at: Option<String>,
}

fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<EventId>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

impl JobEvent {
    pub fn new(
        id: impl Into<EventId>,
        event_type: impl Into<String>,
        data: Value,
        created_at: impl Into<String>,
    ) -> Self {
        Self {
            id: Some(id.into()),
            event_type: event_type.into(),
            data,
            created_at: Some(created_at.into()),
        }
    }

    /// Parsed `created_at`, if present and well-formed.
    pub fn timestamp(&self) -> Option<Timestamp> {
        self.created_at.as_deref().and_then(parse_timestamp)
    }

    /// The payload as a JSON object.
    ///
    /// Some producers double-encode `data` as a JSON string; that form is
    /// decoded here. Anything that is not an object is reported and replaced
    /// by an empty object so every field falls back to its default.
    pub fn payload(&self) -> Cow<'_, Value> {
        match &self.data {
            Value::Object(_) => Cow::Borrowed(&self.data),
            Value::Null => Cow::Owned(Value::Object(Default::default())),
            Value::String(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(decoded @ Value::Object(_)) => Cow::Owned(decoded),
                _ => self.malformed("data is a non-JSON string"),
            },
            _ => self.malformed("data is not an object"),
        }
    }

    fn malformed(&self, reason: &str) -> Cow<'_, Value> {
        let err = SyncError::MalformedPayload {
            event_type: self.event_type.clone(),
            reason: reason.to_string(),
        };
        tracing::warn!(event_id = ?self.id, error = %err, "Using defaults for event payload");
        Cow::Owned(Value::Object(Default::default()))
    }

    /// Interpret this event. Unknown types map to [`EventKind::Unknown`].
    pub fn kind(&self) -> EventKind {
        let decoded = self.payload();
        let data: &Value = &decoded;
        match normalize_token(&self.event_type).as_str() {
            "created" => EventKind::Created,
            "ready" => EventKind::Ready,
            "running" | "started" | "job-started" => EventKind::Running,
            "analysis-progress" | "progress" => {
                EventKind::AnalysisProgress(ProgressUpdate::from_value(data))
            }
            "file-processing-started" => EventKind::FileStarted(FileStarted::from_value(data)),
            "file-processing-completed" | "file-processing-complete" => {
                EventKind::FileCompleted(FileCompleted::from_value(data))
            }
            "analysis-phase" | "phase" => EventKind::AnalysisPhase(PhaseUpdate::from_value(data)),
            "completed" | "complete" => EventKind::Completed {
                message: payload::string(data, &["message", "summary"]),
            },
            "failed" | "error" => EventKind::Failed {
                error: payload::string(data, &["error", "message", "detail"]),
            },
            "cancelled" | "canceled" => EventKind::Cancelled {
                reason: payload::string(data, &["reason", "message"]),
            },
            "paused" => EventKind::Paused {
                reason: payload::string(data, &["reason", "message"]),
            },
            "resumed" => EventKind::Resumed {
                note: payload::string(data, &["note", "message"]),
            },
            _ => EventKind::Unknown(self.event_type.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// EventKind
// ---------------------------------------------------------------------------

/// Typed view of a [`JobEvent`].
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Created,
    Ready,
    Running,
    AnalysisProgress(ProgressUpdate),
    FileStarted(FileStarted),
    FileCompleted(FileCompleted),
    AnalysisPhase(PhaseUpdate),
    Completed { message: Option<String> },
    Failed { error: Option<String> },
    Cancelled { reason: Option<String> },
    Paused { reason: Option<String> },
    Resumed { note: Option<String> },
    /// A type this client does not know. Ignored.
    Unknown(String),
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

const STEP_KEYS: &[&str] = &["step", "step_id", "stage"];
const MESSAGE_KEYS: &[&str] = &["message", "detail", "description"];
const FILE_NUMBER_KEYS: &[&str] = &["file_number", "fileNumber", "file_index", "position"];
const TOTAL_FILES_KEYS: &[&str] = &["total_files", "totalFiles", "file_count"];

/// `analysis-progress` payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProgressUpdate {
    pub step: Option<String>,
    /// Overall job progress, clamped to 0..=100.
    pub progress: Option<f64>,
    pub status: Option<StepStatus>,
    pub message: Option<String>,
    pub file_number: Option<u32>,
    pub total_files: Option<u32>,
    pub details: Option<Value>,
}

impl ProgressUpdate {
    pub fn from_value(data: &Value) -> Self {
        Self {
            step: payload::string(data, STEP_KEYS),
            progress: payload::float(data, &["progress", "progress_percentage", "percent"])
                .map(|p| p.clamp(0.0, 100.0)),
            status: payload::string(data, &["status", "step_status"])
                .and_then(|s| StepStatus::parse(&s)),
            message: payload::string(data, MESSAGE_KEYS),
            file_number: payload::count(data, FILE_NUMBER_KEYS),
            total_files: payload::count(data, TOTAL_FILES_KEYS),
            details: data.get("details").filter(|v| !v.is_null()).cloned(),
        }
    }

    /// The step status this update asks for.
    ///
    /// A per-file completion that is not the last file keeps the
    /// encompassing step in progress.
    pub fn effective_status(&self) -> StepStatus {
        let status = self.status.unwrap_or(StepStatus::InProgress);
        match (status, self.file_number, self.total_files) {
            (StepStatus::Completed, Some(n), Some(total)) if n < total => StepStatus::InProgress,
            _ => status,
        }
    }
}

/// Identity and position of a file inside the job.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FileRef {
    pub file_id: Option<String>,
    pub name: Option<String>,
    /// 1-based position in the job's file list.
    pub file_number: Option<u32>,
    pub total_files: Option<u32>,
}

impl FileRef {
    fn from_value(data: &Value, id_keys: &[&str]) -> Self {
        Self {
            file_id: payload::string(data, id_keys),
            name: payload::string(data, &["file_name", "filename", "fileName", "name"]),
            file_number: payload::count(data, FILE_NUMBER_KEYS),
            total_files: payload::count(data, TOTAL_FILES_KEYS),
        }
    }

    /// Stable table key: the file id, else `name#ordinal`.
    pub fn key(&self) -> String {
        match &self.file_id {
            Some(id) => id.clone(),
            None => format!(
                "{}#{}",
                self.name.as_deref().unwrap_or("unnamed"),
                self.file_number.unwrap_or(0)
            ),
        }
    }

    /// `true` when this is known to be the last file of the job.
    pub fn is_last(&self) -> bool {
        matches!((self.file_number, self.total_files), (Some(n), Some(total)) if n >= total)
    }
}

/// `file-processing-started` payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FileStarted {
    pub file: FileRef,
}

impl FileStarted {
    pub fn from_value(data: &Value) -> Self {
        Self {
            file: FileRef::from_value(data, &["file_id", "fileId"]),
        }
    }
}

/// `file-processing-completed` payload, also used for per-file summaries in
/// job snapshots.
///
/// Counts are `None` when the payload did not carry them; a sparse snapshot
/// summary must not wipe what an earlier event reported.
#[derive(Debug, Clone, PartialEq)]
pub struct FileCompleted {
    pub file: FileRef,
    /// `false` for a snapshot summary whose own status says the file is still
    /// being worked on.
    pub finished: bool,
    pub chunk_count: Option<u32>,
    /// Sum over all redaction categories.
    pub redaction_count: Option<u32>,
    pub failsafe_triggered: bool,
    pub validation_warnings: Option<Vec<String>>,
    pub warning_count: Option<u32>,
    pub error_count: Option<u32>,
}

impl Default for FileCompleted {
    fn default() -> Self {
        Self {
            file: FileRef::default(),
            finished: true,
            chunk_count: None,
            redaction_count: None,
            failsafe_triggered: false,
            validation_warnings: None,
            warning_count: None,
            error_count: None,
        }
    }
}

impl FileCompleted {
    pub fn from_value(data: &Value) -> Self {
        Self::parse(data, &["file_id", "fileId"])
    }

    /// Snapshot summaries may carry the file id under a bare `id` and their
    /// own `status`.
    pub fn from_summary(data: &Value) -> Self {
        let mut summary = Self::parse(data, &["file_id", "fileId", "id"]);
        if let Some(status) = payload::string(data, &["status", "state"]) {
            summary.finished = !matches!(
                normalize_token(&status).as_str(),
                "pending" | "queued" | "waiting" | "processing" | "in_progress" | "running"
                    | "started"
            );
        }
        summary
    }

    /// Warning count, falling back to the length of the warning list.
    pub fn warnings(&self) -> Option<u32> {
        let listed = self.validation_warnings.as_ref().map(|w| w.len() as u32);
        match (self.warning_count, listed) {
            (Some(n), Some(l)) => Some(n.max(l)),
            (n, l) => n.or(l),
        }
    }

    fn parse(data: &Value, id_keys: &[&str]) -> Self {
        let errors = payload::message_list(data, &["errors"]);
        Self {
            file: FileRef::from_value(data, id_keys),
            finished: true,
            chunk_count: payload::count(data, &["chunk_count", "chunks", "chunkCount"]),
            redaction_count: payload::summed_count(
                data,
                &["redaction_counts", "redactionCounts", "redactions", "redaction_count"],
            ),
            failsafe_triggered: payload::flag(
                data,
                &["failsafe_triggered", "failsafeTriggered", "failsafe", "quarantined"],
            )
            .unwrap_or(false),
            validation_warnings: payload::message_list(
                data,
                &["validation_warnings", "validationWarnings", "warnings"],
            ),
            warning_count: payload::count(data, &["warning_count", "warningCount"]),
            error_count: payload::count(data, &["error_count", "errorCount"])
                .or_else(|| errors.map(|e| e.len() as u32)),
        }
    }
}

/// `analysis-phase` payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PhaseUpdate {
    pub phase: Option<String>,
    pub status: Option<StepStatus>,
    pub message: Option<String>,
    pub details: Option<Value>,
}

impl PhaseUpdate {
    pub fn from_value(data: &Value) -> Self {
        Self {
            phase: payload::string(data, &["phase", "step", "stage"]),
            status: payload::string(data, &["status", "state"]).and_then(|s| StepStatus::parse(&s)),
            message: payload::string(data, MESSAGE_KEYS),
            details: data.get("details").filter(|v| !v.is_null()).cloned(),
        }
    }
}
