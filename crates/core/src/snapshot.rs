//! Point-in-time job snapshot returned by the snapshot endpoint.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::FileCompleted;
use crate::status::JobStatus;
use crate::types::{parse_timestamp, Timestamp};

/// Server view of a job at one instant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
    /// Optional result payload; may carry per-file summaries under `files`.
    #[serde(default, alias = "result_snapshot")]
    pub result: Option<Value>,
}

impl JobSnapshot {
    pub fn job_status(&self) -> Option<JobStatus> {
        self.status.as_deref().and_then(JobStatus::parse)
    }

    pub fn started(&self) -> Option<Timestamp> {
        self.started_at.as_deref().and_then(parse_timestamp)
    }

    pub fn completed(&self) -> Option<Timestamp> {
        self.completed_at.as_deref().and_then(parse_timestamp)
    }

    /// Per-file summaries, if the result carries any.
    ///
    /// Entries that are not objects are skipped.
    pub fn file_summaries(&self) -> Vec<FileCompleted> {
        let Some(result) = &self.result else {
            return Vec::new();
        };
        ["files", "file_results", "file_summaries"]
            .iter()
            .find_map(|key| result.get(*key).and_then(Value::as_array))
            .map(|items| {
                items
                    .iter()
                    .filter(|item| item.is_object())
                    .map(FileCompleted::from_summary)
                    .collect()
            })
            .unwrap_or_default()
    }
}
