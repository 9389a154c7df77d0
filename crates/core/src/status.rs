//! Status enums shared across the sync subsystem.
//!
//! String forms match what the job engine reports and what the view
//! renders. Parsing is lenient (case-insensitive, `_` or `-`, common
//! aliases) because the server vocabulary has drifted between releases.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Normalize a server-provided token: trimmed, lowercase, `_`/space → `-`.
pub(crate) fn normalize_token(raw: &str) -> String {
    raw.trim()
        .to_ascii_lowercase()
        .replace(['_', ' '], "-")
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of the job run as the client sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Idle,
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Parse a status reported by the job engine. Unknown values yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match normalize_token(raw).as_str() {
            "idle" => Some(Self::Idle),
            "created" | "pending" | "queued" | "ready" => Some(Self::Queued),
            "running" | "started" | "processing" | "in-progress" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" | "complete" | "succeeded" | "success" | "done" => Some(Self::Completed),
            "failed" | "error" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Completed, failed and cancelled runs accept no further updates.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Badge text for the status header.
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "Waiting",
            Self::Queued => "Queued",
            Self::Running => "Running",
            Self::Paused => "Paused",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// StepStatus
// ---------------------------------------------------------------------------

/// Status of one pipeline step.
///
/// Ordered by priority; see [`StepStatus::rank`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl StepStatus {
    /// Priority used by the upgrade-only transition policy.
    pub const fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::InProgress => 1,
            Self::Completed => 2,
            Self::Failed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Parse a step or phase status. Unknown values yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match normalize_token(raw).as_str() {
            "pending" | "waiting" | "queued" => Some(Self::Pending),
            "in-progress" | "inprogress" | "started" | "running" | "processing" | "active" => {
                Some(Self::InProgress)
            }
            "completed" | "complete" | "done" | "success" | "succeeded" | "finished" => {
                Some(Self::Completed)
            }
            "failed" | "error" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

/// Lifecycle of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closed,
    Error,
    /// The push channel is not available in this environment; polling only.
    Unsupported,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Error => "error",
            Self::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// HealthLevel
// ---------------------------------------------------------------------------

/// Coarse connection health shown next to the progress view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    Healthy,
    Degraded,
    Failed,
}
