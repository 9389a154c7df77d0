//! Operator commands and their local guard.
//!
//! Commands never mutate tracked state directly. A successful command only
//! changes what the view shows once the resulting event or snapshot arrives
//! through the reconciler; the one exception is retry, which starts a fresh
//! session.

use std::fmt;

use serde::Serialize;

use crate::error::CommandError;
use crate::status::JobStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Pause,
    Resume,
    Cancel,
    Retry,
}

impl CommandKind {
    /// Path segment of the command endpoint.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
            Self::Retry => "retry",
        }
    }

    /// Whether the command is accepted locally for a job in `status`.
    pub fn allowed_in(self, status: JobStatus) -> bool {
        match self {
            Self::Pause => status == JobStatus::Running,
            Self::Resume => status == JobStatus::Paused,
            Self::Cancel => !status.is_terminal(),
            Self::Retry => status.is_terminal(),
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command with its optional free-text argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Pause { reason: Option<String> },
    Resume { note: Option<String> },
    Cancel { reason: Option<String> },
    Retry,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Pause { .. } => CommandKind::Pause,
            Self::Resume { .. } => CommandKind::Resume,
            Self::Cancel { .. } => CommandKind::Cancel,
            Self::Retry => CommandKind::Retry,
        }
    }

    /// JSON body sent with the command. Empty arguments are omitted.
    pub fn body(&self) -> serde_json::Value {
        let non_empty = |s: &Option<String>| {
            s.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        match self {
            Self::Pause { reason } | Self::Cancel { reason } => match non_empty(reason) {
                Some(reason) => serde_json::json!({ "reason": reason }),
                None => serde_json::json!({}),
            },
            Self::Resume { note } => match non_empty(note) {
                Some(note) => serde_json::json!({ "note": note }),
                None => serde_json::json!({}),
            },
            Self::Retry => serde_json::json!({}),
        }
    }
}

/// Result reported by the job controller for a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub kind: CommandKind,
    pub result: Result<String, CommandError>,
}

/// Guards commands and tracks the single in-flight one.
#[derive(Debug, Clone, Default)]
pub struct CommandDispatcher {
    in_flight: Option<CommandKind>,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_flight(&self) -> Option<CommandKind> {
        self.in_flight
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Validate `command` against `status` and mark it in flight.
    ///
    /// Rejections leave the dispatcher unchanged.
    pub fn begin(&mut self, command: &Command, status: JobStatus) -> Result<(), CommandError> {
        let kind = command.kind();
        if let Some(current) = self.in_flight {
            return Err(CommandError::Busy(current));
        }
        if !kind.allowed_in(status) {
            return Err(CommandError::InvalidState {
                command: kind,
                status,
            });
        }
        self.in_flight = Some(kind);
        Ok(())
    }

    /// Release the in-flight slot. Returns false if `kind` was not in flight.
    pub fn finish(&mut self, kind: CommandKind) -> bool {
        if self.in_flight == Some(kind) {
            self.in_flight = None;
            true
        } else {
            false
        }
    }

    /// Drop any in-flight command, e.g. on teardown.
    pub fn clear(&mut self) {
        self.in_flight = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn guard_matrix() {
        use JobStatus::*;
        assert!(CommandKind::Pause.allowed_in(Running));
        assert!(!CommandKind::Pause.allowed_in(Paused));
        assert!(!CommandKind::Pause.allowed_in(Queued));
        assert!(CommandKind::Resume.allowed_in(Paused));
        assert!(!CommandKind::Resume.allowed_in(Running));
        assert!(CommandKind::Cancel.allowed_in(Queued));
        assert!(CommandKind::Cancel.allowed_in(Paused));
        assert!(!CommandKind::Cancel.allowed_in(Cancelled));
        assert!(CommandKind::Retry.allowed_in(Failed));
        assert!(CommandKind::Retry.allowed_in(Cancelled));
        assert!(!CommandKind::Retry.allowed_in(Running));
    }

    #[test]
    fn only_one_command_in_flight() {
        let mut dispatcher = CommandDispatcher::new();
        dispatcher
            .begin(&Command::Pause { reason: None }, JobStatus::Running)
            .unwrap();
        let err = dispatcher
            .begin(&Command::Cancel { reason: None }, JobStatus::Running)
            .unwrap_err();
        assert_eq!(err, CommandError::Busy(CommandKind::Pause));

        assert!(!dispatcher.finish(CommandKind::Cancel));
        assert!(dispatcher.finish(CommandKind::Pause));
        assert!(!dispatcher.is_busy());
    }

    #[test]
    fn invalid_state_leaves_slot_free() {
        let mut dispatcher = CommandDispatcher::new();
        let err = dispatcher
            .begin(&Command::Resume { note: None }, JobStatus::Running)
            .unwrap_err();
        assert_matches!(
            err,
            CommandError::InvalidState {
                command: CommandKind::Resume,
                status: JobStatus::Running
            }
        );
        assert_eq!(err.to_string(), "Cannot resume a job that is running");
        assert!(!dispatcher.is_busy());
    }

    #[test]
    fn body_omits_blank_arguments() {
        let pause = Command::Pause {
            reason: Some("  maintenance ".into()),
        };
        assert_eq!(pause.body(), serde_json::json!({"reason": "maintenance"}));
        let resume = Command::Resume {
            note: Some("   ".into()),
        };
        assert_eq!(resume.body(), serde_json::json!({}));
        assert_eq!(Command::Retry.body(), serde_json::json!({}));
    }
}
