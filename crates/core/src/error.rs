use crate::commands::CommandKind;
use crate::status::JobStatus;

/// Failure conditions the sync subsystem recovers from or surfaces.
///
/// None of these escape as panics or propagate past the session; each one
/// is turned into session state, an activity entry, and a health signal.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    /// The push channel failed to open or dropped.
    #[error("Push channel error: {0}")]
    Transport(String),

    /// A snapshot or event-list fetch failed.
    #[error("Poll failed: {0}")]
    Poll(String),

    /// An operator command was rejected.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// The poll ceiling was reached without a terminal job status.
    #[error("Polling stopped after {cycles} cycles without a final status")]
    Stalled { cycles: u32 },

    /// An event payload could not be interpreted.
    #[error("Malformed payload in {event_type} event: {reason}")]
    MalformedPayload { event_type: String, reason: String },
}

/// Why an operator command did not go through.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// Another command is still in flight for this session.
    #[error("Another command ({0}) is already in progress")]
    Busy(CommandKind),

    /// The command is not valid for the current job status.
    #[error("Cannot {command} a job that is {status}")]
    InvalidState {
        command: CommandKind,
        status: JobStatus,
    },

    /// The job controller refused the command.
    #[error("{0}")]
    Rejected(String),

    /// The command request never reached the controller.
    #[error("Command request failed: {0}")]
    Transport(String),

    /// The session was reset or torn down before the command finished.
    #[error("Session closed before the command completed")]
    SessionClosed,
}
