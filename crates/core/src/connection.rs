//! Push-channel lifecycle.
//!
//! The manager never touches reconciled state. It decides when to open,
//! reopen or give up on the push channel and tells the session whether a
//! failure deserves a warning (only the first one until the channel comes
//! back).

use std::time::Duration;

use crate::session::Effect;
use crate::status::ConnectionState;

/// What the session should do after a push failure.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureOutcome {
    pub effects: Vec<Effect>,
    /// First failure since the last successful open.
    pub warn: bool,
}

#[derive(Debug, Clone)]
pub struct ConnectionManager {
    state: ConnectionState,
    /// Id of the current open attempt. Inputs from older attempts are stale.
    attempt: u32,
    /// A failure warning has been emitted and not yet cleared by a reopen.
    warned: bool,
    reopen_pending: bool,
    /// Closed on purpose; no automatic reopen.
    shut: bool,
    has_opened: bool,
    reopen_delay: Duration,
    fast_reopen_delay: Duration,
    last_error: Option<String>,
}

impl ConnectionManager {
    pub fn new(reopen_delay: Duration, fast_reopen_delay: Duration) -> Self {
        Self {
            state: ConnectionState::Idle,
            attempt: 0,
            warned: false,
            reopen_pending: false,
            shut: false,
            has_opened: false,
            reopen_delay,
            fast_reopen_delay,
            last_error: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn has_opened(&self) -> bool {
        self.has_opened
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_current(&self, attempt: u32) -> bool {
        attempt == self.attempt
    }

    /// Start a new open attempt unless one is already connecting or open.
    pub fn open(&mut self) -> Vec<Effect> {
        if self.shut
            || matches!(
                self.state,
                ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Unsupported
            )
        {
            return Vec::new();
        }
        self.attempt += 1;
        self.state = ConnectionState::Connecting;
        tracing::debug!(attempt = self.attempt, "Opening push channel");
        vec![Effect::OpenPush {
            attempt: self.attempt,
        }]
    }

    /// The current attempt opened. Returns whether this restores a channel
    /// that had failed.
    pub fn on_opened(&mut self) -> bool {
        let restored = self.warned;
        self.state = ConnectionState::Open;
        self.warned = false;
        self.has_opened = true;
        self.last_error = None;
        restored
    }

    /// Transport failure on a non-terminal job: mark the error and schedule
    /// one reopen.
    pub fn on_failed(&mut self, reason: &str) -> FailureOutcome {
        if self.shut {
            return FailureOutcome {
                effects: Vec::new(),
                warn: false,
            };
        }
        self.state = ConnectionState::Error;
        self.last_error = Some(reason.to_string());
        let warn = !self.warned;
        self.warned = true;
        let effects = self.schedule_reopen(self.reopen_delay).into_iter().collect();
        FailureOutcome { effects, warn }
    }

    /// Graceful server-side reset: reopen quickly.
    pub fn on_reset(&mut self) -> Vec<Effect> {
        if self.shut {
            return Vec::new();
        }
        self.state = ConnectionState::Closed;
        let mut effects = vec![Effect::ClosePush];
        effects.extend(self.schedule_reopen(self.fast_reopen_delay));
        effects
    }

    /// The environment has no push transport. Polling takes over for good.
    pub fn on_unsupported(&mut self) {
        self.state = ConnectionState::Unsupported;
        self.reopen_pending = false;
    }

    pub fn on_reopen_timer(&mut self) -> Vec<Effect> {
        self.reopen_pending = false;
        match self.state {
            ConnectionState::Error | ConnectionState::Closed => self.open(),
            _ => Vec::new(),
        }
    }

    /// Close for good (terminal status, stall, or teardown).
    pub fn close(&mut self) -> Vec<Effect> {
        self.shut = true;
        self.reopen_pending = false;
        if self.state == ConnectionState::Unsupported {
            return Vec::new();
        }
        self.state = ConnectionState::Closed;
        vec![Effect::ClosePush]
    }

    /// Back to a fresh, never-opened manager. The attempt counter keeps
    /// counting so late inputs from old attempts stay stale.
    pub fn reset(&mut self) {
        let attempt = self.attempt;
        *self = Self::new(self.reopen_delay, self.fast_reopen_delay);
        self.attempt = attempt;
    }

    fn schedule_reopen(&mut self, delay: Duration) -> Option<Effect> {
        if self.reopen_pending {
            return None;
        }
        self.reopen_pending = true;
        Some(Effect::ScheduleReopen(delay))
    }
}
