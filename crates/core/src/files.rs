//! Per-file lifecycle and security classification.
//!
//! Entries are keyed by the stable file id when the producer sends one and
//! by `name#ordinal` otherwise. They are never removed while a run is
//! active; a retry replaces the whole tracker.

use indexmap::IndexMap;
use serde::Serialize;

use crate::event::{FileCompleted, FileRef, FileStarted};
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle of one file within the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    Processing,
    Completed,
    Quarantined,
}

impl FileStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Quarantined)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Quarantined => "quarantined",
        }
    }
}

/// Security outcome for a file, in increasing severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityState {
    #[default]
    Clear,
    Redacted,
    Warnings,
    Quarantined,
}

impl SecurityState {
    /// Precedence: quarantined > warnings > redacted > clear.
    pub fn classify(failsafe_triggered: bool, warning_count: u32, redaction_total: u32) -> Self {
        if failsafe_triggered {
            Self::Quarantined
        } else if warning_count > 0 {
            Self::Warnings
        } else if redaction_total > 0 {
            Self::Redacted
        } else {
            Self::Clear
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clear => "clear",
            Self::Redacted => "redacted",
            Self::Warnings => "warnings",
            Self::Quarantined => "quarantined",
        }
    }
}

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

/// Progress and outcome of one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileProgressEntry {
    pub key: String,
    pub file_id: Option<String>,
    pub name: String,
    pub status: FileStatus,
    /// 1-based position; running maximum of reported values.
    pub position: Option<u32>,
    /// Total files in the job; running maximum of reported values.
    pub total: Option<u32>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub chunks: Option<u32>,
    pub redaction_total: u32,
    pub warning_count: u32,
    pub error_count: u32,
    pub security_state: SecurityState,
    pub validation_warnings: Vec<String>,
}

impl FileProgressEntry {
    fn new(key: String, file: &FileRef) -> Self {
        Self {
            key,
            file_id: file.file_id.clone(),
            name: file.name.clone().unwrap_or_else(|| "unnamed".to_string()),
            status: FileStatus::Pending,
            position: None,
            total: None,
            started_at: None,
            completed_at: None,
            chunks: None,
            redaction_total: 0,
            warning_count: 0,
            error_count: 0,
            security_state: SecurityState::Clear,
            validation_warnings: Vec::new(),
        }
    }

    fn absorb_ref(&mut self, file: &FileRef) {
        if self.file_id.is_none() {
            self.file_id = file.file_id.clone();
        }
        if let Some(name) = &file.name {
            self.name = name.clone();
        }
        self.position = max_opt(self.position, file.file_number);
        self.total = max_opt(self.total, file.total_files);
    }
}

fn max_opt(a: Option<u32>, b: Option<u32>) -> Option<u32> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// What an event did to the file table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChange {
    /// A new entry was created.
    Created,
    /// The file moved into processing.
    Started,
    /// The file reached a finished status for the first time.
    Finished(FileStatus),
    Unchanged,
}

// ---------------------------------------------------------------------------
// Aggregates
// ---------------------------------------------------------------------------

/// Aggregate file counts, derived on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FileStats {
    pub total: u32,
    pub completed: u32,
    pub processing: u32,
    pub quarantined: u32,
    /// Files not yet finished (completed or quarantined).
    pub remaining: u32,
}

/// Aggregate security outcomes over finished files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SecurityStats {
    pub clear: u32,
    pub redacted: u32,
    pub warnings: u32,
    pub quarantined: u32,
    pub redactions: u32,
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// File table for one run.
#[derive(Debug, Clone, Default)]
pub struct FileTracker {
    entries: IndexMap<String, FileProgressEntry>,
    /// Largest `total_files` seen on any event, even before its file appears.
    expected_total: u32,
}

impl FileTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reported total without touching any entry.
    pub fn observe_total(&mut self, total: Option<u32>) {
        if let Some(total) = total {
            self.expected_total = self.expected_total.max(total);
        }
    }

    /// Find the entry for `file`, tolerating events that carry the id on
    /// only one side of the started/completed pair.
    fn resolve_key(&self, file: &FileRef) -> String {
        if let Some(id) = &file.file_id {
            if self.entries.contains_key(id) {
                return id.clone();
            }
        }
        if let Some(name) = &file.name {
            let found = self.entries.values().find(|e| {
                &e.name == name
                    && (e.file_id.is_none() || file.file_id.is_none())
                    && (e.position.is_none()
                        || file.file_number.is_none()
                        || e.position == file.file_number)
            });
            if let Some(entry) = found {
                return entry.key.clone();
            }
        }
        file.key()
    }

    fn entry_mut(&mut self, file: &FileRef) -> (&mut FileProgressEntry, bool) {
        let key = self.resolve_key(file);
        let created = !self.entries.contains_key(&key);
        let entry = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| FileProgressEntry::new(key, file));
        entry.absorb_ref(file);
        (entry, created)
    }

    /// Apply a `file-processing-started` event.
    pub fn on_started(&mut self, started: &FileStarted, at: Timestamp) -> FileChange {
        self.observe_total(started.file.total_files);
        let (entry, created) = self.entry_mut(&started.file);
        if entry.started_at.is_none() {
            entry.started_at = Some(at);
        }
        let moved = entry.status == FileStatus::Pending;
        if moved {
            entry.status = FileStatus::Processing;
        }
        match (created, moved) {
            (true, _) => FileChange::Created,
            (false, true) => FileChange::Started,
            (false, false) => FileChange::Unchanged,
        }
    }

    /// Apply a `file-processing-completed` event or a snapshot summary.
    ///
    /// Only the counts present in `done` overwrite the entry. A summary that
    /// is not final moves a pending file to processing and nothing further.
    pub fn on_completed(&mut self, done: &FileCompleted, at: Timestamp) -> FileChange {
        self.observe_total(done.file.total_files);
        let (entry, created) = self.entry_mut(&done.file);
        let was = entry.status;

        if let Some(chunks) = done.chunk_count {
            entry.chunks = Some(chunks);
        }
        if let Some(redactions) = done.redaction_count {
            entry.redaction_total = redactions;
        }
        if let Some(warnings) = done.warnings() {
            entry.warning_count = warnings;
        }
        if let Some(errors) = done.error_count {
            entry.error_count = errors;
        }
        if let Some(list) = &done.validation_warnings {
            entry.validation_warnings = list.clone();
        }

        let status = if done.failsafe_triggered || was == FileStatus::Quarantined {
            FileStatus::Quarantined
        } else if done.finished || was.is_finished() {
            FileStatus::Completed
        } else {
            FileStatus::Processing
        };
        entry.status = status;
        if status.is_finished() {
            if entry.completed_at.is_none() {
                entry.completed_at = Some(at);
            }
        } else if entry.started_at.is_none() {
            entry.started_at = Some(at);
        }
        entry.security_state = SecurityState::classify(
            status == FileStatus::Quarantined,
            entry.warning_count,
            entry.redaction_total,
        );

        match (created, was == status) {
            (true, _) if !status.is_finished() => FileChange::Created,
            (_, true) => FileChange::Unchanged,
            _ if status.is_finished() => FileChange::Finished(status),
            _ => FileChange::Started,
        }
    }

    pub fn get(&self, key: &str) -> Option<&FileProgressEntry> {
        self.entries.get(key)
    }

    /// Find an entry by display name.
    pub fn find_by_name(&self, name: &str) -> Option<&FileProgressEntry> {
        self.entries.values().find(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ordered by position, then first appearance.
    pub fn ordered(&self) -> Vec<&FileProgressEntry> {
        let mut list: Vec<(usize, &FileProgressEntry)> = self.entries.values().enumerate().collect();
        list.sort_by_key(|(idx, e)| (e.position.unwrap_or(u32::MAX), *idx));
        list.into_iter().map(|(_, e)| e).collect()
    }

    pub fn stats(&self) -> FileStats {
        let count = |status: FileStatus| {
            self.entries.values().filter(|e| e.status == status).count() as u32
        };
        let completed = count(FileStatus::Completed);
        let quarantined = count(FileStatus::Quarantined);
        let total = self.expected_total.max(self.entries.len() as u32);
        FileStats {
            total,
            completed,
            processing: count(FileStatus::Processing),
            quarantined,
            remaining: total.saturating_sub(completed + quarantined),
        }
    }

    pub fn security_stats(&self) -> SecurityStats {
        let mut stats = SecurityStats::default();
        for entry in self.entries.values().filter(|e| e.status.is_finished()) {
            match entry.security_state {
                SecurityState::Clear => stats.clear += 1,
                SecurityState::Redacted => stats.redacted += 1,
                SecurityState::Warnings => stats.warnings += 1,
                SecurityState::Quarantined => stats.quarantined += 1,
            }
            stats.redactions = stats.redactions.saturating_add(entry.redaction_total);
        }
        stats
    }
}
