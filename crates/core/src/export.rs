//! Plain-text export of a progress view.
//!
//! Layout: a header block (job, status, progress, aggregate file and
//! security stats), then the step list, a per-file section and the
//! timestamped activity list.

use std::fmt::Write as _;

use crate::types::Timestamp;
use crate::view::ProgressView;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Render `view` as a flat text document. `exported_at` goes in the header.
pub fn render(view: &ProgressView, exported_at: Timestamp) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_document(&mut out, view, exported_at);
    out
}

fn write_document(
    out: &mut String,
    view: &ProgressView,
    exported_at: Timestamp,
) -> std::fmt::Result {
    let files = &view.file_stats;
    let security = &view.security_stats;

    heading(out, "Job Progress Report", '=')?;
    writeln!(out, "Job ID:      {}", view.job_id)?;
    writeln!(out, "Status:      {}", view.status_label)?;
    if let Some(message) = &view.terminal_message {
        writeln!(out, "Message:     {message}")?;
    }
    writeln!(out, "Progress:    {}", view.progress_label())?;
    writeln!(out, "Started:     {}", optional_time(view.run.started_at))?;
    writeln!(out, "Elapsed:     {}", view.elapsed)?;
    writeln!(out, "ETA:         {}", view.eta)?;
    writeln!(out, "Exported:    {}", exported_at.format(TIME_FORMAT))?;
    writeln!(
        out,
        "Files:       {} total, {} completed, {} processing, {} quarantined, {} remaining",
        files.total, files.completed, files.processing, files.quarantined, files.remaining
    )?;
    writeln!(
        out,
        "Security:    {} clear, {} redacted, {} with warnings, {} quarantined, {} redactions",
        security.clear, security.redacted, security.warnings, security.quarantined, security.redactions
    )?;

    writeln!(out)?;
    heading(out, "Steps", '-')?;
    for step in &view.steps {
        write!(out, "[{}] {}", step.status, step.label)?;
        if let Some(message) = &step.last_message {
            write!(out, ": {message}")?;
        }
        writeln!(out)?;
    }

    writeln!(out)?;
    heading(out, "Files", '-')?;
    if view.files.is_empty() {
        writeln!(out, "(no files reported)")?;
    }
    for file in &view.files {
        let position = match (file.position, file.total) {
            (Some(n), Some(total)) => format!("{n}/{total} "),
            (Some(n), None) => format!("{n} "),
            _ => String::new(),
        };
        writeln!(
            out,
            "{position}{}: {}, security {}, chunks {}, redactions {}, warnings {}, errors {}",
            file.name,
            file.status.as_str(),
            file.security_state.as_str(),
            file.chunks.map_or_else(|| "-".to_string(), |c| c.to_string()),
            file.redaction_total,
            file.warning_count,
            file.error_count,
        )?;
        for warning in &file.validation_warnings {
            writeln!(out, "    warning: {warning}")?;
        }
    }

    writeln!(out)?;
    heading(out, "Events", '-')?;
    if view.activity.is_empty() {
        writeln!(out, "(no events recorded)")?;
    }
    for entry in &view.activity {
        writeln!(
            out,
            "{} [{}] {}",
            entry.at.format(TIME_FORMAT),
            entry.level.as_str(),
            entry.message
        )?;
    }
    Ok(())
}

fn heading(out: &mut String, title: &str, underline: char) -> std::fmt::Result {
    writeln!(out, "{title}")?;
    writeln!(out, "{}", underline.to_string().repeat(title.len()))
}

fn optional_time(at: Option<Timestamp>) -> String {
    at.map_or_else(|| "-".to_string(), |at| at.format(TIME_FORMAT).to_string())
}
