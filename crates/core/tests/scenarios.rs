//! End-to-end session scenarios driven through `SyncSession::handle`.
//!
//! No I/O: every push frame, timer and fetch result is fed in by hand, the
//! way the async driver would.

mod common;

use assert_matches::assert_matches;
use serde_json::json;

use common::*;
use jobwatch_core::commands::{Command, CommandKind, CommandOutcome};
use jobwatch_core::files::{FileStatus, SecurityState};
use jobwatch_core::session::{Effect, FetchBatch, FetchPurpose, SessionInput, SessionPhase};
use jobwatch_core::status::{JobStatus, StepStatus};

const FALLBACK_LINE: &str = "Live updates interrupted; polling for progress";

// ---------------------------------------------------------------------------
// Test: a normal run over the push channel
// ---------------------------------------------------------------------------

#[test]
fn push_events_build_run_state() {
    let mut session = started_session();
    push_opened(&mut session, 0);

    push_event(&mut session, &event("1", "created", json!({}), 1), 1);
    push_event(&mut session, &event("2", "running", json!({}), 2), 2);
    push_event(
        &mut session,
        &event(
            "3",
            "analysis-progress",
            json!({"step": "chunking", "progress": 40}),
            3,
        ),
        3,
    );
    push_event(
        &mut session,
        &event(
            "4",
            "file-processing-completed",
            json!({"file_name": "a.log", "chunk_count": 3, "redaction_count": 2}),
            4,
        ),
        4,
    );

    let tracker = session.reconciler().tracker();
    assert_eq!(tracker.status(), JobStatus::Running);
    assert_eq!(tracker.progress(), 40.0);
    assert_eq!(
        tracker.steps().get("chunking").unwrap().status,
        StepStatus::InProgress
    );

    let file = tracker.files().find_by_name("a.log").unwrap();
    assert_eq!(file.status, FileStatus::Completed);
    assert_eq!(file.chunks, Some(3));
    assert_eq!(file.redaction_total, 2);
    assert_eq!(file.security_state, SecurityState::Redacted);
}

// ---------------------------------------------------------------------------
// Test: fallback activation is logged once across repeated polls
// ---------------------------------------------------------------------------

#[test]
fn fallback_logs_once_and_never_duplicates_files() {
    let mut session = started_session();
    push_opened(&mut session, 0);

    let effects = push_failed(&mut session, "connection reset by peer", 1);
    assert!(effects.contains(&Effect::SchedulePoll(std::time::Duration::ZERO)));

    let batch = || FetchBatch {
        snapshot: snapshot(json!({"status": "running", "started_at": t(0).to_rfc3339()})),
        events: vec![event(
            "7",
            "file-processing-started",
            json!({"file_id": "f-1", "file_name": "b.log", "file_number": 1, "total_files": 2}),
            1,
        )],
    };
    poll_cycle(&mut session, batch(), 2);

    // The reopen attempt fails again between cycles.
    let generation = session.generation();
    let effects = session.handle(SessionInput::ReopenTimerFired { generation }, t(4));
    assert_matches!(effects.as_slice(), [Effect::OpenPush { attempt: 2 }]);
    push_failed(&mut session, "connection refused", 4);

    poll_cycle(&mut session, batch(), 5);

    let messages = activity_messages(&session);
    assert_eq!(messages.iter().filter(|m| *m == FALLBACK_LINE).count(), 1);
    assert_eq!(
        messages.iter().filter(|m| *m == "Job running").count(),
        1
    );

    let tracker = session.reconciler().tracker();
    assert_eq!(tracker.status(), JobStatus::Running);
    assert_eq!(tracker.files().len(), 1);
    assert_eq!(tracker.files().stats().total, 2);
}

// ---------------------------------------------------------------------------
// Test: completion via poll, then the same event again over reopened push
// ---------------------------------------------------------------------------

#[test]
fn completion_via_poll_ignores_duplicate_from_push() {
    let mut session = started_session();
    push_opened(&mut session, 0);
    push_event(&mut session, &event("1", "running", json!({}), 10), 10);
    push_failed(&mut session, "dropped", 20);

    // Poll fetch goes out, then push comes back while it is in flight.
    let generation = session.generation();
    let effects = session.handle(SessionInput::PollTimerFired { generation }, t(21));
    assert_eq!(effects, vec![Effect::Fetch(FetchPurpose::Poll)]);
    session.handle(SessionInput::ReopenTimerFired { generation }, t(23));
    push_opened(&mut session, 23);
    assert!(!session.poll().is_active());

    let completed = event("9", "completed", json!({"message": "All done"}), 60);
    let effects = session.handle(
        SessionInput::FetchCompleted {
            generation,
            purpose: FetchPurpose::Poll,
            result: Ok(FetchBatch {
                snapshot: snapshot(json!({
                    "status": "completed",
                    "started_at": t(10).to_rfc3339(),
                    "completed_at": t(60).to_rfc3339(),
                })),
                events: vec![completed.clone(), event("1", "running", json!({}), 10)],
            }),
        },
        t(61),
    );
    assert!(effects.contains(&Effect::ClosePush));
    assert!(effects.contains(&Effect::StopClock));
    assert_eq!(session.phase(), SessionPhase::Finished);

    let before = session.view();
    assert_eq!(before.elapsed, "50s");
    assert_eq!(before.eta, "0s");

    let effects = push_event(&mut session, &completed, 70);
    assert!(effects.is_empty());
    session.handle(SessionInput::Tick, t(300));

    let after = session.view();
    assert_eq!(after.status, JobStatus::Completed);
    assert_eq!(after.elapsed, before.elapsed);
    assert_eq!(after.eta, before.eta);
    assert_eq!(after.activity, before.activity);
}

// ---------------------------------------------------------------------------
// Test: failsafe outranks redactions
// ---------------------------------------------------------------------------

#[test]
fn failsafe_file_is_quarantined() {
    let mut session = started_session();
    push_opened(&mut session, 0);
    push_event(
        &mut session,
        &event(
            "1",
            "file-processing-completed",
            json!({"file_id": "f-9", "file_name": "secrets.log", "failsafe_triggered": true, "redaction_count": 5}),
            1,
        ),
        1,
    );

    let tracker = session.reconciler().tracker();
    let file = tracker.files().get("f-9").unwrap();
    assert_eq!(file.status, FileStatus::Quarantined);
    assert_eq!(file.security_state, SecurityState::Quarantined);
    assert_eq!(file.redaction_total, 5);
    assert_eq!(tracker.files().security_stats().quarantined, 1);
    assert!(activity_messages(&session)
        .iter()
        .any(|m| m.starts_with("Quarantined secrets.log")));
}

// ---------------------------------------------------------------------------
// Test: confirmed retry resets the run and reconnects
// ---------------------------------------------------------------------------

#[test]
fn confirmed_retry_resets_everything() {
    let mut session = started_session();
    push_opened(&mut session, 0);
    push_event(&mut session, &event("1", "running", json!({}), 1), 1);
    push_event(
        &mut session,
        &event(
            "2",
            "file-processing-started",
            json!({"file_name": "a.log", "file_number": 1, "total_files": 3}),
            2,
        ),
        2,
    );
    push_event(&mut session, &event("3", "failed", json!({"error": "OOM"}), 3), 3);
    assert_eq!(session.phase(), SessionPhase::Finished);
    let old_generation = session.generation();

    let effects = session.handle(SessionInput::CommandRequested(Command::Retry), t(10));
    assert_eq!(effects, vec![Effect::ExecuteCommand(Command::Retry)]);

    let effects = session.handle(
        SessionInput::CommandCompleted {
            kind: CommandKind::Retry,
            result: Ok("Job queued for retry".into()),
        },
        t(11),
    );
    assert!(effects.contains(&Effect::CancelTimers));
    assert!(effects.contains(&Effect::StartClock));
    assert!(effects.contains(&Effect::OpenPush { attempt: 2 }));
    assert_matches!(
        effects.last(),
        Some(Effect::CommandFinished(CommandOutcome {
            kind: CommandKind::Retry,
            result: Ok(_)
        }))
    );

    assert_eq!(session.generation(), old_generation + 1);
    assert_eq!(session.phase(), SessionPhase::Active);
    let reconciler = session.reconciler();
    assert_eq!(reconciler.watermark(), None);
    assert_eq!(reconciler.seen_count(), 0);
    let tracker = reconciler.tracker();
    assert_eq!(tracker.status(), JobStatus::Idle);
    assert!(tracker.files().is_empty());
    assert!(tracker
        .steps()
        .iter()
        .all(|step| step.status == StepStatus::Pending));
    assert_eq!(tracker.timing().started_at(), None);

    // A fetch issued before the retry must not leak into the new run.
    let effects = session.handle(
        SessionInput::FetchCompleted {
            generation: old_generation,
            purpose: FetchPurpose::Poll,
            result: Ok(FetchBatch {
                snapshot: snapshot(json!({"status": "failed"})),
                events: Vec::new(),
            }),
        },
        t(12),
    );
    assert!(effects.is_empty());
    assert_eq!(session.reconciler().tracker().status(), JobStatus::Idle);

    // Event ids from the previous run are accepted again.
    push_opened(&mut session, 13);
    push_event(&mut session, &event("1", "running", json!({}), 14), 14);
    assert_eq!(session.reconciler().tracker().status(), JobStatus::Running);
}

// ---------------------------------------------------------------------------
// Test: server-initiated reset reopens quickly
// ---------------------------------------------------------------------------

#[test]
fn connection_reset_reopens_fast() {
    let mut session = started_session();
    push_opened(&mut session, 0);
    let effects = push_frame(
        &mut session,
        json!({"type": "connection-reset", "data": {"reason": "deploy"}}),
        5,
    );
    let fast = session.config().fast_reopen_delay;
    assert!(effects.contains(&Effect::ScheduleReopen(fast)));
    assert!(effects.contains(&Effect::ClosePush));
    assert!(!activity_messages(&session).contains(&FALLBACK_LINE.to_string()));
}

// ---------------------------------------------------------------------------
// Test: poll-only environment
// ---------------------------------------------------------------------------

#[test]
fn unsupported_push_polls_until_terminal() {
    let mut session = started_session();
    let generation = session.generation();
    let effects = session.handle(SessionInput::PushUnsupported { generation }, t(0));
    assert_eq!(effects, vec![Effect::SchedulePoll(std::time::Duration::ZERO)]);

    let effects = poll_cycle(
        &mut session,
        FetchBatch {
            snapshot: snapshot(json!({"status": "running"})),
            events: Vec::new(),
        },
        1,
    );
    assert_eq!(
        effects.last(),
        Some(&Effect::SchedulePoll(session.config().poll_base_interval))
    );

    poll_cycle(
        &mut session,
        FetchBatch {
            snapshot: snapshot(json!({"status": "cancelled", "completed_at": t(30).to_rfc3339()})),
            events: Vec::new(),
        },
        31,
    );
    assert_eq!(session.phase(), SessionPhase::Finished);
    assert!(!session.poll().is_active());
}
