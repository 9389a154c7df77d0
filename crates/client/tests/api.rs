//! REST client tests against a mock job controller.

use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::json;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use jobwatch_client::api::{ApiError, JobApi, JobBackend};
use jobwatch_core::commands::Command;
use jobwatch_core::error::CommandError;
use jobwatch_core::status::JobStatus;

async fn api(server: &MockServer) -> JobApi {
    JobApi::new(format!("{}/api/", server.uri()), Duration::from_secs(5)).unwrap()
}

// ---------------------------------------------------------------------------
// Test: snapshot bodies
// ---------------------------------------------------------------------------

#[tokio::test]
async fn snapshot_accepts_bare_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/job-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "running",
            "started_at": "2026-03-01T10:00:00Z",
        })))
        .mount(&server)
        .await;

    let snapshot = api(&server).await.snapshot("job-1").await.unwrap();
    assert_eq!(snapshot.job_status(), Some(JobStatus::Running));
    assert!(snapshot.started().is_some());
}

#[tokio::test]
async fn snapshot_accepts_wrapped_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/job-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "job": {
                "status": "completed",
                "completed_at": "2026-03-01T10:05:00Z",
                "result": {"files": [{"file_name": "a.log", "chunk_count": 3}]},
            }
        })))
        .mount(&server)
        .await;

    let snapshot = api(&server).await.snapshot("job-1").await.unwrap();
    assert_eq!(snapshot.job_status(), Some(JobStatus::Completed));
    assert_eq!(snapshot.file_summaries().len(), 1);
}

// ---------------------------------------------------------------------------
// Test: event lists
// ---------------------------------------------------------------------------

#[tokio::test]
async fn events_sends_limit_and_accepts_both_shapes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/job-1/events"))
        .and(query_param("limit", "50"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 2, "event_type": "analysis-progress", "data": {"progress": 20}, "created_at": "2026-03-01T10:00:02Z"},
            {"id": "1", "event_type": "running", "created_at": "2026-03-01T10:00:01Z"},
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/job-2/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "events": [{"id": "9", "type": "created", "timestamp": "2026-03-01T09:59:00Z"}]
        })))
        .mount(&server)
        .await;

    let api = api(&server).await;
    let events = api.events("job-1", 50).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].id.as_deref(), Some("2"));
    assert_eq!(events[1].event_type, "running");

    let events = api.events("job-2", 50).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "created");
    assert!(events[0].timestamp().is_some());
}

// ---------------------------------------------------------------------------
// Test: commands
// ---------------------------------------------------------------------------

#[tokio::test]
async fn command_posts_body_and_returns_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/jobs/job-1/pause"))
        .and(body_json(json!({"reason": "maintenance"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "Job paused"})))
        .expect(1)
        .mount(&server)
        .await;

    let message = api(&server)
        .await
        .command(
            "job-1",
            &Command::Pause {
                reason: Some("maintenance".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(message, "Job paused");
}

#[tokio::test]
async fn command_accepts_empty_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/jobs/job-1/retry"))
        .and(body_json(json!({})))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let message = api(&server)
        .await
        .command("job-1", &Command::Retry)
        .await
        .unwrap();
    assert_eq!(message, "");
}

// ---------------------------------------------------------------------------
// Test: error bodies
// ---------------------------------------------------------------------------

#[tokio::test]
async fn error_message_is_extracted_from_json() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/jobs/job-1/resume"))
        .respond_with(
            ResponseTemplate::new(409).set_body_json(json!({"detail": "Job is not paused"})),
        )
        .mount(&server)
        .await;

    let err = api(&server)
        .await
        .command("job-1", &Command::Resume { note: None })
        .await
        .unwrap_err();
    assert_matches!(err, ApiError::Api { status: 409, ref message } if message == "Job is not paused");
    assert_matches!(CommandError::from(err), CommandError::Rejected(ref m) if m == "Job is not paused");
}

#[tokio::test]
async fn error_falls_back_to_raw_body_or_reason() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/job-1"))
        .respond_with(ResponseTemplate::new(502).set_body_string("upstream down"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/job-2"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let api = api(&server).await;
    let err = api.snapshot("job-1").await.unwrap_err();
    assert_matches!(err, ApiError::Api { status: 502, ref message } if message == "upstream down");

    let err = api.snapshot("job-2").await.unwrap_err();
    assert_matches!(err, ApiError::Api { status: 404, ref message } if message == "Not Found");
}

#[tokio::test]
async fn unreachable_controller_is_a_transport_error() {
    // Nothing listens on port 9 on the loopback interface.
    let api = JobApi::new("http://127.0.0.1:9/api", Duration::from_secs(2)).unwrap();
    let err = api.command("job-1", &Command::Retry).await.unwrap_err();
    assert_matches!(err, ApiError::Request(_));
    assert_matches!(CommandError::from(err), CommandError::Transport(_));
}
