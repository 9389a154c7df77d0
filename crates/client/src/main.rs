//! `jobwatch` -- follow one job's progress until it finishes.
//!
//! Subscribes to the job's live stream, falls back to polling when the
//! stream is unavailable, and logs status, progress and connection health
//! as they change. When the job reaches a terminal status, the session
//! stalls, or Ctrl-C is pressed, a text report is written to
//! `JOBWATCH_EXPORT_PATH` (or stdout) and the process exits.
//!
//! # Environment variables
//!
//! | Variable                        | Required | Default                     | Description                          |
//! |---------------------------------|----------|-----------------------------|--------------------------------------|
//! | `JOBWATCH_JOB_ID`               | yes      | --                          | Job to follow                        |
//! | `JOBWATCH_API_URL`              | no       | `http://localhost:8000/api` | REST base URL                        |
//! | `JOBWATCH_WS_URL`               | no       | derived from the API URL    | Stream base URL, `off` to poll only  |
//! | `JOBWATCH_EXPORT_PATH`          | no       | stdout                      | Where the final report is written    |
//! | `JOBWATCH_REQUEST_TIMEOUT_SECS` | no       | `10`                        | Per-request HTTP timeout             |
//!
//! Poll and reopen intervals are listed on
//! [`ClientConfig::from_env`](jobwatch_client::config::ClientConfig::from_env).

use std::sync::Arc;

use jobwatch_client::api::JobApi;
use jobwatch_client::config::ClientConfig;
use jobwatch_client::driver::{SyncDriver, SyncHandle};
use jobwatch_client::stream::WsPushConnector;
use jobwatch_core::status::HealthLevel;
use jobwatch_core::view::ProgressView;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jobwatch=info,jobwatch_client=info,jobwatch_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ClientConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    let job_id = config.job_id.clone().unwrap_or_else(|| {
        tracing::error!("JOBWATCH_JOB_ID environment variable is required");
        std::process::exit(1);
    });

    let api = JobApi::new(&config.api_url, config.request_timeout).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to build HTTP client");
        std::process::exit(1);
    });

    tracing::info!(
        job_id = %job_id,
        api_url = %config.api_url,
        ws_url = config.ws_url.as_deref().unwrap_or("off"),
        "Starting jobwatch",
    );

    let (handle, task) = SyncDriver::spawn(
        job_id,
        config.sync.clone(),
        Arc::new(api),
        Arc::new(WsPushConnector::new(config.ws_url.clone())),
    );

    tokio::select! {
        _ = follow(&handle) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, writing report");
        }
    }

    let report = handle.export();
    handle.shutdown().await;
    if let Err(e) = task.await {
        tracing::warn!(error = %e, "Sync driver task ended abnormally");
    }

    match &config.export_path {
        Some(path) => match std::fs::write(path, &report) {
            Ok(()) => tracing::info!(path = %path.display(), "Report written"),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to write report");
                std::process::exit(1);
            }
        },
        None => print!("{report}"),
    }
}

/// Log view changes until the job finishes or the session needs a manual
/// reconnect.
async fn follow(handle: &SyncHandle) {
    let mut views = handle.subscribe();
    let mut last: Option<Summary> = None;

    loop {
        let view = views.borrow_and_update().clone();
        let summary = Summary::of(&view);
        if last.as_ref() != Some(&summary) {
            log_changes(last.as_ref(), &summary, &view);
            last = Some(summary);
        }

        if view.is_terminal() {
            return;
        }
        if view.health.needs_manual_retry {
            tracing::error!(reason = %view.health.reason, "Sync stalled");
            return;
        }
        if views.changed().await.is_err() {
            return;
        }
    }
}

/// The parts of a view worth a log line when they change.
#[derive(PartialEq)]
struct Summary {
    status: &'static str,
    progress: String,
    health: HealthLevel,
    health_reason: String,
    files: usize,
}

impl Summary {
    fn of(view: &ProgressView) -> Self {
        Self {
            status: view.status_label,
            progress: view.progress_label(),
            health: view.health.level,
            health_reason: view.health.reason.clone(),
            files: view.files.len(),
        }
    }
}

fn log_changes(before: Option<&Summary>, after: &Summary, view: &ProgressView) {
    let progressed = before.map_or(true, |b| {
        b.status != after.status || b.progress != after.progress || b.files != after.files
    });
    let health_changed = before.map_or(true, |b| {
        b.health != after.health || b.health_reason != after.health_reason
    });

    if progressed {
        tracing::info!(
            status = after.status,
            progress = %after.progress,
            files = after.files,
            elapsed = %view.elapsed,
            eta = %view.eta,
            "Progress",
        );
    }
    if health_changed {
        match after.health {
            HealthLevel::Healthy => tracing::info!(reason = %after.health_reason, "Connection healthy"),
            HealthLevel::Degraded => tracing::warn!(reason = %after.health_reason, "Connection degraded"),
            HealthLevel::Failed => tracing::error!(reason = %after.health_reason, "Connection failed"),
        }
    }
}
