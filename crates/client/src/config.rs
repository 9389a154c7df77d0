use std::path::PathBuf;
use std::time::Duration;

use jobwatch_core::config::SyncConfig;

/// Default REST base URL for local development.
pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";
/// Default HTTP request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client configuration loaded from environment variables.
///
/// All fields except the job id have defaults suitable for local
/// development.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST base URL (default: `http://localhost:8000/api`).
    pub api_url: String,
    /// WebSocket base URL. `None` disables the push channel.
    pub ws_url: Option<String>,
    /// Job to watch. Required by the binary.
    pub job_id: Option<String>,
    /// Where the text export is written; stdout when unset.
    pub export_path: Option<PathBuf>,
    /// Per-request HTTP timeout (default: 10 s).
    pub request_timeout: Duration,
    /// Session intervals and limits.
    pub sync: SyncConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

impl ClientConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default                          |
    /// |----------------------------------|----------------------------------|
    /// | `JOBWATCH_API_URL`               | `http://localhost:8000/api`      |
    /// | `JOBWATCH_WS_URL`                | API URL with `http` -> `ws` (`off` disables) |
    /// | `JOBWATCH_JOB_ID`                | --                               |
    /// | `JOBWATCH_POLL_BASE_MS`          | `500`                            |
    /// | `JOBWATCH_POLL_MAX_MS`           | `8000`                           |
    /// | `JOBWATCH_MAX_POLL_CYCLES`       | `600`                            |
    /// | `JOBWATCH_REOPEN_DELAY_MS`       | `3000`                           |
    /// | `JOBWATCH_FAST_REOPEN_DELAY_MS`  | `500`                            |
    /// | `JOBWATCH_EVENT_LIMIT`           | `200`                            |
    /// | `JOBWATCH_REQUEST_TIMEOUT_SECS`  | `10`                             |
    /// | `JOBWATCH_EXPORT_PATH`           | unset (stdout)                   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_url = get("JOBWATCH_API_URL")
            .unwrap_or_else(|| DEFAULT_API_URL.into())
            .trim_end_matches('/')
            .to_string();

        let ws_url = match get("JOBWATCH_WS_URL") {
            Some(v) if matches!(v.to_ascii_lowercase().as_str(), "off" | "none" | "disabled") => None,
            Some(v) => Some(v.trim_end_matches('/').to_string()),
            None => Some(derive_ws_url(&api_url)),
        };

        let defaults = SyncConfig::default();
        let sync = SyncConfig {
            poll_base_interval: millis(&get, "JOBWATCH_POLL_BASE_MS", defaults.poll_base_interval)?,
            poll_max_interval: millis(&get, "JOBWATCH_POLL_MAX_MS", defaults.poll_max_interval)?,
            max_poll_cycles: number(&get, "JOBWATCH_MAX_POLL_CYCLES", defaults.max_poll_cycles)?,
            reopen_delay: millis(&get, "JOBWATCH_REOPEN_DELAY_MS", defaults.reopen_delay)?,
            fast_reopen_delay: millis(
                &get,
                "JOBWATCH_FAST_REOPEN_DELAY_MS",
                defaults.fast_reopen_delay,
            )?,
            event_limit: number(&get, "JOBWATCH_EVENT_LIMIT", defaults.event_limit)?,
            ..defaults
        };

        let request_timeout = Duration::from_secs(number(
            &get,
            "JOBWATCH_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT.as_secs(),
        )?);

        Ok(Self {
            api_url,
            ws_url,
            job_id: get("JOBWATCH_JOB_ID"),
            export_path: get("JOBWATCH_EXPORT_PATH").map(PathBuf::from),
            request_timeout,
            sync,
        })
    }
}

/// `http://host/api` -> `ws://host/api`, `https` -> `wss`.
pub fn derive_ws_url(api_url: &str) -> String {
    if let Some(rest) = api_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = api_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        api_url.to_string()
    }
}

fn number<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(var) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
            var,
            expected: "a non-negative integer",
            value,
        }),
    }
}

fn millis(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let default_ms = default.as_millis() as u64;
    number(get, var, default_ms).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ClientConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ClientConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.api_url, DEFAULT_API_URL);
        assert_eq!(cfg.ws_url.as_deref(), Some("ws://localhost:8000/api"));
        assert_eq!(cfg.job_id, None);
        assert_eq!(cfg.sync, SyncConfig::default());
        assert_eq!(cfg.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    fn overrides() {
        let cfg = config(&[
            ("JOBWATCH_API_URL", "https://jobs.example.com/api/"),
            ("JOBWATCH_JOB_ID", "abc-123"),
            ("JOBWATCH_POLL_BASE_MS", "250"),
            ("JOBWATCH_MAX_POLL_CYCLES", "10"),
            ("JOBWATCH_EXPORT_PATH", "/tmp/report.txt"),
        ])
        .unwrap();
        assert_eq!(cfg.api_url, "https://jobs.example.com/api");
        assert_eq!(cfg.ws_url.as_deref(), Some("wss://jobs.example.com/api"));
        assert_eq!(cfg.job_id.as_deref(), Some("abc-123"));
        assert_eq!(cfg.sync.poll_base_interval, Duration::from_millis(250));
        assert_eq!(cfg.sync.max_poll_cycles, 10);
        assert_eq!(cfg.export_path, Some(PathBuf::from("/tmp/report.txt")));
    }

    #[test]
    fn push_can_be_disabled() {
        let cfg = config(&[("JOBWATCH_WS_URL", "off")]).unwrap();
        assert_eq!(cfg.ws_url, None);
    }

    #[test]
    fn invalid_number_is_an_error() {
        let err = config(&[("JOBWATCH_EVENT_LIMIT", "lots")]).unwrap_err();
        assert_matches!(
            err,
            ConfigError::Invalid {
                var: "JOBWATCH_EVENT_LIMIT",
                ..
            }
        );
    }
}
