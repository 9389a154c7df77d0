//! WebSocket push channel for one job.
//!
//! [`WsPushConnector::connect`] opens `{ws}/jobs/{id}/stream?clientId=<uuid>`
//! and returns a stream of parsed [`ChannelMessage`]s. Text frames that do
//! not parse are logged and skipped; a close frame ends the stream and a
//! transport error is yielded once before it ends.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

use jobwatch_core::channel::{parse_frame, ChannelMessage};

/// Stream of push-channel messages for one open connection.
pub type PushStream = BoxStream<'static, Result<ChannelMessage, PushError>>;

/// Opens push subscriptions. The driver depends on this seam, not on the
/// WebSocket client directly.
#[async_trait]
pub trait PushConnector: Send + Sync + 'static {
    async fn connect(&self, job_id: &str) -> Result<PushStream, PushError>;
}

/// Errors that can occur on the push channel.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// The environment offers no push transport; poll instead.
    #[error("Push channel unsupported: {0}")]
    Unsupported(String),

    /// Failed to establish the connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol-level error on an established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// [`PushConnector`] over `tokio-tungstenite`.
///
/// With no WebSocket URL configured every connect reports
/// [`PushError::Unsupported`].
pub struct WsPushConnector {
    ws_url: Option<String>,
}

impl WsPushConnector {
    /// * `ws_url` - WebSocket base URL, e.g. `ws://host:8000/api`.
    pub fn new(ws_url: Option<String>) -> Self {
        let ws_url = ws_url.map(|url| url.trim_end_matches('/').to_string());
        Self { ws_url }
    }

    pub fn ws_url(&self) -> Option<&str> {
        self.ws_url.as_deref()
    }
}

#[async_trait]
impl PushConnector for WsPushConnector {
    async fn connect(&self, job_id: &str) -> Result<PushStream, PushError> {
        let Some(base) = &self.ws_url else {
            return Err(PushError::Unsupported(
                "no WebSocket URL configured".to_string(),
            ));
        };
        let client_id = uuid::Uuid::new_v4().to_string();
        let url = format!("{base}/jobs/{job_id}/stream?clientId={client_id}");

        let (ws_stream, _response) = connect_async(&url).await.map_err(|e| match e {
            // No stream endpoint on this server.
            tungstenite::Error::Http(response)
                if matches!(response.status().as_u16(), 404 | 405 | 501) =>
            {
                PushError::Unsupported(format!(
                    "stream endpoint answered {}",
                    response.status()
                ))
            }
            other => PushError::Connection(format!("Failed to connect to {base}: {other}")),
        })?;

        tracing::info!(
            job_id = %job_id,
            client_id = %client_id,
            "Connected to job stream at {base}",
        );

        let (_sink, frames) = ws_stream.split();
        Ok(into_messages(frames))
    }
}

/// Map raw WebSocket frames to channel messages.
///
/// Ends after a close frame, after the underlying stream ends, or right
/// after yielding a transport error.
fn into_messages<S>(frames: S) -> PushStream
where
    S: futures::Stream<Item = Result<Message, tungstenite::Error>> + Send + Unpin + 'static,
{
    stream::unfold(Some(frames), |state| async move {
        let Some(mut frames) = state else {
            return None;
        };
        loop {
            match frames.next().await {
                Some(Ok(Message::Text(text))) => match parse_frame(&text) {
                    Ok(message) => return Some((Ok(message), Some(frames))),
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping unparseable stream frame");
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(?frame, "Job stream closed by server");
                    return None;
                }
                Some(Ok(_)) => {
                    // Ping / Pong / Binary: nothing to apply.
                }
                Some(Err(e)) => {
                    return Some((Err(PushError::Protocol(e.to_string())), None));
                }
                None => return None,
            }
        }
    })
    .boxed()
}
