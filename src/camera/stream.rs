//! Continuous stream transport
//!
//! The MJPEG stream is consumed as a raw byte stream; chunk arrival and
//! stream termination are what drive the feed state machine, the payload
//! itself goes straight to the display channel.

use super::manager::CameraEvent;
use super::state::FeedEvent;
use crate::api::ApiError;
use crate::protocol::now_ms;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::debug;

/// Opens the continuous feed transport; mockable for tests
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn open(&self, url: &str) -> Result<BoxStream<'static, Result<Bytes, ApiError>>, ApiError>;
}

/// reqwest-backed stream transport
pub struct HttpStreamTransport {
    client: reqwest::Client,
}

impl HttpStreamTransport {
    pub fn new() -> Self {
        // No request timeout here: the stream is expected to stay open
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpStreamTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamTransport for HttpStreamTransport {
    async fn open(&self, url: &str) -> Result<BoxStream<'static, Result<Bytes, ApiError>>, ApiError> {
        let response = self.client.get(url).send().await?;
        if let Some(err) = ApiError::from_status(response.status()) {
            return Err(err);
        }
        Ok(response.bytes_stream().map(|r| r.map_err(ApiError::from)).boxed())
    }
}

/// Supervise one stream attachment
///
/// Forwards open/chunk/termination as feed events tagged with the attachment
/// generation, so the manager can ignore a superseded supervisor's tail.
pub(crate) async fn run_stream(
    transport: std::sync::Arc<dyn StreamTransport>,
    url: String,
    generation: u64,
    events: mpsc::UnboundedSender<CameraEvent>,
    frames: mpsc::Sender<Bytes>,
) {
    let send = |event: FeedEvent| {
        let _ = events.send(CameraEvent::FromStream { generation, event });
    };

    let mut chunks = match transport.open(&url).await {
        Ok(chunks) => {
            send(FeedEvent::StreamOpened);
            chunks
        }
        Err(ApiError::Throttled) => {
            send(FeedEvent::Throttled);
            return;
        }
        Err(e) => {
            debug!("Stream open failed: {}", e);
            send(FeedEvent::StreamError);
            return;
        }
    };

    loop {
        match chunks.next().await {
            Some(Ok(chunk)) => {
                send(FeedEvent::FrameReceived(now_ms()));
                // Display channel is best-effort; drop frames under backpressure
                let _ = frames.try_send(chunk);
            }
            Some(Err(e)) => {
                debug!("Stream read failed: {}", e);
                send(FeedEvent::StreamError);
                return;
            }
            None => {
                // Server closed the stream
                send(FeedEvent::StreamError);
                return;
            }
        }
    }
}
