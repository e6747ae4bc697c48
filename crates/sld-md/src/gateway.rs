//! Websocket ingest loop.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};

use sld_config::PriceStreamConfig;
use sld_schemas::PriceEvent;

use crate::{decode_price_event, Backoff, StreamError};

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub url: String,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub connect_timeout: Duration,
}

impl GatewayConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn from_settings(url: &str, cfg: &PriceStreamConfig) -> Self {
        Self {
            url: url.to_string(),
            initial_backoff: cfg.initial_backoff(),
            max_backoff: cfg.max_backoff(),
            connect_timeout: cfg.connect_timeout(),
        }
    }
}

/// How a session ended without an error.
enum SessionEnd {
    /// The consumer dropped the queue; the gateway has nobody to feed.
    QueueClosed,
}

#[derive(Debug, Default)]
struct SessionStats {
    delivered: u64,
    dropped: u64,
}

pub struct PriceStreamGateway {
    config: GatewayConfig,
}

impl PriceStreamGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }

    /// Spawn [`PriceStreamGateway::run`] on the runtime.
    pub fn start(self, queue: mpsc::Sender<PriceEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(queue))
    }

    /// Keep one connection alive until the queue's receiver is dropped.
    ///
    /// Connection and read failures are never fatal: the loop waits out the
    /// current backoff delay and reconnects.
    pub async fn run(self, queue: mpsc::Sender<PriceEvent>) {
        let mut backoff = Backoff::new(self.config.initial_backoff, self.config.max_backoff);

        loop {
            match self.run_session(&queue, &mut backoff).await {
                Ok(SessionEnd::QueueClosed) => {
                    info!(url = %self.config.url, "price queue closed; stream gateway stopping");
                    return;
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(
                        url = %self.config.url,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "price stream unavailable; reconnecting"
                    );
                    tokio::time::sleep(delay).await;
                    if queue.is_closed() {
                        info!("price queue closed during backoff; stream gateway stopping");
                        return;
                    }
                }
            }
        }
    }

    async fn run_session(
        &self,
        queue: &mpsc::Sender<PriceEvent>,
        backoff: &mut Backoff,
    ) -> Result<SessionEnd, StreamError> {
        let url = self.config.url.as_str();
        let connect_err = |reason: String| StreamError::Connect {
            url: url.to_string(),
            reason,
        };

        let (ws_stream, _response) = match timeout(self.config.connect_timeout, connect_async(url))
            .await
        {
            Ok(Ok(ok)) => ok,
            Ok(Err(e)) => return Err(connect_err(e.to_string())),
            Err(_) => {
                return Err(connect_err(format!(
                    "timed out after {:?}",
                    self.config.connect_timeout
                )))
            }
        };

        backoff.reset();
        info!(url = %url, "price stream connected");

        let mut read = ws_stream;
        let mut stats = SessionStats::default();

        let end = loop {
            let text = match read.next().await {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(_) => {
                        stats.dropped += 1;
                        warn!("dropping non-utf8 binary price frame");
                        continue;
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "price stream close frame");
                    break Err(StreamError::Closed);
                }
                // Ping/pong are answered by tungstenite on the next read.
                Some(Ok(_)) => continue,
                Some(Err(e)) => break Err(StreamError::Read(e.to_string())),
                None => break Err(StreamError::Closed),
            };

            let event = match decode_price_event(&text) {
                Ok(ev) => ev,
                Err(e) => {
                    stats.dropped += 1;
                    warn!(error = %e, "dropping price message");
                    continue;
                }
            };

            // Blocks while the queue is full.
            if queue.send(event).await.is_err() {
                break Ok(SessionEnd::QueueClosed);
            }
            stats.delivered += 1;
        };

        info!(
            url = %url,
            delivered = stats.delivered,
            dropped = stats.dropped,
            "price stream session ended"
        );
        end
    }
}
