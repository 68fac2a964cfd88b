//! Firehose client.
//!
//! Owns the single long-lived WebSocket connection: resumes from the
//! durable cursor, parses frames in arrival order, and hands them to the
//! dispatcher over a bounded channel. Transport errors reconnect with
//! exponential backoff and jitter; parse errors skip the frame and count
//! it. Backpressure from a full queue blocks the socket read, never drops.

use crate::cursor::CursorStore;
use crate::wire::{self, WANTED_COLLECTIONS};
use bsync_core::config::FirehoseConfig;
use bsync_core::{CommitFrame, Cursor};
use futures::StreamExt;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Connection lifecycle, surfaced in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Streaming,
    Terminated,
}

pub struct FirehoseClient {
    endpoint: String,
    backoff_base: Duration,
    backoff_cap: Duration,
    state: ClientState,
    reconnects: u64,
}

impl FirehoseClient {
    pub fn new(config: &FirehoseConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            backoff_base: Duration::from_secs(config.reconnect_backoff_base_seconds.max(1)),
            backoff_cap: Duration::from_secs(config.reconnect_backoff_cap_seconds.max(1)),
            state: ClientState::Disconnected,
            reconnects: 0,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    /// Subscribe URL with the wanted-collections filter and, when resuming,
    /// the last committed offset.
    pub fn subscribe_url(&self, cursor: Option<Cursor>) -> String {
        let mut url = String::from(&self.endpoint);
        let mut sep = if url.contains('?') { '&' } else { '?' };
        for collection in WANTED_COLLECTIONS {
            url.push(sep);
            url.push_str("wantedCollections=");
            url.push_str(collection);
            sep = '&';
        }
        if let Some(cursor) = cursor {
            url.push(sep);
            url.push_str("cursor=");
            url.push_str(&cursor.to_string());
        }
        url
    }

    /// Runs until shutdown. Returns an error only when the dispatcher side
    /// of the queue is gone, which means the process is coming down anyway.
    pub async fn run(
        &mut self,
        cursor_store: Arc<dyn CursorStore>,
        tx: mpsc::Sender<CommitFrame>,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        let mut backoff = self.backoff_base;
        loop {
            if cancel.is_cancelled() {
                self.state = ClientState::Terminated;
                return Ok(());
            }
            self.state = ClientState::Connecting;

            // Re-read the cursor on every (re)connect: the dispatcher owns
            // it, and resuming from its last durable value gives an
            // overlapping, idempotent replay instead of a gap.
            let cursor = match cursor_store.load().await {
                Ok(cursor) => cursor,
                Err(e) => {
                    warn!(error = %e, "cursor load failed; resuming from latest");
                    None
                }
            };
            let url = self.subscribe_url(cursor);
            info!(%url, "connecting to firehose");

            let mut stream = match connect_async(url.as_str()).await {
                Ok((stream, _response)) => stream,
                Err(e) => {
                    warn!(error = %e, "firehose connect failed");
                    self.state = ClientState::Disconnected;
                    if !self.sleep_backoff(&mut backoff, &cancel).await {
                        self.state = ClientState::Terminated;
                        return Ok(());
                    }
                    continue;
                }
            };
            self.state = ClientState::Streaming;
            backoff = self.backoff_base;
            info!(resumed_from = ?cursor, "firehose streaming");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        self.state = ClientState::Terminated;
                        return Ok(());
                    }
                    message = stream.next() => match message {
                        Some(Ok(Message::Text(text))) => {
                            match wire::parse_frame(text.as_str()) {
                                Ok(Some(frame)) => {
                                    metrics::counter!("bsync_frames_received", 1);
                                    if tx.send(frame).await.is_err() {
                                        anyhow::bail!("dispatcher queue closed");
                                    }
                                }
                                Ok(None) => {}
                                Err(e) => {
                                    metrics::counter!("bsync_frame_parse_errors", 1);
                                    warn!(error = %e, "skipping unparseable frame");
                                }
                            }
                        }
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                        Some(Ok(Message::Close(reason))) => {
                            debug!(?reason, "firehose closed the connection");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "firehose transport error");
                            break;
                        }
                        None => {
                            warn!("firehose stream ended");
                            break;
                        }
                    }
                }
            }

            self.state = ClientState::Disconnected;
            if !self.sleep_backoff(&mut backoff, &cancel).await {
                self.state = ClientState::Terminated;
                return Ok(());
            }
        }
    }

    /// Sleeps the current backoff (with up to 50% jitter), doubles it
    /// toward the cap, and counts the reconnect. Returns false when
    /// shutdown arrived mid-sleep.
    async fn sleep_backoff(&mut self, backoff: &mut Duration, cancel: &CancellationToken) -> bool {
        self.reconnects += 1;
        metrics::counter!("bsync_reconnects", 1);
        let jitter = rand::rng().random_range(1.0..1.5);
        let delay = backoff.mul_f64(jitter).min(self.backoff_cap);
        debug!(?delay, reconnects = self.reconnects, "backing off before reconnect");
        *backoff = (*backoff * 2).min(self.backoff_cap);
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = cancel.cancelled() => false,
        }
    }
}
