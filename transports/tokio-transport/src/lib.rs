//! Tokio WebSocket channel for voicelink chat threads.
//!
//! Every chat thread has its own socket at `<base>/ws/chat/<thread_id>/`.
//! Frames are JSON text; binary frames are ignored.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, trace, warn};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// An event produced by a chat-thread channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A text frame has been received.
    Message(String),
    /// The connection is gone. Sent exactly once, as the last event.
    Closed,
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel is closed")]
    Closed,

    #[error("send failed: {0}")]
    Send(String),
}

/// Sending half of a chat thread's bidirectional message channel.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Sends one JSON text message to the thread.
    async fn send(&self, text: String) -> Result<(), ChannelError>;

    fn is_open(&self) -> bool;

    /// Closes the connection. Idempotent.
    async fn close(&self);
}

/// Opens channels for chat threads.
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    /// Connects to `thread_id` and returns the channel along with its inbound events.
    async fn connect(
        &self,
        thread_id: &str,
    ) -> Result<(Arc<dyn MessageChannel>, mpsc::Receiver<ChannelEvent>), anyhow::Error>;
}

const EVENT_BUFFER: usize = 100;

/// Socket URL for one chat thread.
pub fn chat_socket_url(base_url: &str, thread_id: &str) -> String {
    format!("{}/ws/chat/{}/", base_url.trim_end_matches('/'), thread_id)
}

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

/// Tokio-based WebSocket channel
pub struct WebSocketChannel {
    sink: Mutex<Option<WsSink>>,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl MessageChannel for WebSocketChannel {
    async fn send(&self, text: String) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::Closed);
        }

        let mut sink_guard = self.sink.lock().await;
        let sink = sink_guard.as_mut().ok_or(ChannelError::Closed)?;

        debug!("--> Sending text frame: {} bytes", text.len());
        sink.send(Message::text(text))
            .await
            .map_err(|e| ChannelError::Send(e.to_string()))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    async fn close(&self) {
        self.open.store(false, Ordering::Release);
        if let Some(mut sink) = self.sink.lock().await.take()
            && let Err(e) = sink.close().await
        {
            debug!("Error while closing websocket: {e}");
        }
    }
}

/// Factory for chat-thread WebSocket channels
pub struct WebSocketChannelFactory {
    base_url: String,
}

impl WebSocketChannelFactory {
    /// `base_url` is the scheme and authority, e.g. `ws://localhost:8000`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ChannelFactory for WebSocketChannelFactory {
    async fn connect(
        &self,
        thread_id: &str,
    ) -> Result<(Arc<dyn MessageChannel>, mpsc::Receiver<ChannelEvent>), anyhow::Error> {
        let url = chat_socket_url(&self.base_url, thread_id);
        info!("Dialing {url}");

        let (ws, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket connect failed: {}", e))?;
        let (sink, stream) = ws.split();

        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let open = Arc::new(AtomicBool::new(true));
        let channel = Arc::new(WebSocketChannel {
            sink: Mutex::new(Some(sink)),
            open: open.clone(),
        });

        tokio::spawn(read_pump(stream, event_tx, open));

        Ok((channel, event_rx))
    }
}

async fn read_pump(
    mut stream: WsStream,
    event_tx: mpsc::Sender<ChannelEvent>,
    open: Arc<AtomicBool>,
) {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                debug!("<-- Received text frame: {} bytes", text.len());
                if event_tx
                    .send(ChannelEvent::Message(text.as_str().to_owned()))
                    .await
                    .is_err()
                {
                    warn!("Event receiver dropped, closing read pump");
                    break;
                }
            }
            Some(Ok(Message::Close(_))) => {
                trace!("Received close frame");
                break;
            }
            Some(Ok(other)) => {
                trace!("Ignoring non-text frame ({} bytes)", other.len());
            }
            Some(Err(e)) => {
                warn!("Error reading from websocket: {e}");
                break;
            }
            None => {
                trace!("Websocket stream ended");
                break;
            }
        }
    }

    open.store(false, Ordering::Release);
    let _ = event_tx.send(ChannelEvent::Closed).await;
}
