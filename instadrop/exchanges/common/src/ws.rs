//! Relay WebSocket transport.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError},
    task::JoinHandle,
};
use tokio_tungstenite::{WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, trace};
use url::Url;

use crate::{ChannelError, Frame, FrameChannel, Role, RoomId, TryRecv};

pub const DEFAULT_API_URL: &str = "http://localhost:8000";

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("unsupported scheme in `{0}`, expected http(s) or ws(s)")]
    Scheme(String),
    #[error("invalid relay url: {0}")]
    Url(#[from] url::ParseError),
}

/// Base WebSocket URL of a relay, derived from its HTTP API URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayEndpoint {
    base: String,
}

impl RelayEndpoint {
    /// Maps `http(s)://` to `ws(s)://` after trimming whitespace and a
    /// trailing slash. WebSocket URLs are accepted as they are.
    pub fn from_api_url(api_url: &str) -> Result<Self, EndpointError> {
        let trimmed = api_url.trim().trim_end_matches('/');

        let base = if let Some(rest) = strip_scheme(trimmed, "https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = strip_scheme(trimmed, "http://") {
            format!("ws://{rest}")
        } else if strip_scheme(trimmed, "wss://").is_some()
            || strip_scheme(trimmed, "ws://").is_some()
        {
            trimmed.to_owned()
        } else {
            return Err(EndpointError::Scheme(trimmed.to_owned()));
        };

        Url::parse(&base)?;
        Ok(Self { base })
    }

    pub fn as_str(&self) -> &str {
        &self.base
    }

    /// `{base}/ws/drop/{room}/{role}`
    pub fn channel_url(
        &self,
        room: &RoomId,
        role: Role,
    ) -> Result<Url, EndpointError> {
        Ok(Url::parse(&format!("{}/ws/drop/{room}/{role}", self.base))?)
    }
}

impl Default for RelayEndpoint {
    fn default() -> Self {
        Self {
            base: "ws://localhost:8000".to_owned(),
        }
    }
}

fn strip_scheme<'a>(url: &'a str, scheme: &str) -> Option<&'a str> {
    url.get(..scheme.len())
        .filter(|prefix| prefix.eq_ignore_ascii_case(scheme))
        .map(|_| &url[scheme.len()..])
}

/// [`FrameChannel`] over a relay WebSocket.
///
/// A writer task drains the outbound queue into the socket; `buffered_amount`
/// is the number of payload bytes still in that queue. A reader task feeds
/// inbound text and binary messages into a queue consumed by `recv`.
pub struct WsChannel {
    outbound: Option<UnboundedSender<Message>>,
    inbound: UnboundedReceiver<Frame>,
    buffered: Arc<AtomicU64>,
    writer: Option<JoinHandle<()>>,
    reader: JoinHandle<()>,
}

impl WsChannel {
    pub async fn connect(
        endpoint: &RelayEndpoint,
        room: &RoomId,
        role: Role,
    ) -> Result<Self, ChannelError> {
        let url = endpoint
            .channel_url(room, role)
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        debug!("connecting to relay at {url}");

        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream<S>(stream: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Frame>();
        let buffered = Arc::new(AtomicU64::new(0));

        let pending = buffered.clone();
        let writer = tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let len = match &message {
                    Message::Text(text) => text.len(),
                    Message::Binary(bytes) => bytes.len(),
                    _ => 0,
                } as u64;
                let closing = matches!(message, Message::Close(_));

                let result = sink.send(message).await;
                pending.fetch_sub(len, Ordering::AcqRel);
                if let Err(e) = result {
                    debug!("websocket write failed: {e}");
                    break;
                }
                if closing {
                    break;
                }
            }
            if let Err(e) = sink.close().await {
                trace!("websocket close: {e}");
            }
        });

        let reader = tokio::spawn(async move {
            while let Some(message) = source.next().await {
                let frame = match message {
                    Ok(Message::Text(text)) => {
                        Frame::Text(text.as_str().to_owned())
                    }
                    Ok(Message::Binary(bytes)) => Frame::Binary(bytes.to_vec()),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!("websocket read failed: {e}");
                        break;
                    }
                };
                if in_tx.send(frame).is_err() {
                    break;
                }
            }
        });

        Self {
            outbound: Some(out_tx),
            inbound: in_rx,
            buffered,
            writer: Some(writer),
            reader,
        }
    }
}

impl FrameChannel for WsChannel {
    async fn send(&mut self, frame: Frame) -> Result<(), ChannelError> {
        let outbound = self.outbound.as_ref().ok_or(ChannelError::Closed)?;
        let len = frame.len() as u64;
        let message = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(bytes) => Message::Binary(bytes.into()),
        };

        self.buffered.fetch_add(len, Ordering::AcqRel);
        outbound.send(message).map_err(|_| {
            self.buffered.fetch_sub(len, Ordering::AcqRel);
            ChannelError::Closed
        })
    }

    async fn recv(&mut self) -> Option<Frame> {
        self.inbound.recv().await
    }

    fn try_recv(&mut self) -> TryRecv {
        match self.inbound.try_recv() {
            Ok(frame) => TryRecv::Frame(frame),
            Err(TryRecvError::Empty) => TryRecv::Empty,
            Err(TryRecvError::Disconnected) => TryRecv::Closed,
        }
    }

    fn buffered_amount(&self) -> u64 {
        self.buffered.load(Ordering::Acquire)
    }

    /// Flushes queued frames, then sends a close frame.
    async fn close(&mut self) -> Result<(), ChannelError> {
        if let Some(outbound) = self.outbound.take() {
            // The writer may already be gone after a write error.
            let _ = outbound.send(Message::Close(None));
        }
        if let Some(writer) = self.writer.take() {
            writer
                .await
                .map_err(|e| ChannelError::Transport(e.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
