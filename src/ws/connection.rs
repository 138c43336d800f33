//! WebSocket transport session
//!
//! One physical connection to a push endpoint, exposed as a text-frame
//! sink (shared, cloneable writer) and a text-frame stream (single reader).
//! No protocol knowledge and no retry logic: the supervisor owns both.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

/// Outbound half of a session, type-erased over the transport
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half of a session, type-erased over the transport
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake done, frames may flow
    Open,
    /// Closed locally or by the peer
    Closed,
}

/// Errors that can occur on the transport
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Connection is not open after handshake")]
    NotOpen,
    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, TransportError>;

/// Opens transport sessions
///
/// The seam between the supervisor and the network. `WsConnector` is the
/// production implementation; tests plug in scripted connectors.
pub trait Connector: Send + Sync + 'static {
    fn open(&self, url: &str) -> impl Future<Output = Result<Session>> + Send;
}

/// tokio-tungstenite backed connector
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    async fn open(&self, url: &str) -> Result<Session> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(|e| TransportError::SendFailed(e.to_string()))
            .with(|text: String| async move { Ok::<_, TransportError>(Message::text(text)) });

        // Text frames only; control frames are answered by tungstenite itself.
        // A close frame ends the sequence.
        let frames = read
            .take_while(|msg| futures_util::future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(|msg| async move {
                match msg {
                    Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                    Ok(Message::Binary(data)) => Some(
                        String::from_utf8(data.to_vec())
                            .map_err(|e| TransportError::ReceiveFailed(e.to_string())),
                    ),
                    Ok(_) => None,
                    Err(e) => Some(Err(TransportError::ReceiveFailed(e.to_string()))),
                }
            });

        Ok(Session::from_parts(url, sink, frames))
    }
}

/// Cloneable writer over the session's sink
///
/// Shared by the supervisor (handshake, close) and the heartbeat monitor
/// (PINGs). The open flag is shared by every clone.
#[derive(Clone)]
pub struct SessionWriter {
    sink: Arc<Mutex<FrameSink>>,
    open: Arc<AtomicBool>,
}

impl SessionWriter {
    /// Send one text frame
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed);
        }
        let mut sink = self.sink.lock().await;
        sink.send(text.into()).await
    }

    /// Close the sink. Idempotent: only the first call touches the transport.
    pub async fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            let mut sink = self.sink.lock().await;
            if let Err(e) = sink.close().await {
                tracing::debug!(error = %e, "error while closing session");
            }
        }
    }

    /// Close, giving up on the transport after `limit`
    ///
    /// The writer counts as closed either way. Returns false when the sink
    /// did not finish closing in time, e.g. because a send is stuck on it.
    pub async fn close_within(&self, limit: Duration) -> bool {
        match timeout(limit, self.close()).await {
            Ok(()) => true,
            Err(_) => {
                self.open.store(false, Ordering::Release);
                false
            }
        }
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        if self.is_open() {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }
}

/// Frame stream that clears the shared open flag once the peer is gone
struct TrackedFrames {
    inner: FrameStream,
    open: Arc<AtomicBool>,
}

impl Stream for TrackedFrames {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let item = ready!(self.inner.as_mut().poll_next(cx));
        if !matches!(item, Some(Ok(_))) {
            self.open.store(false, Ordering::Release);
        }
        Poll::Ready(item)
    }
}

/// One transport connection: endpoint URL, writer and frame stream
///
/// Writes go through [`Session::writer`]; the session itself only reads.
pub struct Session {
    url: String,
    writer: SessionWriter,
    frames: FrameStream,
}

impl Session {
    /// Assemble a session from any text sink/stream pair
    pub fn from_parts<S, R>(url: &str, sink: S, frames: R) -> Self
    where
        S: Sink<String, Error = TransportError> + Send + 'static,
        R: Stream<Item = Result<String>> + Send + 'static,
    {
        let open = Arc::new(AtomicBool::new(true));
        Self {
            url: url.to_string(),
            writer: SessionWriter {
                sink: Arc::new(Mutex::new(Box::pin(sink))),
                open: open.clone(),
            },
            frames: Box::pin(TrackedFrames {
                inner: Box::pin(frames),
                open,
            }),
        }
    }

    /// Receive the next text frame
    ///
    /// Returns `None` once the peer closed the connection. The session is
    /// no longer open after that, nor after a receive error.
    pub async fn recv(&mut self) -> Option<Result<String>> {
        self.frames.next().await
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_open()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn writer(&self) -> &SessionWriter {
        &self.writer
    }

    /// Split into the shared writer and the frame stream
    pub fn into_parts(self) -> (SessionWriter, FrameStream) {
        (self.writer, self.frames)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("url", &self.url)
            .field("state", &self.writer.state())
            .finish()
    }
}
