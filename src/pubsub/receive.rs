//! Event receive loop
//!
//! Reads frames off the session, classifies them and routes MESSAGE events
//! to the dispatch queue. Malformed or unknown frames are logged and
//! skipped; only the end of the frame stream or a RECONNECT request stops
//! the loop.

use crate::infrastructure::metrics::PubSubMetrics;
use crate::pubsub::dispatch::{Dispatch, DispatchQueue};
use crate::pubsub::handler::CallbackRegistry;
use crate::pubsub::protocol::{decode_payload, parse_topic, FrameError, InboundFrame};
use crate::ws::connection::FrameStream;
use crate::ws::ping::Signal;
use futures_util::StreamExt;
use std::sync::Arc;

/// Why a receive loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveExit {
    /// The frame stream ended
    PeerClosed,
    /// The transport reported an error
    TransportError(String),
    /// The server sent RECONNECT
    ReconnectRequested,
}

/// Receive loop bound to one session
pub struct ReceiveLoop {
    frames: FrameStream,
    callbacks: Arc<CallbackRegistry>,
    queue: DispatchQueue,
    liveness: Signal,
    metrics: Arc<PubSubMetrics>,
}

impl ReceiveLoop {
    pub fn new(
        frames: FrameStream,
        callbacks: Arc<CallbackRegistry>,
        queue: DispatchQueue,
        liveness: Signal,
        metrics: Arc<PubSubMetrics>,
    ) -> Self {
        Self {
            frames,
            callbacks,
            queue,
            liveness,
            metrics,
        }
    }

    pub async fn run(mut self) -> ReceiveExit {
        while let Some(frame) = self.frames.next().await {
            let text = match frame {
                Ok(text) => text,
                Err(e) => {
                    tracing::info!(error = %e, "exited receive loop due to transport error");
                    return ReceiveExit::TransportError(e.to_string());
                }
            };
            self.metrics.record_frame();

            match InboundFrame::parse(&text) {
                Ok(InboundFrame::Reconnect) => {
                    tracing::info!("got explicit reconnect message from server");
                    return ReceiveExit::ReconnectRequested;
                }
                Ok(InboundFrame::Message { topic, message }) => {
                    if let Err(e) = self.route(topic, &message) {
                        self.metrics.record_malformed();
                        tracing::warn!(error = %e, "malformed message from server");
                    }
                }
                Ok(InboundFrame::Pong) => {
                    self.metrics.record_pong();
                    self.liveness.set();
                }
                Ok(InboundFrame::Response { error }) => {
                    tracing::debug!(?error, "unsolicited RESPONSE frame");
                }
                Ok(InboundFrame::Unknown { kind, raw }) => {
                    tracing::warn!(%kind, frame = %raw, "encountered unknown message type");
                }
                Err(e) => {
                    self.metrics.record_malformed();
                    tracing::warn!(error = %e, "got improperly formatted event");
                }
            }
        }

        tracing::info!("exited receive loop due to disconnect");
        ReceiveExit::PeerClosed
    }

    /// Queue a MESSAGE for its handler; unregistered topics are dropped
    fn route(&self, topic: String, message: &str) -> Result<(), FrameError> {
        let path = parse_topic(&topic)?;
        let Some(handler) = self.callbacks.get(&path.key) else {
            tracing::trace!(%topic, "no handler registered, dropping event");
            return Ok(());
        };
        let payload = decode_payload(message)?;

        let queued = self.queue.push(Dispatch {
            handler: handler.clone(),
            topic,
            payload,
            ids: path.ids,
        });
        if !queued {
            tracing::warn!(key = %path.key, "dispatcher stopped, event dropped");
        }
        Ok(())
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<ReceiveExit> {
        tokio::spawn(self.run())
    }
}
