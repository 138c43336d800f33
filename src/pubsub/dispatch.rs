//! Callback dispatcher
//!
//! One unbounded FIFO shared by every topic and drained by a single task,
//! so handlers see events in wire order and never overlap. Closing the
//! queue stops intake; entries already queued are still delivered.

use crate::infrastructure::metrics::PubSubMetrics;
use crate::pubsub::handler::{EventHandler, HandlerError};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One routed event awaiting delivery
pub struct Dispatch {
    pub handler: Arc<dyn EventHandler>,
    pub topic: String,
    pub payload: Value,
    pub ids: Vec<i64>,
}

impl std::fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatch")
            .field("topic", &self.topic)
            .field("ids", &self.ids)
            .finish_non_exhaustive()
    }
}

/// Handler failure that stopped the dispatcher
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("handler for `{topic}` failed: {source}")]
pub struct DispatchError {
    pub topic: String,
    #[source]
    pub source: HandlerError,
}

/// Producer side of the dispatch queue
#[derive(Clone, Debug)]
pub struct DispatchQueue {
    tx: mpsc::UnboundedSender<Dispatch>,
}

impl DispatchQueue {
    /// Enqueue an event. Returns false once the dispatcher has stopped.
    pub fn push(&self, item: Dispatch) -> bool {
        self.tx.send(item).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side: delivers queued events one at a time
pub struct Dispatcher {
    rx: mpsc::UnboundedReceiver<Dispatch>,
    metrics: Arc<PubSubMetrics>,
}

impl Dispatcher {
    /// Create a queue and its dispatcher
    pub fn channel(metrics: Arc<PubSubMetrics>) -> (DispatchQueue, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (DispatchQueue { tx }, Self { rx, metrics })
    }

    /// Deliver until every `DispatchQueue` clone is dropped and the queue is
    /// drained, or until a handler fails
    pub async fn run(mut self) -> Result<(), DispatchError> {
        while let Some(item) = self.rx.recv().await {
            let Dispatch {
                handler,
                topic,
                payload,
                ids,
            } = item;

            tracing::debug!(%topic, ?ids, "dispatching event");
            if let Err(source) = handler.handle(payload, ids).await {
                tracing::error!(%topic, error = %source, "event handler failed");
                self.rx.close();
                return Err(DispatchError { topic, source });
            }
            self.metrics.record_dispatched();
        }
        tracing::debug!("dispatch queue closed and drained");
        Ok(())
    }

    pub fn spawn(self) -> JoinHandle<Result<(), DispatchError>> {
        tokio::spawn(self.run())
    }
}
