//! Test utilities: in-memory transport sessions and scripted connectors
//!
//! A scripted session is a `Session` whose far end is a pair of channels the
//! test drives directly, so protocol tasks can be exercised without sockets.

use crate::ws::connection::{Connector, Result, Session, TransportError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Far end of a scripted session
pub struct ScriptedPeer {
    /// Frames the client sent
    pub sent: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<Result<String>>,
}

impl ScriptedPeer {
    /// Deliver a text frame to the client
    pub fn push(&self, frame: impl Into<String>) {
        let _ = self.inbound.send(Ok(frame.into()));
    }

    /// Deliver a transport error to the client
    pub fn fail(&self, error: TransportError) {
        let _ = self.inbound.send(Err(error));
    }

    /// Wait for the next frame the client sent
    pub async fn next_sent(&mut self) -> Option<String> {
        self.sent.recv().await
    }
}

/// Build a session backed by in-memory channels
pub fn scripted_session(url: &str) -> (Session, ScriptedPeer) {
    scripted_session_stalling_after(url, usize::MAX)
}

/// Like [`scripted_session`], but the sink hangs forever on the send after
/// the first `delivered` frames
pub fn scripted_session_stalling_after(url: &str, delivered: usize) -> (Session, ScriptedPeer) {
    let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<Result<String>>();

    let sink = futures_util::sink::unfold((out_tx, delivered), |(tx, left), text: String| async move {
        if left == 0 {
            return std::future::pending().await;
        }
        tx.send(text)
            .map_err(|_| TransportError::SendFailed("peer gone".into()))?;
        Ok::<_, TransportError>((tx, left - 1))
    });
    let frames = futures_util::stream::unfold(in_rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });

    (
        Session::from_parts(url, sink, frames),
        ScriptedPeer {
            sent: out_rx,
            inbound: in_tx,
        },
    )
}

/// Planned outcome for one `open` call
pub enum Plan {
    /// Hand out a scripted session; its peer is published to the test
    Accept,
    /// Hand out a session that is already closed
    AcceptClosed,
    /// Hand out a session whose sink hangs after the LISTEN frame
    AcceptStalling,
    /// Refuse the connection
    Refuse,
}

/// Connector that follows a script and records every attempt
///
/// Once the script is exhausted every further attempt is refused.
#[derive(Clone)]
pub struct ScriptedConnector {
    plans: Arc<Mutex<VecDeque<Plan>>>,
    attempts: Arc<Mutex<Vec<Instant>>>,
    peers: mpsc::UnboundedSender<ScriptedPeer>,
}

impl ScriptedConnector {
    pub fn new(plans: impl IntoIterator<Item = Plan>) -> (Self, mpsc::UnboundedReceiver<ScriptedPeer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                plans: Arc::new(Mutex::new(plans.into_iter().collect())),
                attempts: Arc::new(Mutex::new(Vec::new())),
                peers: tx,
            },
            rx,
        )
    }

    /// Instants at which `open` was called
    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }
}

impl Connector for ScriptedConnector {
    async fn open(&self, url: &str) -> Result<Session> {
        self.attempts.lock().unwrap().push(Instant::now());
        let plan = self.plans.lock().unwrap().pop_front().unwrap_or(Plan::Refuse);
        match plan {
            Plan::Accept => {
                let (session, peer) = scripted_session(url);
                let _ = self.peers.send(peer);
                Ok(session)
            }
            Plan::AcceptClosed => {
                let (session, peer) = scripted_session(url);
                let writer = session.writer().clone();
                writer.close().await;
                let _ = self.peers.send(peer);
                Ok(session)
            }
            Plan::AcceptStalling => {
                let (session, peer) = scripted_session_stalling_after(url, 1);
                let _ = self.peers.send(peer);
                Ok(session)
            }
            Plan::Refuse => Err(TransportError::ConnectionFailed("connection refused".into())),
        }
    }
}
