//! PubSub connection supervisor
//!
//! Owns the transport session and the three tasks bound to it (heartbeat,
//! receive, dispatch). Subscribes on every (re)connect, replaces the session
//! with exponential backoff when the heartbeat or the transport fails, and
//! tears everything down on request from any execution context.
//!
//! ```text
//!   connect ──► LISTEN ──► RESPONSE ──► spawn dispatch
//!                                         │
//!   run_tasks ─► spawn heartbeat + receive ┘
//!        │
//!        └─ select { command | heartbeat exit | receive exit | dispatch exit }
//!              disconnect  → teardown, Ok
//!              pong timeout / transport loss / RECONNECT → reconnect(backoff)
//!              handler failure → teardown, Err
//! ```

use crate::infrastructure::metrics::PubSubMetrics;
use crate::pubsub::dispatch::{DispatchError, DispatchQueue, Dispatcher};
use crate::pubsub::handler::{CallbackRegistry, HandlerError};
use crate::pubsub::protocol::{interpolate_topics, InboundFrame, ListenRequest};
use crate::pubsub::receive::{ReceiveExit, ReceiveLoop};
use crate::ws::connection::{Connector, FrameStream, SessionWriter, TransportError, WsConnector};
use crate::ws::ping::{HeartbeatConfig, HeartbeatExit, HeartbeatMonitor, HeartbeatSignals};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep, timeout};

/// Twitch PubSub edge endpoint
pub const DEFAULT_ENDPOINT: &str = "wss://pubsub-edge.twitch.tv";

/// Reconnect attempts allowed after a liveness or transport failure
pub const DEFAULT_RECONNECT_RETRIES: i32 = 6;

/// Supervisor tuning; every timing is overridable for tests
#[derive(Debug, Clone)]
pub struct PubSubConfig {
    pub endpoint: String,
    pub heartbeat: HeartbeatConfig,
    /// First backoff delay; doubles after every failed attempt
    pub backoff_base: Duration,
    /// How long to wait for the sink to close and for the heartbeat and
    /// receive tasks to notice it
    pub close_timeout: Duration,
    /// Retry bound for server-requested reconnects; negative is unlimited
    pub reconnect_request_retries: i32,
    /// Reconnect when the peer closes the transport instead of stopping
    pub reconnect_on_close: bool,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            heartbeat: HeartbeatConfig::default(),
            backoff_base: Duration::from_secs(1),
            close_timeout: Duration::from_secs(1),
            reconnect_request_retries: -1,
            reconnect_on_close: true,
        }
    }
}

/// Supervisor lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Subscribing,
    Active,
    Reconnecting,
    Failed,
}

/// Terminal and connect-level failures
#[derive(Debug, thiserror::Error)]
pub enum PubSubError {
    #[error("Unable to connect to PubSub endpoint: {0}")]
    ConnectFailed(#[from] TransportError),
    #[error("PubSub endpoint rejected subscription: {0}")]
    SubscriptionRejected(String),
    #[error("Invalid subscription response: {0}")]
    BadResponse(String),
    #[error("Unable to reconnect to PubSub endpoint")]
    ReconnectExhausted,
    #[error(transparent)]
    Handler(#[from] DispatchError),
}

enum Command {
    Disconnect(oneshot::Sender<()>),
}

/// Cloneable handle for stopping a running client from anywhere
#[derive(Clone, Debug)]
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<Command>,
    active: Arc<AtomicBool>,
}

impl ClientHandle {
    /// Whether `run_tasks` is supervising a live connection
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Request teardown and wait until the supervisor has finished it
    ///
    /// A no-op when no connection is active.
    pub async fn disconnect(&self) {
        let Some(reply) = self.request_disconnect() else {
            return;
        };
        if reply.await.is_err() {
            tracing::info!("disconnect request cancelled");
        }
    }

    /// Blocking variant for threads outside the runtime
    ///
    /// Panics if called from within an async context.
    pub fn disconnect_blocking(&self) {
        let Some(reply) = self.request_disconnect() else {
            return;
        };
        if reply.blocking_recv().is_err() {
            tracing::info!("disconnect request cancelled");
        }
    }

    fn request_disconnect(&self) -> Option<oneshot::Receiver<()>> {
        if !self.is_active() {
            tracing::debug!("disconnect requested with no active connection");
            return None;
        }
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::Disconnect(tx)).ok()?;
        Some(rx)
    }
}

/// What woke the supervision loop
enum Wakeup {
    Command(Option<Command>),
    Heartbeat(Result<HeartbeatExit, JoinError>),
    Receive(Result<ReceiveExit, JoinError>),
    Dispatch(Result<Result<(), DispatchError>, JoinError>),
}

/// Resilient PubSub client
pub struct PubSubClient<C: Connector = WsConnector> {
    config: PubSubConfig,
    connector: C,
    topics: Vec<String>,
    auth_token: String,
    callbacks: Arc<CallbackRegistry>,
    metrics: Arc<PubSubMetrics>,
    state: ClientState,
    session: Option<SessionWriter>,
    pending_frames: Option<FrameStream>,
    signals: Option<HeartbeatSignals>,
    queue: Option<DispatchQueue>,
    heartbeat_task: Option<JoinHandle<HeartbeatExit>>,
    receive_task: Option<JoinHandle<ReceiveExit>>,
    dispatch_task: Option<JoinHandle<Result<(), DispatchError>>>,
    commands: mpsc::UnboundedReceiver<Command>,
    handle: ClientHandle,
    pending_disconnect: Option<oneshot::Sender<()>>,
}

impl PubSubClient<WsConnector> {
    /// Client over a real WebSocket transport
    ///
    /// `topics` are templates; `{channel_id}` is replaced by `broadcaster_id`.
    pub fn new(
        topics: &[String],
        auth_token: impl Into<String>,
        broadcaster_id: &str,
        callbacks: CallbackRegistry,
        config: PubSubConfig,
    ) -> Self {
        Self::with_connector(WsConnector, topics, auth_token, broadcaster_id, callbacks, config)
    }
}

impl<C: Connector> PubSubClient<C> {
    pub fn with_connector(
        connector: C,
        topics: &[String],
        auth_token: impl Into<String>,
        broadcaster_id: &str,
        callbacks: CallbackRegistry,
        config: PubSubConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            config,
            connector,
            topics: interpolate_topics(topics, broadcaster_id),
            auth_token: auth_token.into(),
            callbacks: Arc::new(callbacks),
            metrics: Arc::new(PubSubMetrics::new()),
            state: ClientState::Disconnected,
            session: None,
            pending_frames: None,
            signals: None,
            queue: None,
            heartbeat_task: None,
            receive_task: None,
            dispatch_task: None,
            commands: rx,
            handle: ClientHandle {
                commands: tx,
                active: Arc::new(AtomicBool::new(false)),
            },
            pending_disconnect: None,
        }
    }

    pub fn handle(&self) -> ClientHandle {
        self.handle.clone()
    }

    pub fn metrics(&self) -> Arc<PubSubMetrics> {
        self.metrics.clone()
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Topics as sent in LISTEN
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Whether a subscribed session is open
    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(SessionWriter::is_open)
    }

    /// Open a session, subscribe, and start the dispatcher
    ///
    /// Makes exactly one attempt. On failure no session is left open.
    pub async fn connect(&mut self) -> Result<(), PubSubError> {
        if self.session.is_some() {
            self.disconnect().await;
        }

        self.state = ClientState::Connecting;
        let mut session = match self.connector.open(&self.config.endpoint).await {
            Ok(session) if session.is_open() => session,
            Ok(_) => {
                self.state = ClientState::Disconnected;
                tracing::warn!(endpoint = %self.config.endpoint, "unable to connect to pubsub endpoint");
                return Err(TransportError::NotOpen.into());
            }
            Err(e) => {
                self.state = ClientState::Disconnected;
                tracing::warn!(endpoint = %self.config.endpoint, error = %e, "unable to connect to pubsub endpoint");
                return Err(e.into());
            }
        };

        self.state = ClientState::Subscribing;
        let writer = session.writer().clone();
        let request = ListenRequest::new(self.topics.clone(), &self.auth_token).to_frame();
        let response = match writer.send_text(request).await {
            Ok(()) => session.recv().await,
            Err(e) => Some(Err(e)),
        };

        let outcome = match response {
            Some(Ok(text)) => match InboundFrame::parse(&text) {
                Ok(InboundFrame::Response { error: Some(error) }) => Err(PubSubError::SubscriptionRejected(error)),
                Ok(_) => Ok(()),
                Err(e) => Err(PubSubError::BadResponse(e.to_string())),
            },
            Some(Err(e)) => Err(e.into()),
            None => Err(TransportError::ConnectionClosed.into()),
        };
        if let Err(e) = outcome {
            writer.close_within(self.config.close_timeout).await;
            self.state = ClientState::Disconnected;
            tracing::warn!(error = %e, "got error subscribing on pubsub endpoint");
            return Err(e);
        }

        let (writer, frames) = session.into_parts();
        let (queue, dispatcher) = Dispatcher::channel(self.metrics.clone());
        self.session = Some(writer);
        self.pending_frames = Some(frames);
        self.queue = Some(queue);
        self.dispatch_task = Some(dispatcher.spawn());
        self.metrics.set_connected(true);
        tracing::info!(
            topics = ?self.topics,
            handlers = ?self.callbacks.keys().collect::<Vec<_>>(),
            "subscribed on pubsub endpoint"
        );
        Ok(())
    }

    /// Start heartbeat and receive loop on the freshly connected session
    fn start_tasks(&mut self) {
        let (Some(writer), Some(frames), Some(queue)) =
            (self.session.clone(), self.pending_frames.take(), self.queue.clone())
        else {
            return;
        };

        let signals = HeartbeatSignals::new();
        self.heartbeat_task = Some(HeartbeatMonitor::new(writer, signals.clone(), self.config.heartbeat).spawn());
        self.receive_task = Some(
            ReceiveLoop::new(
                frames,
                self.callbacks.clone(),
                queue,
                signals.liveness.clone(),
                self.metrics.clone(),
            )
            .spawn(),
        );
        self.signals = Some(signals);
        self.state = ClientState::Active;
    }

    /// Tear down the session and wait for every task bound to it
    pub async fn disconnect(&mut self) {
        if let Some(failure) = self.teardown().await {
            tracing::warn!(error = %failure, "handler failed while disconnecting");
        }
    }

    /// Returns the handler failure that stopped the dispatcher, if any
    async fn teardown(&mut self) -> Option<DispatchError> {
        // Dropping our queue handle closes intake once the receive loop's
        // clone goes away with its task.
        self.queue = None;
        self.pending_frames = None;
        if let Some(signals) = self.signals.take() {
            signals.abort();
        }
        if let Some(writer) = self.session.take() {
            if !writer.close_within(self.config.close_timeout).await {
                tracing::warn!(timeout = ?self.config.close_timeout, "session did not close in time");
            }
        }

        // A heartbeat stuck in a send never sees the abort signal
        if let Some(task) = self.heartbeat_task.take() {
            settle(task, self.config.close_timeout, "heartbeat").await;
        }
        if let Some(task) = self.receive_task.take() {
            settle(task, self.config.close_timeout, "receive loop").await;
        }

        let mut failure = None;
        if let Some(task) = self.dispatch_task.take() {
            match task.await {
                Ok(Ok(())) => tracing::debug!("dispatcher drained"),
                Ok(Err(e)) => failure = Some(e),
                Err(e) => failure = Some(join_failure(e)),
            }
        }

        self.metrics.set_connected(false);
        self.state = ClientState::Disconnected;
        failure
    }

    /// Replace the session, retrying with exponential backoff
    ///
    /// `max_tries < 0` retries forever. Returns `Ok(false)` when attempts
    /// are exhausted or a disconnect request arrived while waiting.
    pub async fn reconnect(&mut self, max_tries: i32) -> Result<bool, PubSubError> {
        if let Some(failure) = self.teardown().await {
            return Err(failure.into());
        }
        self.state = ClientState::Reconnecting;

        let limit = u32::try_from(max_tries).ok();
        let mut wait = self.config.backoff_base;
        let mut attempts: u32 = 0;

        loop {
            if limit.is_some_and(|max| attempts >= max) {
                self.state = ClientState::Failed;
                return Ok(false);
            }

            if attempts > 0 {
                tracing::info!(?wait, "failed on reconnect; attempting again after backoff");
                tokio::select! {
                    _ = sleep(wait) => {}
                    command = self.commands.recv() => {
                        if let Some(Command::Disconnect(reply)) = command {
                            self.pending_disconnect = Some(reply);
                        }
                        tracing::info!("reconnect interrupted by disconnect request");
                        self.state = ClientState::Disconnected;
                        return Ok(false);
                    }
                }
                wait = wait.saturating_mul(2);
            }

            attempts += 1;
            match self.connect().await {
                Ok(()) => {
                    self.metrics.record_reconnect();
                    tracing::info!(attempts, "reconnected to pubsub endpoint");
                    return Ok(true);
                }
                Err(e) => tracing::warn!(attempts, error = %e, "reconnect attempt failed"),
            }
        }
    }

    /// Reconnect and restart the task pair. `Ok(false)` means stop cleanly.
    async fn recover(&mut self, max_tries: i32) -> Result<bool, PubSubError> {
        if self.reconnect(max_tries).await? {
            self.start_tasks();
            return Ok(true);
        }
        if self.pending_disconnect.is_some() {
            return Ok(false);
        }
        tracing::error!("unable to reconnect, exiting");
        self.disconnect().await;
        self.state = ClientState::Failed;
        Err(PubSubError::ReconnectExhausted)
    }

    /// Connect, then supervise until a deliberate disconnect or a terminal
    /// failure
    pub async fn run_tasks(mut self, reconnect_retries: i32) -> Result<(), PubSubError> {
        if let Err(e) = self.connect().await {
            tracing::error!(error = %e, "initial connect failed");
            return Err(e);
        }

        self.handle.active.store(true, Ordering::Release);
        self.start_tasks();
        let result = self.supervise(reconnect_retries).await;
        self.handle.active.store(false, Ordering::Release);

        if let Some(reply) = self.pending_disconnect.take() {
            let _ = reply.send(());
        }
        while let Ok(Command::Disconnect(reply)) = self.commands.try_recv() {
            let _ = reply.send(());
        }

        tracing::info!(metrics = ?self.metrics.snapshot(), state = ?self.state, "pubsub client stopped");
        result
    }

    async fn supervise(&mut self, reconnect_retries: i32) -> Result<(), PubSubError> {
        loop {
            let wakeup = tokio::select! {
                command = self.commands.recv() => Wakeup::Command(command),
                exit = join_slot(&mut self.heartbeat_task) => Wakeup::Heartbeat(exit),
                exit = join_slot(&mut self.receive_task) => Wakeup::Receive(exit),
                result = join_slot(&mut self.dispatch_task) => Wakeup::Dispatch(result),
            };

            match wakeup {
                Wakeup::Command(command) => {
                    tracing::info!("disconnect requested");
                    self.disconnect().await;
                    if let Some(Command::Disconnect(reply)) = command {
                        self.pending_disconnect = Some(reply);
                    }
                    return Ok(());
                }
                Wakeup::Heartbeat(exit) => {
                    let exit = match exit {
                        Ok(exit) => exit,
                        Err(e) if e.is_cancelled() => HeartbeatExit::Aborted,
                        Err(e) => HeartbeatExit::SendFailed(e.to_string()),
                    };
                    let aborting = self.signals.as_ref().is_some_and(|s| s.abort.is_set());
                    if aborting || !exit.is_failure() {
                        self.disconnect().await;
                        return Ok(());
                    }
                    tracing::warn!(?exit, "failed heartbeat check; attempting to reconnect");
                    if !self.recover(reconnect_retries).await? {
                        return Ok(());
                    }
                }
                Wakeup::Receive(exit) => {
                    let exit = exit.unwrap_or_else(|e| ReceiveExit::TransportError(e.to_string()));
                    let retries = match exit {
                        ReceiveExit::ReconnectRequested => self.config.reconnect_request_retries,
                        _ if self.config.reconnect_on_close => {
                            tracing::warn!(?exit, "connection lost; attempting to reconnect");
                            reconnect_retries
                        }
                        _ => {
                            tracing::info!(?exit, "receive loop ended");
                            self.disconnect().await;
                            return Ok(());
                        }
                    };
                    if !self.recover(retries).await? {
                        return Ok(());
                    }
                }
                Wakeup::Dispatch(result) => {
                    let failure = match result {
                        Ok(Ok(())) => continue,
                        Ok(Err(e)) => e,
                        Err(e) => join_failure(e),
                    };
                    tracing::error!(error = %failure, "stopping after handler failure");
                    self.disconnect().await;
                    self.state = ClientState::Failed;
                    return Err(failure.into());
                }
            }
        }
    }
}

/// Await a task slot, emptying it on completion; pends forever when empty
async fn join_slot<T>(slot: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
    let Some(handle) = slot.as_mut() else {
        return std::future::pending().await;
    };
    let result = handle.await;
    *slot = None;
    result
}

/// Wait up to `limit` for a task to finish, aborting it after that
async fn settle<T: std::fmt::Debug>(mut task: JoinHandle<T>, limit: Duration, name: &'static str) {
    match timeout(limit, &mut task).await {
        Ok(Ok(exit)) => tracing::debug!(task = name, ?exit, "task stopped"),
        Ok(Err(e)) if e.is_cancelled() => tracing::debug!(task = name, "task cancelled"),
        Ok(Err(e)) => tracing::warn!(task = name, error = %e, "task panicked"),
        Err(_) => {
            tracing::debug!(task = name, "task still running after close, aborting");
            task.abort();
            let _ = task.await;
        }
    }
}

fn join_failure(e: JoinError) -> DispatchError {
    DispatchError {
        topic: "<dispatcher>".to_string(),
        source: HandlerError(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::handler::handler_fn;
    use crate::test_utils::{Plan, ScriptedConnector, ScriptedPeer};
    use crate::ws::ping::PING_FRAME;
    use serde_json::{json, Value};

    const TOPIC: &str = "channel-points-channel-v1.{channel_id}";
    const RESPONSE_OK: &str = r#"{"type":"RESPONSE","error":"","nonce":""}"#;

    fn test_config() -> PubSubConfig {
        PubSubConfig {
            endpoint: "ws://mock".into(),
            close_timeout: Duration::from_millis(50),
            ..PubSubConfig::default()
        }
    }

    fn events_registry() -> (CallbackRegistry, mpsc::UnboundedReceiver<(Value, Vec<i64>)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = CallbackRegistry::new().register(
            "channel-points-channel-v1",
            handler_fn(move |payload, ids| {
                let _ = tx.send((payload, ids));
                Ok(())
            }),
        );
        (registry, rx)
    }

    fn client(plans: Vec<Plan>, registry: CallbackRegistry) -> (PubSubClient<ScriptedConnector>, ScriptedConnector, mpsc::UnboundedReceiver<ScriptedPeer>) {
        let (connector, peers) = ScriptedConnector::new(plans);
        let client = PubSubClient::with_connector(
            connector.clone(),
            &[TOPIC.to_string()],
            "secret-token",
            "4242",
            registry,
            test_config(),
        );
        (client, connector, peers)
    }

    /// Answer LISTEN and wait for the first heartbeat, which proves the
    /// task pair is running
    async fn accept(peers: &mut mpsc::UnboundedReceiver<ScriptedPeer>) -> ScriptedPeer {
        let mut peer = peers.recv().await.expect("session opened");
        let listen = peer.next_sent().await.expect("LISTEN sent");
        assert_eq!(
            listen,
            r#"{"type":"LISTEN","data":{"topics":["channel-points-channel-v1.4242"],"auth_token":"secret-token"}}"#
        );
        peer.push(RESPONSE_OK);
        assert_eq!(peer.next_sent().await.as_deref(), Some(PING_FRAME));
        peer
    }

    async fn wait_until_active(handle: &ClientHandle) {
        while !handle.is_active() {
            tokio::task::yield_now().await;
        }
    }

    fn redemption(topic: &str, n: u64) -> String {
        json!({
            "type": "MESSAGE",
            "data": { "topic": topic, "message": json!({ "n": n }).to_string() }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_rejected_subscription_leaves_no_session() {
        let (mut client, _connector, mut peers) = client(vec![Plan::Accept], CallbackRegistry::new());

        let peer_side = async {
            let mut peer = peers.recv().await.unwrap();
            peer.next_sent().await.unwrap();
            peer.push(r#"{"type":"RESPONSE","error":"ERR_BADAUTH","nonce":""}"#);
            peer
        };
        let (result, _peer) = tokio::join!(client.connect(), peer_side);

        assert!(matches!(result, Err(PubSubError::SubscriptionRejected(ref e)) if e == "ERR_BADAUTH"));
        assert!(!client.is_connected());
        assert_eq!(client.state(), ClientState::Disconnected);
    }

    #[tokio::test]
    async fn test_session_not_open_after_handshake_fails_connect() {
        let (mut client, _connector, _peers) = client(vec![Plan::AcceptClosed], CallbackRegistry::new());
        let result = client.connect().await;
        assert!(matches!(result, Err(PubSubError::ConnectFailed(TransportError::NotOpen))));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_initial_connect_failure_is_reported() {
        let (client, connector, _peers) = client(vec![Plan::Refuse], CallbackRegistry::new());
        let err = client.run_tasks(DEFAULT_RECONNECT_RETRIES).await.unwrap_err();
        assert!(err.to_string().starts_with("Unable to connect to PubSub endpoint"));
        // No retry at startup
        assert_eq!(connector.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_attempts_with_doubling_backoff() {
        let (mut client, connector, _peers) = client(vec![], CallbackRegistry::new());

        assert!(!client.reconnect(3).await.unwrap());
        assert_eq!(client.state(), ClientState::Failed);

        let attempts = connector.attempts();
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[1] - attempts[0], Duration::from_secs(1));
        assert_eq!(attempts[2] - attempts[1], Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlimited_reconnect_keeps_doubling_until_accepted() {
        let plans = vec![Plan::Refuse, Plan::Refuse, Plan::Refuse, Plan::Refuse, Plan::Refuse, Plan::Accept];
        let (mut client, connector, mut peers) = client(plans, CallbackRegistry::new());

        let peer_side = async {
            let mut peer = peers.recv().await.unwrap();
            peer.next_sent().await.unwrap();
            peer.push(RESPONSE_OK);
            peer
        };
        let (result, _peer) = tokio::join!(client.reconnect(-1), peer_side);
        assert!(result.unwrap());
        assert!(client.is_connected());
        assert_eq!(client.metrics().snapshot().reconnects, 1);

        let attempts = connector.attempts();
        assert_eq!(attempts.len(), 6);
        let gaps: Vec<u64> = attempts.windows(2).map(|w| (w[1] - w[0]).as_secs()).collect();
        assert_eq!(gaps, vec![1, 2, 4, 8, 16]);

        client.disconnect().await;
        assert!(!client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_interrupts_backoff() {
        let (client, connector, mut peers) = client(vec![Plan::Accept], CallbackRegistry::new());
        let handle = client.handle();
        let run = tokio::spawn(client.run_tasks(-1));

        drop(accept(&mut peers).await);
        while connector.attempts().len() < 3 {
            sleep(Duration::from_millis(100)).await;
        }
        assert!(handle.is_active());

        timeout(Duration::from_secs(1), handle.disconnect())
            .await
            .expect("disconnect answered during backoff");
        run.await.unwrap().unwrap();
        assert!(!handle.is_active());
        assert!(connector.attempts().len() <= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_survives_stuck_sink() {
        let (client, _connector, mut peers) = client(vec![Plan::AcceptStalling], CallbackRegistry::new());
        let handle = client.handle();
        let run = tokio::spawn(client.run_tasks(DEFAULT_RECONNECT_RETRIES));

        let mut peer = peers.recv().await.unwrap();
        peer.next_sent().await.unwrap();
        peer.push(RESPONSE_OK);
        wait_until_active(&handle).await;
        // Let the heartbeat block inside its PING send
        sleep(Duration::from_millis(10)).await;

        timeout(Duration::from_secs(1), handle.disconnect())
            .await
            .expect("teardown bounded by close timeout");
        run.await.unwrap().unwrap();
        assert!(!handle.is_active());
    }

    #[test]
    fn test_topics_are_interpolated_and_run_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}

        let (client, _connector, _peers) = client(vec![], CallbackRegistry::new());
        assert_eq!(client.topics(), ["channel-points-channel-v1.4242".to_string()]);
        assert_send(&client.run_tasks(DEFAULT_RECONNECT_RETRIES));
    }

    #[tokio::test]
    async fn test_disconnect_without_connection_is_noop() {
        let (client, connector, _peers) = client(vec![], CallbackRegistry::new());
        let handle = client.handle();
        assert!(!handle.is_active());
        timeout(Duration::from_millis(100), handle.disconnect())
            .await
            .expect("returns promptly");
        assert!(connector.attempts().is_empty());
    }

    #[tokio::test]
    async fn test_events_routed_and_reconnect_request_keeps_running() {
        let (registry, mut events) = events_registry();
        let (client, connector, mut peers) = client(vec![Plan::Accept, Plan::Accept], registry);
        let handle = client.handle();
        let run = tokio::spawn(client.run_tasks(DEFAULT_RECONNECT_RETRIES));

        let first = accept(&mut peers).await;
        first.push(redemption("channel-points-channel-v1.123", 1));
        first.push(redemption("foo.1.2", 2));
        first.push(r#"{"type":"RECONNECT"}"#);

        let (payload, ids) = events.recv().await.unwrap();
        assert_eq!(payload, json!({ "n": 1 }));
        assert_eq!(ids, vec![123]);

        let second = accept(&mut peers).await;
        second.push(redemption("channel-points-channel-v1.77", 3));
        let (payload, ids) = events.recv().await.unwrap();
        assert_eq!(payload, json!({ "n": 3 }));
        assert_eq!(ids, vec![77]);

        assert!(!run.is_finished());
        assert!(handle.is_active());
        handle.disconnect().await;

        run.await.unwrap().unwrap();
        assert!(!handle.is_active());
        assert_eq!(connector.attempts().len(), 2);
        // The unrouted `foo` event never reached a handler
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_timeout_triggers_reconnect() {
        let (client, connector, mut peers) = client(vec![Plan::Accept, Plan::Accept], CallbackRegistry::new());
        let handle = client.handle();
        let metrics = client.metrics();
        let run = tokio::spawn(client.run_tasks(DEFAULT_RECONNECT_RETRIES));

        let _silent = accept(&mut peers).await;
        let second = accept(&mut peers).await;
        second.push(r#"{"type":"PONG"}"#);

        handle.disconnect().await;
        run.await.unwrap().unwrap();

        assert_eq!(connector.attempts().len(), 2);
        assert_eq!(metrics.snapshot().reconnects, 1);
        assert!(!metrics.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_reconnect_is_terminal() {
        let (client, connector, mut peers) = client(vec![Plan::Accept], CallbackRegistry::new());
        let run = tokio::spawn(client.run_tasks(2));

        let peer = accept(&mut peers).await;
        drop(peer);

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, PubSubError::ReconnectExhausted));
        assert_eq!(err.to_string(), "Unable to reconnect to PubSub endpoint");
        assert_eq!(connector.attempts().len(), 3);
    }

    #[tokio::test]
    async fn test_peer_close_without_reconnect_stops_cleanly() {
        let (connector, mut peers) = ScriptedConnector::new(vec![Plan::Accept]);
        let config = PubSubConfig {
            reconnect_on_close: false,
            ..test_config()
        };
        let client = PubSubClient::with_connector(
            connector.clone(),
            &[TOPIC.to_string()],
            "secret-token",
            "4242",
            CallbackRegistry::new(),
            config,
        );
        let run = tokio::spawn(client.run_tasks(DEFAULT_RECONNECT_RETRIES));

        drop(accept(&mut peers).await);
        run.await.unwrap().unwrap();
        assert_eq!(connector.attempts().len(), 1);
    }

    #[tokio::test]
    async fn test_handler_failure_is_terminal() {
        let registry = CallbackRegistry::new().register(
            "channel-points-channel-v1",
            handler_fn(|_, _| Err("scene `Main` not found".into())),
        );
        let (client, _connector, mut peers) = client(vec![Plan::Accept], registry);
        let run = tokio::spawn(client.run_tasks(DEFAULT_RECONNECT_RETRIES));

        let peer = accept(&mut peers).await;
        peer.push(redemption("channel-points-channel-v1.1", 1));

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, PubSubError::Handler(_)));
        assert!(err.to_string().contains("scene `Main` not found"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_disconnect_from_another_thread() {
        let (client, _connector, mut peers) = client(vec![Plan::Accept], CallbackRegistry::new());
        let handle = client.handle();
        let run = tokio::spawn(client.run_tasks(DEFAULT_RECONNECT_RETRIES));

        let _peer = accept(&mut peers).await;
        let blocking = handle.clone();
        tokio::task::spawn_blocking(move || blocking.disconnect_blocking())
            .await
            .unwrap();

        run.await.unwrap().unwrap();
        assert!(!handle.is_active());
    }
}
