//! Application-level heartbeat for push connections
//!
//! Sends a PING frame every heartbeat period and waits for the receive loop
//! to observe the matching PONG. A missing PONG means the connection is
//! presumed dead even though the transport has not reported a close.
//! Runs in its own task; never touches the read path.

use crate::ws::connection::SessionWriter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;

/// Lower bound applied to any configured heartbeat period
pub const MIN_HEARTBEAT_RATE: Duration = Duration::from_secs(20);

/// Default time allowed for a PONG to come back
pub const DEFAULT_PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// PING frame sent on every heartbeat
pub const PING_FRAME: &str = r#"{"type":"PING"}"#;

/// Settable/clearable flag that tasks can wait on
///
/// Waiting returns immediately if the flag is already set.
#[derive(Clone, Debug)]
pub struct Signal {
    state: Arc<watch::Sender<bool>>,
}

impl Signal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { state: Arc::new(tx) }
    }

    #[inline]
    pub fn set(&self) {
        self.state.send_replace(true);
    }

    #[inline]
    pub fn clear(&self) {
        self.state.send_replace(false);
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        *self.state.borrow()
    }

    /// Wait until the flag is set
    pub async fn wait(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so `wait_for` cannot observe a closed channel.
        let _ = rx.wait_for(|set| *set).await;
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

/// Liveness and abort signals shared by one heartbeat/receive pair
#[derive(Clone, Debug, Default)]
pub struct HeartbeatSignals {
    /// Set by the receive loop when a PONG arrives
    pub liveness: Signal,
    /// Set during shutdown to end the monitor's wait early
    pub abort: Signal,
}

impl HeartbeatSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the monitor to stop, waking it from either wait
    pub fn abort(&self) {
        self.abort.set();
        self.liveness.set();
    }
}

/// Why a heartbeat monitor stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatExit {
    /// Abort signal fired: deliberate shutdown
    Aborted,
    /// No PONG within the pong timeout
    PongTimeout,
    /// The PING could not be written to the session
    SendFailed(String),
}

impl HeartbeatExit {
    /// Whether this exit means the connection should be replaced
    pub fn is_failure(&self) -> bool {
        !matches!(self, HeartbeatExit::Aborted)
    }
}

/// Heartbeat timing
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    /// Period between PINGs; never below `MIN_HEARTBEAT_RATE`
    pub rate: Duration,
    /// How long to wait for the PONG of each PING
    pub pong_timeout: Duration,
}

impl HeartbeatConfig {
    /// Build a config, clamping the rate to the minimum
    pub fn new(rate: Duration, pong_timeout: Duration) -> Self {
        Self {
            rate: rate.max(MIN_HEARTBEAT_RATE),
            pong_timeout,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), DEFAULT_PONG_TIMEOUT)
    }
}

/// Heartbeat monitor bound to one session
pub struct HeartbeatMonitor {
    writer: SessionWriter,
    signals: HeartbeatSignals,
    rate: Duration,
    pong_timeout: Duration,
}

impl HeartbeatMonitor {
    pub fn new(writer: SessionWriter, signals: HeartbeatSignals, config: HeartbeatConfig) -> Self {
        Self {
            writer,
            signals,
            rate: config.rate,
            pong_timeout: config.pong_timeout,
        }
    }

    /// Override timing without the minimum-rate clamp
    #[cfg(test)]
    pub(crate) fn with_timing(mut self, rate: Duration, pong_timeout: Duration) -> Self {
        self.rate = rate;
        self.pong_timeout = pong_timeout;
        self
    }

    /// Run until the connection is presumed dead or the abort signal fires
    pub async fn run(self) -> HeartbeatExit {
        loop {
            self.signals.liveness.clear();

            if let Err(e) = self.writer.send_text(PING_FRAME).await {
                tracing::warn!(error = %e, "heartbeat ping could not be sent");
                return HeartbeatExit::SendFailed(e.to_string());
            }

            if timeout(self.pong_timeout, self.signals.liveness.wait()).await.is_err() {
                tracing::warn!(timeout = ?self.pong_timeout, "exited heartbeat loop due to pong timeout");
                return HeartbeatExit::PongTimeout;
            }

            if timeout(self.rate, self.signals.abort.wait()).await.is_ok() {
                tracing::debug!("heartbeat aborted");
                return HeartbeatExit::Aborted;
            }
        }
    }

    /// Spawn the monitor as its own task
    pub fn spawn(self) -> tokio::task::JoinHandle<HeartbeatExit> {
        tokio::spawn(self.run())
    }
}
