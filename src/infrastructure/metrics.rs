//! Metrics collection for the PubSub client
//!
//! Lock-free counters updated by the receive, dispatch and supervisor
//! tasks. Snapshots are logged on shutdown.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Instant, SystemTime};

/// PubSub client metrics collector
pub struct PubSubMetrics {
    /// Text frames read off the session
    frames_received: AtomicU64,
    /// Events delivered to handlers
    events_dispatched: AtomicU64,
    /// Frames dropped as malformed
    malformed_frames: AtomicU64,
    /// Heartbeat acknowledgments seen
    pongs: AtomicU64,
    /// Successful reconnects
    reconnects: AtomicU64,
    /// Whether a session is currently subscribed
    connected: AtomicBool,
    /// Last frame timestamp (Unix millis)
    last_frame_time: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

/// Metrics snapshot for logging
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub frames_received: u64,
    pub events_dispatched: u64,
    pub malformed_frames: u64,
    pub pongs: u64,
    pub reconnects: u64,
    pub connected: bool,
    pub last_frame_time: u64,
    pub uptime_seconds: u64,
}

impl PubSubMetrics {
    pub fn new() -> Self {
        Self {
            frames_received: AtomicU64::new(0),
            events_dispatched: AtomicU64::new(0),
            malformed_frames: AtomicU64::new(0),
            pongs: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            connected: AtomicBool::new(false),
            last_frame_time: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    #[inline]
    pub fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        self.last_frame_time.store(now, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dispatched(&self) {
        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_malformed(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_pong(&self) {
        self.pongs.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            pongs: self.pongs.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            connected: self.connected.load(Ordering::Relaxed),
            last_frame_time: self.last_frame_time.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for PubSubMetrics {
    fn default() -> Self {
        Self::new()
    }
}
