//! WebSocket transport and liveness

pub mod connection;
pub mod ping;

pub use connection::{
    ConnectionState, Connector, FrameStream, Session, SessionWriter, TransportError, WsConnector,
};
pub use ping::{HeartbeatConfig, HeartbeatExit, HeartbeatMonitor, HeartbeatSignals, Signal};
