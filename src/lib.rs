//! Twitch channel-point redemptions to OBS actions
//!
//! Core library: a resilient Twitch PubSub client and the OBS action
//! executor it feeds.

pub mod infrastructure;
pub mod obs;
pub mod pubsub;
pub mod rest;
pub mod ws;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types
pub use infrastructure::config::{Config, ConfigError, ObsConfig};
pub use pubsub::{ClientHandle, PubSubClient, PubSubConfig, PubSubError};

use thiserror::Error;

/// Main error type for the bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    PubSub(#[from] PubSubError),

    #[error("OBS error: {0}")]
    Obs(#[from] obs::ActionError),

    #[error("Twitch API error: {0}")]
    Helix(#[from] rest::HelixError),

    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, BridgeError>;
