//! Infrastructure - cold path only
//!
//! This module contains code outside the event path:
//! - Logging and metrics
//! - Configuration management

pub mod config;
pub mod logging;
pub mod metrics;

pub use config::{Config, ConfigError, ObsConfig};
pub use logging::init_logging;
pub use metrics::{MetricsSnapshot, PubSubMetrics};
