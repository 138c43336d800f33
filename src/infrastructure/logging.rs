//! Centralized file-based logging system
//!
//! Writes logs to files under the given directory, separated by log type:
//! - main/ - General application logs (JSON)
//! - error/ - Error and warning logs only
//! - pubsub/ - PubSub client and WebSocket transport logs
//! - obs/ - OBS executor and redemption logs

use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    filter::{filter_fn, LevelFilter},
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

const LOG_TYPES: [&str; 4] = ["main", "error", "pubsub", "obs"];

/// Initialize centralized file logging
///
/// Creates the log directory tree and sets up file appenders for each log
/// type. `RUST_LOG` overrides the default `info` filter. Returns the
/// WorkerGuards, which must be kept alive for the duration of the program.
pub fn init_logging(logs_dir: &Path) -> std::io::Result<Vec<WorkerGuard>> {
    for log_type in LOG_TYPES {
        fs::create_dir_all(logs_dir.join(log_type))?;
    }

    let mut guards = Vec::new();

    // Main log - all logs
    let (main_appender, main_guard) = create_appender(logs_dir, "main");
    guards.push(main_guard);

    // Error log - ERROR and WARN only
    let (error_appender, error_guard) = create_appender(logs_dir, "error");
    guards.push(error_guard);

    let (pubsub_appender, pubsub_guard) = create_appender(logs_dir, "pubsub");
    guards.push(pubsub_guard);

    let (obs_appender, obs_guard) = create_appender(logs_dir, "obs");
    guards.push(obs_guard);

    let main_layer = tracing_subscriber::fmt::layer()
        .with_writer(main_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .json();

    let error_layer = tracing_subscriber::fmt::layer()
        .with_writer(error_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(LevelFilter::WARN);

    let pubsub_layer = tracing_subscriber::fmt::layer()
        .with_writer(pubsub_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(filter_fn(|metadata| is_pubsub_target(metadata.target())));

    let obs_layer = tracing_subscriber::fmt::layer()
        .with_writer(obs_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(filter_fn(|metadata| is_obs_target(metadata.target())));

    // Console layer
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_level(true);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(main_layer)
        .with(error_layer)
        .with(pubsub_layer)
        .with(obs_layer)
        .with(console_layer)
        .init();

    tracing::info!(dir = %logs_dir.display(), "logging system initialized");

    Ok(guards)
}

/// Targets are module paths; match whole `::` segments only
fn is_pubsub_target(target: &str) -> bool {
    target
        .split("::")
        .any(|segment| matches!(segment, "pubsub" | "ws" | "tungstenite" | "tokio_tungstenite"))
}

fn is_obs_target(target: &str) -> bool {
    target.split("::").any(|segment| matches!(segment, "obs" | "obws"))
}

/// Create a daily rolling file appender
fn create_appender(logs_dir: &Path, name: &str) -> (NonBlocking, WorkerGuard) {
    let appender = RollingFileAppender::new(Rotation::DAILY, logs_dir.join(name), name);
    tracing_appender::non_blocking(appender)
}
