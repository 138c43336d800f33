//! Configuration management for the redemption bridge
//!
//! Loads configuration from a TOML file at startup. The path comes from the
//! first command line argument, then `CONFIG_PATH`, then `config.toml`.
//! Secrets may be supplied through the environment instead of the file.

use crate::obs::actions::RedemptionActions;
use crate::pubsub::client::{PubSubConfig, DEFAULT_ENDPOINT, DEFAULT_RECONNECT_RETRIES};
use crate::pubsub::protocol::CHANNEL_ID_PLACEHOLDER;
use crate::ws::ping::HeartbeatConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding `twitch.auth_token`
pub const AUTH_TOKEN_ENV: &str = "TWITCH_AUTH_TOKEN";

/// Environment variable overriding `obs.password`
pub const OBS_PASSWORD_ENV: &str = "OBS_PASSWORD";

/// Bridge configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub twitch: TwitchConfig,

    #[serde(default)]
    pub pubsub: PubSubSettings,

    #[serde(default)]
    pub obs: ObsConfig,

    /// Reward title -> ordered actions
    #[serde(default)]
    pub redemptions: RedemptionActions,
}

/// Twitch account and subscription settings
#[derive(Debug, Clone, Deserialize)]
pub struct TwitchConfig {
    /// Application client id, needed to resolve `broadcaster_name`
    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub broadcaster_name: Option<String>,

    /// Numeric user id; skips the Helix lookup when set
    #[serde(default)]
    pub broadcaster_id: Option<String>,

    /// User access token with `channel:read:redemptions`
    #[serde(default)]
    pub auth_token: String,

    /// Topic templates; `{channel_id}` is replaced by the broadcaster id
    #[serde(default = "default_topics")]
    pub topics: Vec<String>,
}

/// PubSub connection tuning
#[derive(Debug, Clone, Deserialize)]
pub struct PubSubSettings {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Seconds between PINGs (clamped to at least 20)
    #[serde(default = "default_heartbeat_rate")]
    pub heartbeat_rate_secs: u64,

    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,

    /// First reconnect backoff; doubles per failed attempt
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: f64,

    /// Attempts after a liveness or transport failure; negative is unlimited
    #[serde(default = "default_reconnect_retries")]
    pub reconnect_retries: i32,

    /// Attempts after a server RECONNECT request; negative is unlimited
    #[serde(default = "default_reconnect_request_retries")]
    pub reconnect_request_retries: i32,

    #[serde(default = "default_close_timeout")]
    pub close_timeout_secs: f64,

    #[serde(default = "default_reconnect_on_close")]
    pub reconnect_on_close: bool,
}

/// obs-websocket connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct ObsConfig {
    #[serde(default = "default_obs_host")]
    pub host: String,

    #[serde(default = "default_obs_port")]
    pub port: u16,

    #[serde(default)]
    pub password: Option<String>,

    /// Scene used by actions that name none
    #[serde(default)]
    pub default_scene: Option<String>,
}

impl Default for TwitchConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            broadcaster_name: None,
            broadcaster_id: None,
            auth_token: String::new(),
            topics: default_topics(),
        }
    }
}

impl Default for PubSubSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            heartbeat_rate_secs: default_heartbeat_rate(),
            pong_timeout_secs: default_pong_timeout(),
            backoff_base_secs: default_backoff_base(),
            reconnect_retries: default_reconnect_retries(),
            reconnect_request_retries: default_reconnect_request_retries(),
            close_timeout_secs: default_close_timeout(),
            reconnect_on_close: default_reconnect_on_close(),
        }
    }
}

impl Default for ObsConfig {
    fn default() -> Self {
        Self {
            host: default_obs_host(),
            port: default_obs_port(),
            password: None,
            default_scene: None,
        }
    }
}

fn default_topics() -> Vec<String> {
    vec![format!("channel-points-channel-v1.{}", CHANNEL_ID_PLACEHOLDER)]
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_heartbeat_rate() -> u64 {
    60
}

fn default_pong_timeout() -> u64 {
    10
}

fn default_backoff_base() -> f64 {
    1.0
}

fn default_reconnect_retries() -> i32 {
    DEFAULT_RECONNECT_RETRIES
}

fn default_reconnect_request_retries() -> i32 {
    -1 // unlimited
}

fn default_close_timeout() -> f64 {
    1.0
}

fn default_reconnect_on_close() -> bool {
    true
}

fn default_obs_host() -> String {
    "localhost".to_string()
}

fn default_obs_port() -> u16 {
    4455
}

impl Config {
    /// Config file path: explicit argument, then `CONFIG_PATH`, then
    /// `config.toml`
    pub fn resolve_path(arg: Option<String>) -> PathBuf {
        arg.or_else(|| std::env::var("CONFIG_PATH").ok())
            .unwrap_or_else(|| "config.toml".to_string())
            .into()
    }

    /// Load and apply environment overrides
    ///
    /// If the file doesn't exist, defaults are used. Call `validate` before
    /// connecting to Twitch.
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File not found - use defaults
                Config::default()
            }
            Err(e) => return Err(ConfigError::IoError(e)),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup(AUTH_TOKEN_ENV).filter(|t| !t.is_empty()) {
            self.twitch.auth_token = token;
        }
        if let Some(password) = lookup(OBS_PASSWORD_ENV).filter(|p| !p.is_empty()) {
            self.obs.password = Some(password);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = url::Url::parse(&self.pubsub.endpoint)
            .map_err(|e| ConfigError::Invalid(format!("pubsub.endpoint: {}", e)))?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(ConfigError::Invalid(format!(
                "pubsub.endpoint must be a ws:// or wss:// URL, got `{}`",
                self.pubsub.endpoint
            )));
        }

        if self.twitch.topics.is_empty() {
            return Err(ConfigError::Invalid("twitch.topics must not be empty".into()));
        }
        if self.twitch.auth_token.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "twitch.auth_token is required (or set {})",
                AUTH_TOKEN_ENV
            )));
        }
        if self.twitch.broadcaster_id.is_none() {
            if self.twitch.broadcaster_name.is_none() {
                return Err(ConfigError::Invalid(
                    "one of twitch.broadcaster_id or twitch.broadcaster_name is required".into(),
                ));
            }
            if self.twitch.client_id.is_none() {
                return Err(ConfigError::Invalid(
                    "twitch.client_id is required to resolve twitch.broadcaster_name".into(),
                ));
            }
        }

        secs("pubsub.backoff_base_secs", self.pubsub.backoff_base_secs)?;
        secs("pubsub.close_timeout_secs", self.pubsub.close_timeout_secs)?;
        Ok(())
    }

    /// Supervisor settings derived from `[pubsub]`
    pub fn pubsub_config(&self) -> Result<PubSubConfig, ConfigError> {
        let settings = &self.pubsub;
        Ok(PubSubConfig {
            endpoint: settings.endpoint.clone(),
            heartbeat: HeartbeatConfig::new(
                Duration::from_secs(settings.heartbeat_rate_secs),
                Duration::from_secs(settings.pong_timeout_secs),
            ),
            backoff_base: secs("pubsub.backoff_base_secs", settings.backoff_base_secs)?,
            close_timeout: secs("pubsub.close_timeout_secs", settings.close_timeout_secs)?,
            reconnect_request_retries: settings.reconnect_request_retries,
            reconnect_on_close: settings.reconnect_on_close,
        })
    }
}

fn secs(field: &str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| ConfigError::Invalid(format!("{} must be a non-negative number of seconds", field)))
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading file
    IoError(std::io::Error),
    /// Parse error (invalid TOML)
    ParseError(String),
    /// Parsed but unusable
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::ParseError(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(e) => write!(f, "Invalid config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError(e) => Some(e),
            ConfigError::ParseError(_) | ConfigError::Invalid(_) => None,
        }
    }
}
