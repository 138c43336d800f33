//! Twitch channel-point redemptions driving OBS
//!
//! # Usage
//! ```text
//! redemption-bridge [CONFIG] [--run TITLE]
//! ```
//! Without `--run`, subscribes to channel-point events and runs the
//! configured actions for every redemption until Ctrl-C. With `--run`, runs
//! the actions for one reward title against OBS and exits.
//!
//! # Architecture
//! - **pubsub**: PubSub supervisor, receive loop, dispatcher
//! - **ws**: WebSocket transport and heartbeat
//! - **obs**: Actions and the OBS executor
//! - **rest**: Helix lookup
//! - **infrastructure**: Cold path (logging, metrics, config)

use anyhow::Context;
use redemption_bridge::infrastructure::{init_logging, Config};
use redemption_bridge::obs::{ObsExecutor, RedemptionHandler};
use redemption_bridge::rest::HelixClient;
use redemption_bridge::{PubSubClient, Result};
use std::path::Path;
use std::sync::Arc;

/// Command line: optional config path, optional `--run TITLE`
struct Args {
    config_path: Option<String>,
    run_title: Option<String>,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> anyhow::Result<Self> {
        let mut parsed = Args {
            config_path: None,
            run_title: None,
        };
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--run" => {
                    parsed.run_title = Some(args.next().context("--run needs a reward title")?);
                }
                _ if parsed.config_path.is_none() => parsed.config_path = Some(arg),
                _ => anyhow::bail!("unexpected argument `{}`", arg),
            }
        }
        Ok(parsed)
    }
}

/// Main application state
struct BridgeApp {
    config: Config,
}

impl BridgeApp {
    fn new(config: Config) -> Self {
        Self { config }
    }

    async fn handler(&self) -> Result<RedemptionHandler> {
        let executor = ObsExecutor::connect(&self.config.obs).await?;
        Ok(RedemptionHandler::new(Arc::new(executor), self.config.redemptions.clone()))
    }

    async fn broadcaster_id(&self) -> Result<String> {
        let twitch = &self.config.twitch;
        if let Some(id) = &twitch.broadcaster_id {
            return Ok(id.clone());
        }
        // validate() guarantees both are present when the id is not
        let (Some(client_id), Some(name)) = (&twitch.client_id, &twitch.broadcaster_name) else {
            return Err(redemption_bridge::ConfigError::Invalid("broadcaster id cannot be resolved".into()).into());
        };
        let helix = HelixClient::new(client_id, &twitch.auth_token);
        Ok(helix.get_user_id(name).await?)
    }

    /// Run a single redemption's actions
    async fn run_once(&self, title: &str) -> Result<()> {
        let handler = self.handler().await?;
        if !handler.run_redemption(title).await? {
            tracing::warn!(%title, "no actions configured for this reward");
        }
        Ok(())
    }

    /// Run the bridge until Ctrl-C or a terminal failure
    async fn run(&self) -> Result<()> {
        tracing::info!("Starting redemption bridge {}", env!("CARGO_PKG_VERSION"));
        self.config.validate()?;

        let broadcaster_id = self.broadcaster_id().await?;
        let registry = self.handler().await?.into_registry();

        let client = PubSubClient::new(
            &self.config.twitch.topics,
            &self.config.twitch.auth_token,
            &broadcaster_id,
            registry,
            self.config.pubsub_config()?,
        );
        tracing::info!(%broadcaster_id, topics = ?client.topics(), "starting pubsub client");
        let handle = client.handle();
        let mut run = tokio::spawn(client.run_tasks(self.config.pubsub.reconnect_retries));

        tokio::select! {
            result = &mut run => return Ok(result??),
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("Ctrl-C received, disconnecting");
            }
        }

        if handle.is_active() {
            handle.disconnect().await;
            run.await??;
        } else {
            // Still on the initial connect; nothing to tear down
            run.abort();
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse(std::env::args().skip(1))?;

    let config_path = Config::resolve_path(args.config_path);
    let config = Config::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let _guards = init_logging(Path::new("logs")).context("initializing logging")?;
    tracing::info!(path = %config_path.display(), "configuration loaded");

    let app = BridgeApp::new(config);
    let result = match &args.run_title {
        Some(title) => app.run_once(title).await,
        None => app.run().await,
    };

    match &result {
        Ok(()) => tracing::info!("redemption bridge stopped"),
        Err(e) => tracing::error!(error = %e, "redemption bridge failed"),
    }
    result.map_err(Into::into)
}
