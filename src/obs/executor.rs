//! OBS request execution
//!
//! `ActionExecutor` is the seam redemption actions run against; `ObsExecutor`
//! implements it over obs-websocket v5 via `obws`.

use crate::infrastructure::config::ObsConfig;
use crate::obs::actions::merge_settings;
use async_trait::async_trait;
use obws::requests::inputs::SetSettings;
use obws::requests::scene_items::{Id, SetEnabled};
use obws::Client as ObsClient;
use serde_json::{Map, Value};

/// Failures while running an action
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("OBS request failed: {0}")]
    Obs(#[from] obws::error::Error),
    #[error("no scene to look up `{input}` in")]
    NoScene { input: String },
    #[error("invalid wait duration: {0}s")]
    InvalidWait(f64),
}

/// Operations redemption actions need from OBS
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Scene used by actions that do not name one
    async fn fallback_scene(&self) -> Result<String, ActionError>;

    async fn set_scene_item_visibility(&self, source: &str, visible: bool, scene: &str) -> Result<(), ActionError>;

    async fn update_source_settings(&self, source: &str, settings: &Map<String, Value>) -> Result<(), ActionError>;
}

/// Executor bound to one OBS connection
pub struct ObsExecutor {
    client: ObsClient,
    default_scene: Option<String>,
}

impl ObsExecutor {
    pub async fn connect(config: &ObsConfig) -> Result<Self, ActionError> {
        let password = config.password.as_deref();
        tracing::debug!(
            host = %config.host,
            port = config.port,
            auth = password.is_some(),
            "connecting to OBS"
        );

        let client = ObsClient::connect(&config.host, config.port, password).await?;
        tracing::info!(host = %config.host, port = config.port, "connected to OBS");
        Ok(Self {
            client,
            default_scene: config.default_scene.clone(),
        })
    }
}

#[async_trait]
impl ActionExecutor for ObsExecutor {
    /// The configured default scene, else whatever OBS has on program
    async fn fallback_scene(&self) -> Result<String, ActionError> {
        if let Some(scene) = &self.default_scene {
            return Ok(scene.clone());
        }
        let current = self.client.scenes().current_program_scene().await?;
        tracing::debug!(scene = %current.id.name, "using current program scene");
        Ok(current.id.name)
    }

    async fn set_scene_item_visibility(&self, source: &str, visible: bool, scene: &str) -> Result<(), ActionError> {
        let item_id = self
            .client
            .scene_items()
            .id(Id {
                scene: scene.into(),
                source,
                search_offset: None,
            })
            .await?;

        self.client
            .scene_items()
            .set_enabled(SetEnabled {
                scene: scene.into(),
                item_id,
                enabled: visible,
            })
            .await?;
        tracing::debug!(%scene, %source, visible, "scene item visibility set");
        Ok(())
    }

    async fn update_source_settings(&self, source: &str, settings: &Map<String, Value>) -> Result<(), ActionError> {
        let current = self.client.inputs().settings::<Value>(source.into()).await?;
        let merged = merge_settings(current.settings, settings);

        self.client
            .inputs()
            .set_settings(SetSettings {
                input: source.into(),
                settings: &merged,
                overlay: Some(false),
            })
            .await?;
        tracing::debug!(%source, keys = settings.len(), "source settings updated");
        Ok(())
    }
}
