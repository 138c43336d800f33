//! Redemption actions
//!
//! Each channel-point reward title maps to an ordered list of actions,
//! deserialized from the `[redemptions]` config section:
//!
//! ```toml
//! [[redemptions."Hydrate"]]
//! action = "set_scene_item_visibility"
//! source = "Water Bottle"
//! visible = true
//!
//! [[redemptions."Hydrate"]]
//! action = "wait"
//! seconds = 5.0
//! ```

use crate::obs::executor::{ActionError, ActionExecutor};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;

/// Reward title -> actions run in order on redemption
pub type RedemptionActions = HashMap<String, Vec<Action>>;

/// One step of a redemption
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Show or hide a source in a scene
    SetSceneItemVisibility {
        source: String,
        visible: bool,
        /// Falls back to the executor's fallback scene
        #[serde(default)]
        scene: Option<String>,
    },
    /// Merge keys into an input's current settings
    UpdateSourceSettings {
        source: String,
        settings: Map<String, Value>,
    },
    /// Pause before the next action
    Wait { seconds: f64 },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::SetSceneItemVisibility { .. } => "set_scene_item_visibility",
            Action::UpdateSourceSettings { .. } => "update_source_settings",
            Action::Wait { .. } => "wait",
        }
    }

    pub async fn execute(&self, executor: &dyn ActionExecutor) -> Result<(), ActionError> {
        match self {
            Action::SetSceneItemVisibility {
                source,
                visible,
                scene,
            } => {
                let scene = match scene {
                    Some(scene) => scene.clone(),
                    None => executor.fallback_scene().await?,
                };
                if scene.is_empty() {
                    return Err(ActionError::NoScene { input: source.clone() });
                }
                executor.set_scene_item_visibility(source, *visible, &scene).await
            }
            Action::UpdateSourceSettings { source, settings } => {
                executor.update_source_settings(source, settings).await
            }
            Action::Wait { seconds } => {
                // Negative and NaN waits are no-ops
                let pause =
                    Duration::try_from_secs_f64(seconds.max(0.0)).map_err(|_| ActionError::InvalidWait(*seconds))?;
                tokio::time::sleep(pause).await;
                Ok(())
            }
        }
    }
}

/// Shallow merge of `update` into `current`, replacing it if not an object
pub fn merge_settings(current: Value, update: &Map<String, Value>) -> Value {
    let mut merged = match current {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    for (key, value) in update {
        merged.insert(key.clone(), value.clone());
    }
    Value::Object(merged)
}
