//! Channel-point redemption handler

use crate::obs::actions::RedemptionActions;
use crate::obs::executor::{ActionError, ActionExecutor};
use crate::pubsub::handler::{CallbackRegistry, EventHandler, HandlerError};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Topic key for channel-point events
pub const CHANNEL_POINTS_TOPIC: &str = "channel-points-channel-v1";

/// Runs the configured actions for each redeemed reward
pub struct RedemptionHandler {
    executor: Arc<dyn ActionExecutor>,
    actions: RedemptionActions,
}

impl RedemptionHandler {
    pub fn new(executor: Arc<dyn ActionExecutor>, actions: RedemptionActions) -> Self {
        Self { executor, actions }
    }

    /// Run the actions bound to `title`. Returns false for unknown titles.
    pub async fn run_redemption(&self, title: &str) -> Result<bool, ActionError> {
        let Some(actions) = self.actions.get(title) else {
            tracing::debug!(%title, "no actions configured for reward");
            return Ok(false);
        };

        tracing::info!(%title, "executing actions for {}", title);
        for action in actions {
            tracing::debug!(%title, action = action.name(), "running action");
            action.execute(self.executor.as_ref()).await?;
        }
        Ok(true)
    }

    /// Registry with this handler bound to the channel-points topic
    pub fn into_registry(self) -> CallbackRegistry {
        CallbackRegistry::new().register(CHANNEL_POINTS_TOPIC, Arc::new(self))
    }
}

/// `data.redemption.reward.title` of a reward-redeemed payload
fn reward_title(payload: &Value) -> Option<&str> {
    payload
        .pointer("/data/redemption/reward/title")
        .and_then(Value::as_str)
}

#[async_trait]
impl EventHandler for RedemptionHandler {
    async fn handle(&self, payload: Value, ids: Vec<i64>) -> Result<(), HandlerError> {
        let Some(title) = reward_title(&payload) else {
            let kind = payload.get("type").and_then(Value::as_str).unwrap_or("<none>");
            tracing::warn!(%kind, ?ids, "channel-points event without a reward title");
            return Ok(());
        };

        self.run_redemption(title)
            .await
            .map(|_| ())
            .map_err(|e| HandlerError(format!("redemption `{}`: {}", title, e)))
    }
}
