//! OBS integration: redemption actions and their executor

pub mod actions;
pub mod executor;
pub mod redemption;

pub use actions::{Action, RedemptionActions};
pub use executor::{ActionError, ActionExecutor, ObsExecutor};
pub use redemption::{RedemptionHandler, CHANNEL_POINTS_TOPIC};
