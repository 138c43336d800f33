//! Twitch PubSub client
//!
//! - `protocol` - wire frames and topic parsing
//! - `handler` - handler trait and callback registry
//! - `dispatch` - ordered delivery to handlers
//! - `receive` - frame routing loop
//! - `client` - connection supervisor

pub mod client;
pub mod dispatch;
pub mod handler;
pub mod protocol;
pub mod receive;

pub use client::{
    ClientHandle, ClientState, PubSubClient, PubSubConfig, PubSubError, DEFAULT_ENDPOINT,
    DEFAULT_RECONNECT_RETRIES,
};
pub use dispatch::{Dispatch, DispatchError, DispatchQueue, Dispatcher};
pub use handler::{async_handler_fn, handler_fn, CallbackRegistry, EventHandler, HandlerError};
pub use protocol::{InboundFrame, ListenRequest, TopicPath, CHANNEL_ID_PLACEHOLDER};
pub use receive::{ReceiveExit, ReceiveLoop};
