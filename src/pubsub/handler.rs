//! Topic handlers and the callback registry

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Failure reported by a topic handler
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// Consumer of routed events for one topic key
///
/// Receives the decoded payload and the numeric ids that trailed the topic
/// key. Handlers run one at a time on the dispatch task, so long-running
/// work blocks every later event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, payload: Value, ids: Vec<i64>) -> Result<(), HandlerError>;
}

/// Adapter for plain synchronous closures
pub struct SyncHandler<F>(F);

#[async_trait]
impl<F> EventHandler for SyncHandler<F>
where
    F: Fn(Value, Vec<i64>) -> Result<(), HandlerError> + Send + Sync,
{
    async fn handle(&self, payload: Value, ids: Vec<i64>) -> Result<(), HandlerError> {
        (self.0)(payload, ids)
    }
}

/// Adapter for closures returning a future
pub struct AsyncHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for AsyncHandler<F>
where
    F: Fn(Value, Vec<i64>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, payload: Value, ids: Vec<i64>) -> Result<(), HandlerError> {
        (self.0)(payload, ids).await
    }
}

/// Wrap a synchronous closure as a handler
pub fn handler_fn<F>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Value, Vec<i64>) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    Arc::new(SyncHandler(f))
}

/// Wrap an async closure as a handler
pub fn async_handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Value, Vec<i64>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(AsyncHandler(f))
}

/// Topic key -> handler, fixed once the client is built
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a handler to a topic key, replacing any previous binding
    pub fn register(mut self, key: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.insert(key.into(), handler);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Arc<dyn EventHandler>> {
        self.handlers.get(key)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}
