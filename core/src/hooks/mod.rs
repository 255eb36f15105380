//! Named-event hook pipeline and the plugins that feed it
//!
//! A plugin is a descriptor: a name, a version, the events it binds and an
//! optional middleware. Handlers receive the current payload and may return a
//! replacement; returning `None` passes the payload through unchanged.

mod pipeline;

pub mod builtin;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

pub use pipeline::HookPipeline;

use crate::validation::ValidationError;

// ============================================================================
// Event names
// ============================================================================

pub const SESSION_PRE_CONNECT: &str = "session:pre-connect";
pub const SESSION_POST_CONNECT: &str = "session:post-connect";
pub const SESSION_PRE_SEND: &str = "session:pre-send";
pub const SESSION_POST_SEND: &str = "session:post-send";
pub const SESSION_PRE_DISCONNECT: &str = "session:pre-disconnect";
pub const SESSION_PRE_SERVE: &str = "session:pre-serve";
pub const SESSION_POST_SERVE: &str = "session:post-serve";
pub const SESSION_PRE_STOP: &str = "session:pre-stop";
pub const SESSION_CREATED: &str = "session:created";
pub const SESSION_DELETED: &str = "session:deleted";
pub const DATA_RECEIVED: &str = "data:received";
pub const BUFFER_GET: &str = "buffer:get";
pub const BUFFER_CLEAR: &str = "buffer:clear";
pub const LOG_ENTRY: &str = "log:entry";
pub const VALIDATE_INPUT: &str = "validate:input";
pub const VALIDATE_SESSION: &str = "validate:session";
pub const VALIDATE_DATA: &str = "validate:data";

// ============================================================================
// Handler types
// ============================================================================

/// Event payload: a JSON object.
pub type Payload = serde_json::Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// A handler refused the operation
    #[error("{0}")]
    Rejected(String),

    #[error("Plugin {0} already loaded")]
    AlreadyLoaded(String),

    #[error("Plugin {0} not found")]
    PluginNotFound(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl HookError {
    pub fn rejected(msg: impl Into<String>) -> Self {
        HookError::Rejected(msg.into())
    }
}

pub type HookResult = std::result::Result<Option<Payload>, HookError>;

#[async_trait]
pub trait HookHandler: Send + Sync {
    async fn call(&self, payload: Payload) -> HookResult;
}

#[async_trait]
impl<F> HookHandler for F
where
    F: Fn(Payload) -> HookResult + Send + Sync,
{
    async fn call(&self, payload: Payload) -> HookResult {
        self(payload)
    }
}

/// Wrap a synchronous closure as a shareable handler.
pub fn handler<F>(f: F) -> Arc<dyn HookHandler>
where
    F: Fn(Payload) -> HookResult + Send + Sync + 'static,
{
    Arc::new(f)
}

// ============================================================================
// Plugin descriptors
// ============================================================================

pub struct Plugin {
    pub name: String,
    pub version: String,
    pub hooks: Vec<(String, Arc<dyn HookHandler>)>,
    pub middleware: Option<Arc<dyn HookHandler>>,
}

impl Plugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "1.0.0".to_string(),
            hooks: Vec::new(),
            middleware: None,
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Bind a handler to an event.
    pub fn on(mut self, event: &str, handler: Arc<dyn HookHandler>) -> Self {
        self.hooks.push((event.to_string(), handler));
        self
    }

    pub fn with_middleware(mut self, middleware: Arc<dyn HookHandler>) -> Self {
        self.middleware = Some(middleware);
        self
    }

    pub fn info(&self) -> PluginInfo {
        PluginInfo {
            name: self.name.clone(),
            version: self.version.clone(),
            hooks: self.hooks.iter().map(|(event, _)| event.clone()).collect(),
            middleware: self.middleware.is_some(),
        }
    }
}

/// What `list_plugins` reports about a loaded plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub hooks: Vec<String>,
    pub middleware: bool,
}

// ============================================================================
// Payload helpers
// ============================================================================

/// Build a payload from `json!({...})`; non-objects give an empty payload.
pub fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}

/// A string field of the payload, if present and a string.
pub fn str_field<'a>(payload: &'a Payload, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str)
}
