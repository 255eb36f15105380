//! Ordered dispatch of named events to registered handlers
//!
//! Handlers for an event run in registration order after any plugin
//! middleware. Each may replace the payload; the first failure stops the chain.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, error};

use super::{HookError, HookHandler, Payload, Plugin, PluginInfo};
use crate::registry::SessionRegistry;
use crate::types::LogLevel;

struct Bound {
    /// Plugin that registered the handler; `None` for direct registrations
    owner: Option<String>,
    handler: Arc<dyn HookHandler>,
}

#[derive(Default)]
struct Inner {
    plugins: Vec<PluginInfo>,
    hooks: HashMap<String, Vec<Bound>>,
    middleware: Vec<Bound>,
}

/// Ordered handler lists per event, plus middleware run on every dispatch.
#[derive(Default)]
pub struct HookPipeline {
    inner: RwLock<Inner>,
    registry: Option<Arc<SessionRegistry>>,
}

impl HookPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record handler failures in the registry's log ring as well.
    pub fn with_registry(mut self, registry: Arc<SessionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a handler to an event's list.
    pub fn register(&self, event: &str, handler: Arc<dyn HookHandler>) {
        self.write()
            .hooks
            .entry(event.to_string())
            .or_default()
            .push(Bound {
                owner: None,
                handler,
            });
    }

    pub fn load(&self, plugin: Plugin) -> Result<(), HookError> {
        let mut inner = self.write();
        if inner.plugins.iter().any(|p| p.name == plugin.name) {
            return Err(HookError::AlreadyLoaded(plugin.name));
        }

        let info = plugin.info();
        for (event, handler) in plugin.hooks {
            inner.hooks.entry(event).or_default().push(Bound {
                owner: Some(plugin.name.clone()),
                handler,
            });
        }
        if let Some(middleware) = plugin.middleware {
            inner.middleware.push(Bound {
                owner: Some(plugin.name.clone()),
                handler: middleware,
            });
        }

        debug!("Loaded plugin {} ({} hooks)", info.name, info.hooks.len());
        inner.plugins.push(info);
        Ok(())
    }

    /// Remove a plugin and every handler it registered.
    pub fn unload(&self, name: &str) -> Result<(), HookError> {
        let mut inner = self.write();
        let Some(index) = inner.plugins.iter().position(|p| p.name == name) else {
            return Err(HookError::PluginNotFound(name.to_string()));
        };
        inner.plugins.remove(index);

        let owned = |b: &Bound| b.owner.as_deref() == Some(name);
        for handlers in inner.hooks.values_mut() {
            handlers.retain(|b| !owned(b));
        }
        inner.hooks.retain(|_, handlers| !handlers.is_empty());
        inner.middleware.retain(|b| !owned(b));

        debug!("Unloaded plugin {}", name);
        Ok(())
    }

    pub fn list_plugins(&self) -> Vec<PluginInfo> {
        self.read().plugins.clone()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.read().plugins.iter().any(|p| p.name == name)
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.read().hooks.get(event).map_or(0, Vec::len)
    }

    /// Run middleware, then the event's handlers, in registration order.
    ///
    /// Each handler sees the previous handler's result. The first failure is
    /// logged and returned; later handlers do not run.
    pub async fn dispatch(&self, event: &str, payload: Payload) -> Result<Payload, HookError> {
        // Snapshot so no lock is held across an await
        let handlers: Vec<Arc<dyn HookHandler>> = {
            let inner = self.read();
            inner
                .middleware
                .iter()
                .chain(inner.hooks.get(event).into_iter().flatten())
                .map(|b| Arc::clone(&b.handler))
                .collect()
        };

        let mut result = payload;
        for handler in handlers {
            match handler.call(result.clone()).await {
                Ok(Some(next)) => result = next,
                Ok(None) => {}
                Err(e) => {
                    let msg = format!("Hook {} error: {}", event, e);
                    match self.registry {
                        Some(ref registry) => {
                            registry.log(LogLevel::Error, msg, None);
                        }
                        None => error!("{}", msg),
                    }
                    return Err(e);
                }
            }
        }
        Ok(result)
    }
}
