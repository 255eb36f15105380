//! Plugins compiled into every build

mod buffer;
mod logging;
mod session;
mod validation;

use std::sync::Arc;

use tracing::{debug, info};

pub use buffer::BufferPlugin;
pub use logging::LoggingPlugin;
pub use session::SessionPlugin;
pub use validation::ValidationPlugin;

use super::{HookError, HookPipeline, Plugin};
use crate::registry::SessionRegistry;
use crate::validation::Validator;

/// Shared handles to the built-in plugins' state.
#[derive(Clone)]
pub struct Builtins {
    pub session: Arc<SessionPlugin>,
    pub buffer: Arc<BufferPlugin>,
    pub logging: Arc<LoggingPlugin>,
    pub validation: Arc<ValidationPlugin>,
}

impl Builtins {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            session: Arc::new(SessionPlugin::new(Arc::clone(&registry))),
            buffer: Arc::new(BufferPlugin::new()),
            logging: Arc::new(LoggingPlugin::new()),
            validation: Arc::new(ValidationPlugin::new(Validator::new(), registry)),
        }
    }

    /// Descriptors in load order.
    pub fn plugins(&self) -> Vec<Plugin> {
        vec![
            self.session.plugin(),
            self.buffer.plugin(),
            self.logging.plugin(),
            self.validation.plugin(),
        ]
    }

    /// Load every built-in plugin not named in `disabled`.
    pub fn install(&self, pipeline: &HookPipeline, disabled: &[String]) -> Result<(), HookError> {
        for plugin in self.plugins() {
            if disabled.iter().any(|d| *d == plugin.name) {
                debug!("Plugin {} disabled by config", plugin.name);
                continue;
            }
            let name = plugin.name.clone();
            pipeline.load(plugin)?;
            info!("Loaded plugin: {}", name);
        }
        Ok(())
    }
}
