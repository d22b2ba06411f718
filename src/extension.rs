use std::fmt;
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::{debug, warn};

use crate::{bot::BotConfig, message::Message};

/// Runs on every inbound message before listeners see it.
/// Returning `false` drops the message.
pub type InboundMiddleware = Arc<dyn Fn(&mut Message) -> bool + Send + Sync>;

/// Applies to every platform when returned from `BotExtension::platform`.
pub const ANY_PLATFORM: &str = "*";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExtensionError {
    #[error("extension `{name}` failed: {reason}")]
    Failed { name: String, reason: String },
}

/// What an extension may change on a bot while it starts.
pub struct ExtensionContext<'a> {
    config: &'a BotConfig,
    middlewares: Vec<InboundMiddleware>,
}

impl<'a> ExtensionContext<'a> {
    pub fn new(config: &'a BotConfig) -> Self {
        Self { config, middlewares: vec![] }
    }

    pub fn config(&self) -> &BotConfig {
        self.config
    }

    pub fn add_middleware(&mut self, middleware: InboundMiddleware) {
        self.middlewares.push(middleware);
    }

    pub fn into_middlewares(self) -> Vec<InboundMiddleware> {
        self.middlewares
    }
}

/// Platform-specific behaviour registered up front and applied to every
/// bot of that platform when it starts.
pub trait BotExtension: Send + Sync {
    fn name(&self) -> &str;

    fn platform(&self) -> &str;

    fn extend(&self, ctx: &mut ExtensionContext<'_>) -> Result<(), ExtensionError>;
}

impl fmt::Debug for dyn BotExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotExtension")
            .field("name", &self.name())
            .field("platform", &self.platform())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct ExtensionRegistry {
    extensions: RwLock<Vec<Arc<dyn BotExtension>>>,
}

impl ExtensionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, extension: Arc<dyn BotExtension>) {
        debug!(extension = extension.name(), platform = extension.platform(), "extension registered");
        if let Ok(mut extensions) = self.extensions.write() {
            extensions.push(extension);
        }
    }

    /// Extensions for `platform`, in registration order.
    pub fn for_platform(&self, platform: &str) -> Vec<Arc<dyn BotExtension>> {
        self.extensions
            .read()
            .map(|extensions| {
                extensions
                    .iter()
                    .filter(|e| e.platform() == platform || e.platform() == ANY_PLATFORM)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Runs every matching extension against `config` and collects the
    /// middlewares they installed. A failing extension is logged and skipped.
    pub fn apply(&self, config: &BotConfig) -> Vec<InboundMiddleware> {
        let mut collected = vec![];
        for extension in self.for_platform(&config.platform) {
            let mut ctx = ExtensionContext::new(config);
            match extension.extend(&mut ctx) {
                Ok(()) => collected.extend(ctx.into_middlewares()),
                Err(err) => warn!(bot = config.botname.as_str(), "skipping extension: {}", err),
            }
        }
        collected
    }
}
