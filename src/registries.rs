use std::sync::Arc;

use crate::{
    context::ContextProviders, election::MasterRegistry, extension::ExtensionRegistry,
    relay::EventRelayBus,
};

/// Process-scoped shared state, handed to every flow that gets deployed.
/// Flows deployed against the same `Registries` share relay topics and
/// master markers.
#[derive(Debug, Clone)]
pub struct Registries {
    pub bus: Arc<EventRelayBus>,
    pub masters: Arc<MasterRegistry>,
    pub providers: Arc<ContextProviders>,
    pub extensions: Arc<ExtensionRegistry>,
}

impl Registries {
    pub fn new() -> Self {
        Self {
            bus: EventRelayBus::new(),
            masters: MasterRegistry::new(),
            providers: Arc::new(ContextProviders::new()),
            extensions: ExtensionRegistry::new(),
        }
    }
}

impl Default for Registries {
    fn default() -> Self {
        Self::new()
    }
}
