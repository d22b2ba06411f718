use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use crate::{
    context::{ContextStore, FileContextStore, InMemoryContextStore},
    error::ConfigError,
};

pub type ProviderParams = HashMap<String, Value>;

/// Builds a context store from the parameters found in a bot configuration.
pub type ProviderFactory = Arc<dyn Fn(&ProviderParams) -> Result<ContextStore, ConfigError> + Send + Sync>;

pub const MEMORY_PROVIDER: &str = "memory";
pub const FILE_PROVIDER: &str = "plain-file";

/// Named context-provider factories. Bots pick one by name.
pub struct ContextProviders {
    factories: DashMap<String, ProviderFactory>,
}

impl ContextProviders {
    /// Registry with the built-in `memory` and `plain-file` providers.
    pub fn new() -> Self {
        let me = Self::empty();
        me.register(MEMORY_PROVIDER, Arc::new(memory_provider));
        me.register(FILE_PROVIDER, Arc::new(file_provider));
        me
    }

    pub fn empty() -> Self {
        Self { factories: DashMap::new() }
    }

    /// Adds or replaces a provider.
    pub fn register(&self, name: &str, factory: ProviderFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn has_provider(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn get_provider(&self, name: &str, params: &ProviderParams) -> Result<ContextStore, ConfigError> {
        let factory = self
            .factories
            .get(name)
            .map(|f| f.value().clone())
            .ok_or_else(|| ConfigError::UnknownProvider(name.to_string()))?;
        factory(params)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.iter().map(|kv| kv.key().clone()).collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for ContextProviders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextProviders")
            .field("providers", &self.names())
            .finish()
    }
}

impl Default for ContextProviders {
    fn default() -> Self {
        Self::new()
    }
}

fn memory_provider(params: &ProviderParams) -> Result<ContextStore, ConfigError> {
    let ttl_secs = match params.get("ttl_secs") {
        None | Some(Value::Null) => 0,
        Some(value) => value.as_u64().ok_or_else(|| ConfigError::InvalidProviderParam {
            provider: MEMORY_PROVIDER.to_string(),
            param: "ttl_secs".to_string(),
            reason: format!("expected a non-negative integer, got {}", value),
        })?,
    };
    Ok(InMemoryContextStore::new(ttl_secs))
}

fn file_provider(params: &ProviderParams) -> Result<ContextStore, ConfigError> {
    let path = params
        .get("path")
        .and_then(Value::as_str)
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ConfigError::InvalidProviderParam {
            provider: FILE_PROVIDER.to_string(),
            param: "path".to_string(),
            reason: "a directory path is required".to_string(),
        })?;
    Ok(FileContextStore::new(path))
}
