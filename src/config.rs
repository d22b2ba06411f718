use std::{env, path::PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{bot::BotConfig, error::ConfigError};

pub const ENVIRONMENT_KEY: &str = "CHATFLOW_ENVIRONMENT";
pub const BOT_OVERRIDE_PREFIX: &str = "CHATFLOW_BOT_";

/// Which bot reference of a node is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    /// `production` (any case) is production, everything else development.
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("production") {
            Environment::Production
        } else {
            Environment::Development
        }
    }
}

/// Read-only settings source.
#[async_trait]
#[typetag::serde]
pub trait ConfigManagerType: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    fn clone_box(&self) -> Box<dyn ConfigManagerType>;
    fn debug_box(&self) -> String;
}

#[derive(Serialize, Deserialize)]
pub struct ConfigManager(pub Box<dyn ConfigManagerType>);

impl ConfigManager {
    pub async fn environment(&self) -> Environment {
        self.0
            .get(ENVIRONMENT_KEY)
            .await
            .map(|v| Environment::parse(&v))
            .unwrap_or_default()
    }

    /// `CHATFLOW_BOT_<BOTNAME>`, botname upper-cased with anything
    /// non-alphanumeric turned into `_`.
    pub fn bot_override_key(botname: &str) -> String {
        let name: String = botname
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("{}{}", BOT_OVERRIDE_PREFIX, name)
    }

    /// A bot configuration found in settings that replaces the flow file's.
    pub async fn bot_override(&self, botname: &str) -> Result<Option<BotConfig>, ConfigError> {
        let Some(raw) = self.0.get(&Self::bot_override_key(botname)).await else {
            return Ok(None);
        };
        let invalid = |reason: String| ConfigError::InvalidOverride {
            botname: botname.to_string(),
            reason,
        };
        let config: BotConfig = serde_json::from_str(&raw).map_err(|e| invalid(e.to_string()))?;
        config.validate().map_err(|e| invalid(e.to_string()))?;
        info!(bot = botname, "using bot configuration from settings");
        Ok(Some(config))
    }
}

impl Clone for ConfigManager {
    fn clone(&self) -> Self {
        ConfigManager(self.0.clone_box())
    }
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.debug_box())
    }
}

/// Process environment, seeded from a `.env` file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvConfigManager {
    env_file: PathBuf,
}

impl EnvConfigManager {
    pub fn new(env_file: PathBuf) -> Box<Self> {
        if env_file.exists() {
            match dotenvy::from_path(&env_file) {
                Ok(()) => info!("loaded settings from {}", env_file.display()),
                Err(e) => warn!("could not parse {}: {}", env_file.display(), e),
            }
        } else {
            info!("no {} found, using the process environment only", env_file.display());
        }
        Box::new(Self { env_file })
    }
}

#[typetag::serde]
#[async_trait]
impl ConfigManagerType for EnvConfigManager {
    async fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    fn clone_box(&self) -> Box<dyn ConfigManagerType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        format!("EnvConfigManager({})", self.env_file.display())
    }
}

/// In-memory settings, mostly for tests and embedding.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct MapConfigManager {
    #[schemars(with = "std::collections::HashMap<String, String>")]
    map: DashMap<String, String>,
}

impl MapConfigManager {
    pub fn new() -> Box<Self> {
        Box::new(Self::default())
    }

    pub fn with(entries: &[(&str, &str)]) -> Box<Self> {
        let me = Self::new();
        for (key, value) in entries {
            me.map.insert(key.to_string(), value.to_string());
        }
        me
    }
}

#[typetag::serde]
#[async_trait]
impl ConfigManagerType for MapConfigManager {
    async fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).map(|v| v.clone())
    }

    fn clone_box(&self) -> Box<dyn ConfigManagerType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        format!("MapConfigManager({} entries)", self.map.len())
    }
}
