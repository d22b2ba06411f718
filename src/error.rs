use channel_plugin::plugin::PluginError;
use thiserror::Error;

/// Missing or invalid bot / provider configuration. Reported once at
/// startup; the affected bot or node stays inactive.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("bot `{0}` has no botname")]
    MissingBotName(String),

    #[error("bot `{0}` has no platform")]
    MissingPlatform(String),

    #[error("the context provider `{0}` doesn't exist")]
    UnknownProvider(String),

    #[error("invalid parameter `{param}` for context provider `{provider}`: {reason}")]
    InvalidProviderParam {
        provider: String,
        param: String,
        reason: String,
    },

    #[error("no adapter registered for platform `{0}`")]
    UnknownPlatform(String),

    #[error("found a configuration for bot `{botname}` in settings, but it's invalid: {reason}")]
    InvalidOverride { botname: String, reason: String },

    #[error("node `{node}` refers to bot `{bot}`, which is not running")]
    BotNotRunning { node: String, bot: String },

    #[error("node `{0}` has no bot for the active environment")]
    NoBot(String),
}

/// A context provider failed to read or write.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ContextError {
    #[error("context storage I/O error: {0}")]
    Io(String),

    #[error("context serialization error: {0}")]
    Serialization(String),

    #[error("context provider `{0}` is stopped")]
    Stopped(String),
}

impl From<std::io::Error> for ContextError {
    fn from(err: std::io::Error) -> Self {
        ContextError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ContextError {
    fn from(err: serde_json::Error) -> Self {
        ContextError::Serialization(err.to_string())
    }
}

/// Why a bot could not be launched.
#[derive(Debug, Error)]
pub enum BotError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("adapter failed to start: {0}")]
    Adapter(#[from] PluginError),
}
