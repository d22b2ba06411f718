use std::collections::HashMap;
use std::fmt;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, OnceLock, Weak,
};

use async_trait::async_trait;
use channel_plugin::{
    message::ChannelMessage,
    plugin::{AdapterEvent, AdapterSink, ChannelAdapter, PluginError},
};
use dashmap::DashMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{broadcast, mpsc::UnboundedReceiver},
    task::AbortHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    context::{ChatContext, ContextProviders, ContextStore, ProviderParams, providers::MEMORY_PROVIDER},
    error::{BotError, ConfigError},
    extension::{ExtensionRegistry, InboundMiddleware},
    message::Message,
};

/// One bot as declared in a flow file.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
pub struct BotConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub botname: String,
    /// Context provider name. `memory` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub store_params: ProviderParams,
    /// Users allowed to talk to the bot. Everyone when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub usernames: Vec<String>,
    #[serde(default)]
    pub debug: bool,
}

impl BotConfig {
    pub fn new(id: &str, platform: &str, botname: &str) -> Self {
        Self {
            id: id.to_string(),
            platform: platform.to_string(),
            botname: botname.to_string(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.botname.trim().is_empty() {
            return Err(ConfigError::MissingBotName(self.id.clone()));
        }
        if self.platform.trim().is_empty() {
            return Err(ConfigError::MissingPlatform(self.id.clone()));
        }
        Ok(())
    }

    fn is_authorized(&self, username: Option<&str>) -> bool {
        if self.usernames.is_empty() {
            return true;
        }
        let Some(username) = username else {
            return false;
        };
        let username = username.trim_start_matches('@');
        self.usernames
            .iter()
            .any(|allowed| allowed.trim().trim_start_matches('@') == username)
    }
}

/// Receives every inbound message of a bot, in attachment order.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn on_inbound(&self, message: Message);
}

/// Surfaced from the adapter, or raised by the bot itself.
#[derive(Debug, Clone, PartialEq)]
pub enum BotEvent {
    Error(String),
    Warning(String),
    Unauthorized { chat_id: String, username: Option<String> },
}

/// A running bot: an adapter, a context store and the listeners attached to it.
///
/// Adapter events are handled one at a time by a single pump task, so every
/// listener sees the messages of a chat in the order the platform sent them.
pub struct ChatBot {
    config: BotConfig,
    adapter: Arc<dyn ChannelAdapter>,
    store: ContextStore,
    middlewares: Vec<InboundMiddleware>,
    handlers: DashMap<u64, Arc<dyn InboundHandler>>,
    next_handler: AtomicU64,
    events: broadcast::Sender<BotEvent>,
    pump: OnceLock<AbortHandle>,
}

impl ChatBot {
    pub async fn start(
        config: BotConfig,
        adapter: Arc<dyn ChannelAdapter>,
        providers: &ContextProviders,
        extensions: &ExtensionRegistry,
    ) -> Result<Arc<ChatBot>, BotError> {
        config.validate()?;

        let store_name = match config.store.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                warn!(bot = config.botname.as_str(), "no context provider configured, using memory");
                MEMORY_PROVIDER.to_string()
            }
        };
        let store = providers.get_provider(&store_name, &config.store_params)?;
        store.start().await?;

        let middlewares = extensions.apply(&config);

        let (sink, rx) = AdapterSink::new();
        if let Err(err) = adapter.start(sink).await {
            if let Err(e) = store.stop().await {
                warn!(bot = config.botname.as_str(), "could not stop context store: {}", e);
            }
            return Err(err.into());
        }

        let (events, _) = broadcast::channel(64);
        let bot = Arc::new(ChatBot {
            config,
            adapter,
            store,
            middlewares,
            handlers: DashMap::new(),
            next_handler: AtomicU64::new(1),
            events,
            pump: OnceLock::new(),
        });
        let pump = tokio::spawn(pump(Arc::downgrade(&bot), rx));
        let _ = bot.pump.set(pump.abort_handle());

        info!(
            bot = bot.config.botname.as_str(),
            platform = bot.config.platform.as_str(),
            store = store_name.as_str(),
            "bot started"
        );
        Ok(bot)
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn platform(&self) -> &str {
        &self.config.platform
    }

    pub fn store(&self) -> &ContextStore {
        &self.store
    }

    /// Context handle for `chat_id` in this bot's store.
    pub fn chat(&self, chat_id: &str) -> ChatContext {
        ChatContext::new(self.store.clone(), chat_id)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<BotEvent> {
        self.events.subscribe()
    }

    /// Adds a listener until the returned guard is dropped.
    pub fn attach(self: &Arc<Self>, handler: Arc<dyn InboundHandler>) -> InboundSubscription {
        let id = self.next_handler.fetch_add(1, Ordering::Relaxed);
        self.handlers.insert(id, handler);
        InboundSubscription {
            bot: Arc::downgrade(self),
            id,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.handlers.len()
    }

    pub async fn send(&self, message: ChannelMessage) -> Result<(), PluginError> {
        if self.config.debug {
            debug!(bot = self.config.botname.as_str(), chat_id = message.chat_id.as_str(), ?message, "sending");
        }
        self.adapter.send(message).await
    }

    /// Stops the pump, then the adapter, then the context store.
    pub async fn stop(&self) -> Result<(), BotError> {
        if let Some(pump) = self.pump.get() {
            pump.abort();
        }
        self.adapter.stop().await?;
        self.store.stop().await?;
        info!(bot = self.config.botname.as_str(), "bot stopped");
        Ok(())
    }

    fn listeners(&self) -> Vec<Arc<dyn InboundHandler>> {
        let mut listeners: Vec<(u64, Arc<dyn InboundHandler>)> = self
            .handlers
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        listeners.sort_by_key(|(id, _)| *id);
        listeners.into_iter().map(|(_, handler)| handler).collect()
    }

    async fn handle_event(&self, event: AdapterEvent) {
        match event {
            AdapterEvent::Message(inbound) => self.handle_inbound(inbound).await,
            AdapterEvent::Error(err) => {
                error!(bot = self.config.botname.as_str(), "adapter error: {}", err);
                let _ = self.events.send(BotEvent::Error(err));
            }
            AdapterEvent::Warning(warning) => {
                warn!(bot = self.config.botname.as_str(), "adapter warning: {}", warning);
                let _ = self.events.send(BotEvent::Warning(warning));
            }
        }
    }

    #[tracing::instrument(name = "bot_inbound", skip(self, inbound), fields(bot = %self.config.botname, chat_id = %inbound.chat_id))]
    async fn handle_inbound(&self, inbound: ChannelMessage) {
        let username = inbound.from.username.clone();
        if !self.config.is_authorized(username.as_deref()) {
            warn!(username = ?username, "username not authorized, message dropped");
            let _ = self.events.send(BotEvent::Unauthorized {
                chat_id: inbound.chat_id,
                username,
            });
            return;
        }

        let chat = self.chat(&inbound.chat_id);
        let mut message = Message::from_channel(inbound, chat);
        for middleware in &self.middlewares {
            if !middleware(&mut message) {
                debug!("message dropped by extension middleware");
                return;
            }
        }

        let listeners = self.listeners();
        if listeners.is_empty() {
            debug!("no listeners attached");
        }
        for handler in listeners {
            handler.on_inbound(message.clone()).await;
        }
    }
}

impl fmt::Debug for ChatBot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatBot")
            .field("id", &self.config.id)
            .field("botname", &self.config.botname)
            .field("platform", &self.config.platform)
            .field("adapter", &self.adapter.name())
            .field("store", &self.store)
            .finish()
    }
}

impl Drop for ChatBot {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get() {
            pump.abort();
        }
    }
}

async fn pump(bot: Weak<ChatBot>, mut rx: UnboundedReceiver<AdapterEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(bot) = bot.upgrade() else {
            break;
        };
        bot.handle_event(event).await;
    }
}

/// Keeps a listener attached to a bot. Dropping it detaches.
#[must_use = "dropping the subscription detaches the listener immediately"]
#[derive(Debug)]
pub struct InboundSubscription {
    bot: Weak<ChatBot>,
    id: u64,
}

impl Drop for InboundSubscription {
    fn drop(&mut self) {
        if let Some(bot) = self.bot.upgrade() {
            bot.handlers.remove(&self.id);
        }
    }
}

/// Builds the adapter a bot talks through.
pub type AdapterFactory = Arc<dyn Fn(&BotConfig) -> Arc<dyn ChannelAdapter> + Send + Sync>;

/// Platform name → adapter factory, with an optional catch-all.
#[derive(Clone, Default)]
pub struct Adapters {
    factories: Arc<DashMap<String, AdapterFactory>>,
    fallback: Option<AdapterFactory>,
}

impl Adapters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, platform: &str, factory: AdapterFactory) {
        self.factories.insert(platform.to_string(), factory);
    }

    /// Used for every platform without a dedicated factory.
    pub fn with_fallback(mut self, factory: AdapterFactory) -> Self {
        self.fallback = Some(factory);
        self
    }

    pub fn create(&self, config: &BotConfig) -> Result<Arc<dyn ChannelAdapter>, ConfigError> {
        let factory = self
            .factories
            .get(&config.platform)
            .map(|f| f.value().clone())
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| ConfigError::UnknownPlatform(config.platform.clone()))?;
        Ok(factory(config))
    }
}

impl fmt::Debug for Adapters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let platforms: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        f.debug_struct("Adapters")
            .field("platforms", &platforms)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}
