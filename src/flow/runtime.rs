use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    bot::{Adapters, BotConfig, ChatBot},
    config::{ConfigManager, Environment},
    flow::{Flow, FlowError},
    message::Message,
    node::{DebugRecord, DebugSink, Delivery, Node, NodeContext, Outputs},
    registries::Registries,
};

/// A node input that failed.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeFailure {
    pub node_id: String,
    pub error: String,
}

/// A deployed flow: its running bots, its nodes and the loop that feeds them.
///
/// Deliveries are handled one at a time in the order they were queued.
/// Dropping the runtime without `stop` leaves bots running until their
/// last handle goes away.
pub struct FlowRuntime {
    id: String,
    environment: Environment,
    nodes: Arc<DashMap<String, Node>>,
    bots: Mutex<HashMap<String, Arc<ChatBot>>>,
    queue: mpsc::UnboundedSender<Delivery>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    failures: broadcast::Sender<NodeFailure>,
    debug: DebugSink,
}

impl FlowRuntime {
    /// Starts the bots the flow uses in the active environment, then builds
    /// its nodes in file order. Bots or nodes that fail to come up are
    /// logged and stay inactive; the rest of the flow runs.
    pub async fn deploy(
        flow: &Flow,
        registries: &Registries,
        adapters: &Adapters,
        config: &ConfigManager,
    ) -> Result<FlowRuntime, FlowError> {
        flow.validate()?;
        let environment = config.environment().await;
        info!(flow = flow.id.as_str(), ?environment, "deploying flow");

        let mut bots = HashMap::new();
        for declared in &flow.bots {
            if !flow.is_bot_used(&declared.id, environment) {
                info!(
                    flow = flow.id.as_str(),
                    bot = declared.botname.as_str(),
                    ?environment,
                    "bot not used in this environment, it will not be launched"
                );
                continue;
            }
            if let Some(bot) = launch_bot(declared, registries, adapters, config).await {
                bots.insert(declared.id.clone(), bot);
            }
        }

        let (queue, rx) = mpsc::unbounded_channel();
        let (failures, _) = broadcast::channel(64);
        let debug = DebugSink::new();
        let nodes: Arc<DashMap<String, Node>> = Arc::new(DashMap::new());
        {
            let ctx = NodeContext {
                flow_id: &flow.id,
                registries,
                bots: &bots,
                environment,
                debug: &debug,
            };
            for node in &flow.nodes {
                let outputs = Outputs::new(&node.id, node.wires.clone(), queue.clone());
                match node.kind.build(&node.id, &ctx, outputs) {
                    Ok(built) => {
                        debug!(flow = flow.id.as_str(), node = node.id.as_str(), kind = node.kind.type_name(), "node ready");
                        nodes.insert(node.id.clone(), built);
                    }
                    Err(err) => error!(
                        flow = flow.id.as_str(),
                        node = node.id.as_str(),
                        "node will stay inactive: {}",
                        err
                    ),
                }
            }
        }

        let dispatcher = tokio::spawn(dispatch(flow.id.clone(), nodes.clone(), rx, failures.clone()));
        info!(flow = flow.id.as_str(), nodes = nodes.len(), bots = bots.len(), "flow deployed");

        Ok(FlowRuntime {
            id: flow.id.clone(),
            environment,
            nodes,
            bots: Mutex::new(bots),
            queue,
            dispatcher: Mutex::new(Some(dispatcher)),
            failures,
            debug,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn node_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.nodes.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn bot(&self, id: &str) -> Option<Arc<ChatBot>> {
        self.bots.lock().ok()?.get(id).cloned()
    }

    /// Queues `message` for the input of `node_id`. `false` when the node
    /// is not active or the flow was stopped.
    pub fn inject(&self, node_id: &str, message: Message) -> bool {
        if !self.nodes.contains_key(node_id) {
            warn!(flow = self.id.as_str(), node = node_id, "cannot inject, node is not active");
            return false;
        }
        self.queue
            .send(Delivery {
                target: node_id.to_string(),
                message,
            })
            .is_ok()
    }

    pub fn failures(&self) -> broadcast::Receiver<NodeFailure> {
        self.failures.subscribe()
    }

    pub fn debug(&self) -> broadcast::Receiver<DebugRecord> {
        self.debug.subscribe()
    }

    /// Tears the flow down: nodes first (relay topics, master markers and
    /// inbound listeners go with them), then the bots, then the loop.
    pub async fn stop(&self) {
        let count = self.nodes.len();
        self.nodes.clear();

        let bots: Vec<Arc<ChatBot>> = match self.bots.lock() {
            Ok(mut bots) => bots.drain().map(|(_, bot)| bot).collect(),
            Err(_) => vec![],
        };
        for bot in bots {
            if let Err(err) = bot.stop().await {
                warn!(flow = self.id.as_str(), bot = bot.id(), "bot did not stop cleanly: {}", err);
            }
        }

        if let Some(dispatcher) = self.dispatcher.lock().ok().and_then(|mut d| d.take()) {
            dispatcher.abort();
        }
        info!(flow = self.id.as_str(), nodes = count, "flow stopped");
    }
}

impl std::fmt::Debug for FlowRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowRuntime")
            .field("id", &self.id)
            .field("environment", &self.environment)
            .field("nodes", &self.node_ids())
            .finish()
    }
}

impl Drop for FlowRuntime {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.get_mut().ok().and_then(|d| d.take()) {
            dispatcher.abort();
        }
    }
}

/// Applies a settings override, then creates and starts the bot.
async fn launch_bot(
    declared: &BotConfig,
    registries: &Registries,
    adapters: &Adapters,
    config: &ConfigManager,
) -> Option<Arc<ChatBot>> {
    let bot_config = match config.bot_override(&declared.botname).await {
        Ok(Some(mut overridden)) => {
            if overridden.id.is_empty() {
                overridden.id = declared.id.clone();
            }
            overridden
        }
        Ok(None) => declared.clone(),
        Err(err) => {
            error!(bot = declared.botname.as_str(), "{}", err);
            return None;
        }
    };

    let adapter = match adapters.create(&bot_config) {
        Ok(adapter) => adapter,
        Err(err) => {
            error!(bot = bot_config.botname.as_str(), "{}", err);
            return None;
        }
    };
    match ChatBot::start(bot_config, adapter, &registries.providers, &registries.extensions).await {
        Ok(bot) => Some(bot),
        Err(err) => {
            error!(bot = declared.botname.as_str(), "bot not activated: {}", err);
            None
        }
    }
}

async fn dispatch(
    flow_id: String,
    nodes: Arc<DashMap<String, Node>>,
    mut rx: mpsc::UnboundedReceiver<Delivery>,
    failures: broadcast::Sender<NodeFailure>,
) {
    while let Some(Delivery { target, message }) = rx.recv().await {
        // never hold a map guard across the await
        let node = nodes.get(&target).map(|entry| entry.value().clone());
        let Some(node) = node else {
            debug!(flow = flow_id.as_str(), node = target.as_str(), "node not active, delivery dropped");
            continue;
        };
        if let Err(err) = node.on_input(message).await {
            error!(flow = flow_id.as_str(), node = target.as_str(), "node failed: {}", err);
            let _ = failures.send(NodeFailure {
                node_id: target,
                error: err.to_string(),
            });
        }
    }
    debug!(flow = flow_id.as_str(), "dispatch loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapConfigManager;
    use channel_plugin::{plugin::ChannelAdapter, plugin_test_util::MockAdapter};
    use serde_json::json;
    use std::time::Duration;

    fn mock_adapters() -> (Adapters, Arc<DashMap<String, MockAdapter>>) {
        let created: Arc<DashMap<String, MockAdapter>> = Arc::new(DashMap::new());
        let record = created.clone();
        let adapters = Adapters::new().with_fallback(Arc::new(move |cfg: &BotConfig| {
            let mock = MockAdapter::new(&cfg.platform);
            record.insert(cfg.id.clone(), mock.clone());
            Arc::new(mock) as Arc<dyn ChannelAdapter>
        }));
        (adapters, created)
    }

    #[tokio::test]
    async fn test_inject_reaches_debug() {
        let flow = Flow::from_yaml(
            r#"
id: f
nodes:
  - id: dbg
    type: debug
"#,
        )
        .unwrap();
        let (adapters, _) = mock_adapters();
        let runtime = FlowRuntime::deploy(&flow, &Registries::new(), &adapters, &ConfigManager(MapConfigManager::new()))
            .await
            .unwrap();
        let mut records = runtime.debug();

        assert!(runtime.inject("dbg", Message::new(json!("ping"))));
        assert!(!runtime.inject("ghost", Message::new(json!("lost"))));

        let record = tokio::time::timeout(Duration::from_secs(2), records.recv()).await.unwrap().unwrap();
        assert_eq!(record.message.payload, json!("ping"));
        runtime.stop().await;
    }

    #[tokio::test]
    async fn test_unused_and_broken_bots_are_not_launched() {
        let flow = Flow::from_yaml(
            r#"
id: f
bots:
  - id: used
    platform: telegram
    botname: used
  - id: idle
    platform: telegram
    botname: idle
  - id: broken
    platform: telegram
    botname: broken
    store: nowhere
nodes:
  - id: in
    type: receive
    bot: used
  - id: in2
    type: receive
    bot: broken
"#,
        )
        .unwrap();
        let (adapters, created) = mock_adapters();
        let runtime = FlowRuntime::deploy(&flow, &Registries::new(), &adapters, &ConfigManager(MapConfigManager::new()))
            .await
            .unwrap();

        assert!(runtime.bot("used").is_some());
        assert!(runtime.bot("idle").is_none());
        assert!(runtime.bot("broken").is_none());
        assert!(!created.contains_key("idle"));
        // the receiver of the broken bot is inactive
        assert_eq!(runtime.node_ids(), vec!["in".to_string()]);
        runtime.stop().await;
    }

    #[tokio::test]
    async fn test_production_uses_production_bot() {
        let flow = Flow::from_yaml(
            r#"
id: f
bots:
  - id: dev
    platform: telegram
    botname: dev
  - id: prod
    platform: telegram
    botname: prod
nodes:
  - id: in
    type: receive
    bot: dev
    bot_production: prod
"#,
        )
        .unwrap();
        let (adapters, _) = mock_adapters();
        let config = ConfigManager(MapConfigManager::with(&[("CHATFLOW_ENVIRONMENT", "production")]));
        let runtime = FlowRuntime::deploy(&flow, &Registries::new(), &adapters, &config).await.unwrap();

        assert_eq!(runtime.environment(), Environment::Production);
        assert!(runtime.bot("prod").is_some());
        assert!(runtime.bot("dev").is_none());
        runtime.stop().await;
    }

    #[tokio::test]
    async fn test_override_from_settings() {
        let flow = Flow::from_yaml(
            r#"
id: f
bots:
  - id: b
    platform: telegram
    botname: helper
nodes:
  - id: in
    type: receive
"#,
        )
        .unwrap();
        let (adapters, created) = mock_adapters();
        let config = ConfigManager(MapConfigManager::with(&[(
            "CHATFLOW_BOT_HELPER",
            r#"{"platform": "slack", "botname": "helper"}"#,
        )]));
        let runtime = FlowRuntime::deploy(&flow, &Registries::new(), &adapters, &config).await.unwrap();

        let bot = runtime.bot("b").unwrap();
        assert_eq!(bot.platform(), "slack");
        assert_eq!(created.get("b").map(|m| m.value().clone()).unwrap().name(), "slack");
        runtime.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_override_keeps_bot_down() {
        let flow = Flow::from_yaml(
            r#"
id: f
bots:
  - id: b
    platform: telegram
    botname: helper
nodes:
  - id: in
    type: receive
"#,
        )
        .unwrap();
        let (adapters, _) = mock_adapters();
        let config = ConfigManager(MapConfigManager::with(&[("CHATFLOW_BOT_HELPER", "{")]));
        let runtime = FlowRuntime::deploy(&flow, &Registries::new(), &adapters, &config).await.unwrap();

        assert!(runtime.bot("b").is_none());
        assert!(runtime.node_ids().is_empty());
        runtime.stop().await;
    }
}
