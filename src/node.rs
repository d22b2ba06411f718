use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;

use async_trait::async_trait;
use channel_plugin::plugin::PluginError;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, trace};

use crate::{
    bot::ChatBot,
    config::Environment,
    error::{ConfigError, ContextError},
    message::Message,
    registries::Registries,
};

pub mod debug;
pub mod receive;
pub mod request;
pub mod send;

pub use debug::{DebugNode, DebugRecord, DebugSink};
pub use receive::ReceiveNode;
pub use request::{RequestNode, RequestType};
pub use send::SendNode;

/// A deployed node. Inputs arrive one at a time from the flow's dispatch loop.
#[async_trait]
pub trait NodeType: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn id(&self) -> &str;

    async fn on_input(&self, message: Message) -> Result<(), NodeError>;
}

pub type Node = Arc<dyn NodeType>;

impl Debug for dyn NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("type", &self.type_name())
            .field("id", &self.id())
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("context store failed: {0}")]
    Context(#[from] ContextError),

    #[error("platform send failed: {0}")]
    Send(#[from] PluginError),

    #[error("message has no chat id")]
    MissingChat,

    #[error("template error: {0}")]
    Template(String),
}

/// A message on its way to a node's input.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub target: String,
    pub message: Message,
}

pub type DispatchQueue = UnboundedSender<Delivery>;

/// The output ports of one node. Sending on a port queues a copy of the
/// message for every node wired to it.
#[derive(Debug, Clone)]
pub struct Outputs {
    node_id: String,
    wires: Arc<Vec<Vec<String>>>,
    queue: DispatchQueue,
}

impl Outputs {
    pub fn new(node_id: &str, wires: Vec<Vec<String>>, queue: DispatchQueue) -> Self {
        Self {
            node_id: node_id.to_string(),
            wires: Arc::new(wires),
            queue,
        }
    }

    pub fn is_wired(&self, port: usize) -> bool {
        self.wires.get(port).is_some_and(|targets| !targets.is_empty())
    }

    pub fn send(&self, port: usize, message: Message) {
        let Some(targets) = self.wires.get(port).filter(|t| !t.is_empty()) else {
            trace!(node = self.node_id.as_str(), port, "output not wired");
            return;
        };
        let (last, rest) = match targets.split_last() {
            Some(split) => split,
            None => return,
        };
        for target in rest {
            self.push(target, message.clone());
        }
        self.push(last, message);
    }

    fn push(&self, target: &str, message: Message) {
        let delivery = Delivery {
            target: target.to_string(),
            message,
        };
        if self.queue.send(delivery).is_err() {
            debug!(node = self.node_id.as_str(), target, "flow stopped, delivery dropped");
        }
    }
}

/// Process-wide name of a node or bot declared in a flow. Node and bot ids
/// are only unique within their flow.
pub fn instance_id(flow_id: &str, local_id: &str) -> String {
    format!("{}/{}", flow_id, local_id)
}

/// What a node gets while it is being built.
pub struct NodeContext<'a> {
    pub flow_id: &'a str,
    pub registries: &'a Registries,
    pub bots: &'a HashMap<String, Arc<ChatBot>>,
    pub environment: Environment,
    pub debug: &'a DebugSink,
}

impl NodeContext<'_> {
    pub fn instance_id(&self, local_id: &str) -> String {
        instance_id(self.flow_id, local_id)
    }

    /// The bot a node refers to in the active environment. With no
    /// reference and exactly one running bot, that bot is used.
    pub fn bot(
        &self,
        node_id: &str,
        bot: &Option<String>,
        bot_production: &Option<String>,
    ) -> Result<Arc<ChatBot>, ConfigError> {
        let reference = bot_reference(self.environment, bot, bot_production);
        match reference {
            Some(id) => self
                .bots
                .get(id)
                .cloned()
                .ok_or_else(|| ConfigError::BotNotRunning {
                    node: node_id.to_string(),
                    bot: id.to_string(),
                }),
            None if self.bots.len() == 1 => self
                .bots
                .values()
                .next()
                .cloned()
                .ok_or_else(|| ConfigError::NoBot(node_id.to_string())),
            None => Err(ConfigError::NoBot(node_id.to_string())),
        }
    }
}

/// `bot` in development, `bot_production` in production.
pub fn bot_reference<'a>(
    environment: Environment,
    bot: &'a Option<String>,
    bot_production: &'a Option<String>,
) -> Option<&'a str> {
    let reference = match environment {
        Environment::Development => bot,
        Environment::Production => bot_production,
    };
    reference.as_deref().filter(|id| !id.trim().is_empty())
}
