use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::{
    bot::{InboundHandler, InboundSubscription},
    election::{MasterClaim, marker_key},
    handoff,
    message::Message,
    node::{NodeContext, NodeError, NodeType, Outputs, instance_id},
    relay::{EventRelayBus, node_topic},
};

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ReceiveConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_production: Option<String>,
}

/// Entry point of a conversation: every inbound message of its bot starts here.
///
/// Of all receivers bound to the same bot, only the master looks at the
/// chat's pending handoff. It either redirects the message to the waiting
/// node or sends it out on output 0. The others forward everything on
/// output 0 untouched.
pub struct ReceiveNode {
    id: String,
    bot_id: String,
    master: bool,
    // detach before releasing mastership
    _inbound: InboundSubscription,
    _claim: Option<MasterClaim>,
}

impl ReceiveNode {
    pub fn build(id: &str, config: &ReceiveConfig, ctx: &NodeContext<'_>, outputs: Outputs) -> Result<Self, NodeError> {
        let bot = ctx.bot(id, &config.bot, &config.bot_production)?;
        // bots are launched per flow, so is the election
        let marker = marker_key(bot.platform(), &ctx.instance_id(bot.id()));
        let claim = ctx.registries.masters.claim(&marker, &ctx.instance_id(id));
        let master = claim.is_some();
        let inbound = bot.attach(Arc::new(Listener {
            flow_id: ctx.flow_id.to_string(),
            node_id: id.to_string(),
            master,
            bus: ctx.registries.bus.clone(),
            outputs,
        }));
        debug!(node = id, bot = bot.id(), master, "receiver attached");
        Ok(Self {
            id: id.to_string(),
            bot_id: bot.id().to_string(),
            master,
            _inbound: inbound,
            _claim: claim,
        })
    }

    pub fn is_master(&self) -> bool {
        self.master
    }

    pub fn bot_id(&self) -> &str {
        &self.bot_id
    }
}

#[async_trait]
impl NodeType for ReceiveNode {
    fn type_name(&self) -> &'static str {
        "receive"
    }

    fn id(&self) -> &str {
        &self.id
    }

    async fn on_input(&self, _message: Message) -> Result<(), NodeError> {
        trace!(node = self.id.as_str(), "receive nodes take no wired input");
        Ok(())
    }
}

struct Listener {
    flow_id: String,
    node_id: String,
    master: bool,
    bus: Arc<EventRelayBus>,
    outputs: Outputs,
}

#[async_trait]
impl InboundHandler for Listener {
    #[tracing::instrument(name = "receive", skip_all, fields(node = %self.node_id, chat_id = ?message.chat_id()))]
    async fn on_inbound(&self, message: Message) {
        if !self.master {
            self.outputs.send(0, message);
            return;
        }
        let Some(chat) = message.chat().cloned() else {
            self.outputs.send(0, message);
            return;
        };
        match handoff::read_and_clear(&chat).await {
            Ok(Some(waiting)) => {
                let topic = node_topic(&instance_id(&self.flow_id, &waiting));
                if self.bus.emit(&topic, message) {
                    debug!(target_node = waiting.as_str(), "reply redirected");
                }
            }
            Ok(None) => self.outputs.send(0, message),
            Err(err) => {
                warn!("could not read the pending handoff, treating as new message: {}", err);
                self.outputs.send(0, message);
            }
        }
    }
}
