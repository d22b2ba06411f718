use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    bot::ChatBot,
    handoff,
    message::Message,
    node::{NodeContext, NodeError, NodeType, Outputs},
    relay::{RelaySubscription, node_topic},
};

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct SendConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_production: Option<String>,
    /// Route the chat's next reply to output 0.
    #[serde(default)]
    pub track: bool,
    /// Forward the message on output 0 once it was sent.
    #[serde(default)]
    pub pass_through: bool,
}

/// Delivers messages to the platform through its bot.
pub struct SendNode {
    id: String,
    bot: Arc<ChatBot>,
    track: bool,
    pass_through: bool,
    outputs: Outputs,
    _relay: RelaySubscription,
}

impl SendNode {
    pub fn build(id: &str, config: &SendConfig, ctx: &NodeContext<'_>, outputs: Outputs) -> Result<Self, NodeError> {
        let bot = ctx.bot(id, &config.bot, &config.bot_production)?;
        let follow_up = outputs.clone();
        let relay = ctx
            .registries
            .bus
            .subscribe(&node_topic(&ctx.instance_id(id)), Arc::new(move |reply: Message| follow_up.send(0, reply)));
        Ok(Self {
            id: id.to_string(),
            bot,
            track: config.track,
            pass_through: config.pass_through,
            outputs,
            _relay: relay,
        })
    }
}

#[async_trait]
impl NodeType for SendNode {
    fn type_name(&self) -> &'static str {
        "send"
    }

    fn id(&self) -> &str {
        &self.id
    }

    #[tracing::instrument(name = "send", skip_all, fields(node = %self.id, chat_id = ?message.chat_id()))]
    async fn on_input(&self, message: Message) -> Result<(), NodeError> {
        let chat_id = message.chat_id().ok_or(NodeError::MissingChat)?;
        let outbound = message
            .to_outbound(self.bot.platform())
            .ok_or(NodeError::MissingChat)?;

        // the handoff has to be stored before the user can possibly answer
        if self.track && self.outputs.is_wired(0) {
            if let Err(err) = handoff::set(&self.bot.chat(&chat_id), &self.id).await {
                warn!("could not track the conversation, sending anyway: {}", err);
            }
        }

        self.bot.send(outbound).await?;
        debug!("message sent");

        if self.pass_through {
            self.outputs.send(0, message);
        }
        Ok(())
    }
}
