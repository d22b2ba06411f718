use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;

use crate::{
    message::Message,
    node::{NodeContext, NodeError, NodeType},
};

#[derive(Debug, Clone)]
pub struct DebugRecord {
    pub node_id: String,
    pub name: Option<String>,
    pub message: Message,
}

/// Where debug nodes publish what reaches them. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DebugSink {
    tx: broadcast::Sender<DebugRecord>,
}

impl DebugSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DebugRecord> {
        self.tx.subscribe()
    }

    fn publish(&self, record: DebugRecord) {
        // nobody listening is fine
        let _ = self.tx.send(record);
    }
}

impl Default for DebugSink {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct DebugConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

pub struct DebugNode {
    id: String,
    name: Option<String>,
    sink: DebugSink,
}

impl DebugNode {
    pub fn build(id: &str, config: &DebugConfig, ctx: &NodeContext<'_>) -> Self {
        Self {
            id: id.to_string(),
            name: config.name.clone(),
            sink: ctx.debug.clone(),
        }
    }
}

#[async_trait]
impl NodeType for DebugNode {
    fn type_name(&self) -> &'static str {
        "debug"
    }

    fn id(&self) -> &str {
        &self.id
    }

    async fn on_input(&self, message: Message) -> Result<(), NodeError> {
        info!(
            node = self.id.as_str(),
            name = self.name.as_deref().unwrap_or_default(),
            chat_id = ?message.chat_id(),
            payload = %message.payload,
            "debug"
        );
        self.sink.publish(DebugRecord {
            node_id: self.id.clone(),
            name: self.name.clone(),
            message,
        });
        Ok(())
    }
}
