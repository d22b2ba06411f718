use std::sync::Arc;

use async_trait::async_trait;
use handlebars::Handlebars;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::{
    handoff,
    message::Message,
    node::{NodeContext, NodeError, NodeType, Outputs},
    relay::{RelaySubscription, node_topic},
};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RequestType {
    #[default]
    Message,
    Location,
    PhoneNumber,
}

impl RequestType {
    fn as_str(&self) -> &'static str {
        match self {
            RequestType::Message => "message",
            RequestType::Location => "location",
            RequestType::PhoneNumber => "phone-number",
        }
    }

    fn default_label(&self) -> Option<&'static str> {
        match self {
            RequestType::Message => None,
            RequestType::Location => Some("Send your position"),
            RequestType::PhoneNumber => Some("Send your phone number"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct RequestConfig {
    /// Handlebars template. Chat variables are in scope by name, the
    /// incoming payload as `payload`.
    pub message: String,
    #[serde(default)]
    pub request_type: RequestType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button_label: Option<String>,
}

/// Asks the user something and waits for the answer.
///
/// The question goes out on output 0, ready for a send node. When output 1
/// is wired, the chat's next reply is redirected there.
pub struct RequestNode {
    id: String,
    config: RequestConfig,
    templates: Handlebars<'static>,
    outputs: Outputs,
    _relay: RelaySubscription,
}

impl RequestNode {
    pub fn build(id: &str, config: &RequestConfig, ctx: &NodeContext<'_>, outputs: Outputs) -> Result<Self, NodeError> {
        let mut templates = Handlebars::new();
        templates.register_escape_fn(handlebars::no_escape);
        templates
            .register_template_string(id, &config.message)
            .map_err(|e| NodeError::Template(e.to_string()))?;

        let follow_up = outputs.clone();
        let relay = ctx
            .registries
            .bus
            .subscribe(&node_topic(&ctx.instance_id(id)), Arc::new(move |reply: Message| follow_up.send(1, reply)));
        Ok(Self {
            id: id.to_string(),
            config: config.clone(),
            templates,
            outputs,
            _relay: relay,
        })
    }

    async fn render(&self, message: &Message) -> Result<String, NodeError> {
        let mut data = Map::new();
        if let Some(chat) = message.chat() {
            for (key, value) in chat.all().await? {
                data.insert(key, value.to_json());
            }
        }
        data.insert("payload".to_string(), message.payload.clone());
        self.templates
            .render(&self.id, &Value::Object(data))
            .map_err(|e| NodeError::Template(e.to_string()))
    }
}

#[async_trait]
impl NodeType for RequestNode {
    fn type_name(&self) -> &'static str {
        "request"
    }

    fn id(&self) -> &str {
        &self.id
    }

    #[tracing::instrument(name = "request", skip_all, fields(node = %self.id, chat_id = ?message.chat_id()))]
    async fn on_input(&self, message: Message) -> Result<(), NodeError> {
        let chat_id = message.chat_id().ok_or(NodeError::MissingChat)?;
        let content = self.render(&message).await?;

        if self.outputs.is_wired(1) {
            match message.chat() {
                Some(chat) => {
                    if let Err(err) = handoff::set(chat, &self.id).await {
                        warn!("could not track the conversation, asking anyway: {}", err);
                    }
                }
                None => warn!("message has no chat context, the answer can't be routed back"),
            }
        }

        let label = self
            .config
            .button_label
            .as_deref()
            .filter(|l| !l.trim().is_empty())
            .or(self.config.request_type.default_label());
        let mut question = message.clone();
        question.payload = json!({
            "type": "message",
            "content": content,
            "chatId": chat_id,
            "messageId": message.message_id(),
            "requestType": self.config.request_type.as_str(),
            "buttonLabel": label,
        });
        debug!("question ready");
        self.outputs.send(0, question);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Environment,
        context::{ChatContext, ContextStore, InMemoryContextStore, test_util::FlakyStore},
        node::{DebugSink, Delivery},
        registries::Registries,
    };
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    fn build(
        registries: &Registries,
        config: RequestConfig,
        wires: Vec<Vec<String>>,
    ) -> (RequestNode, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let bots = HashMap::new();
        let debug = DebugSink::new();
        let ctx = NodeContext {
            flow_id: "f",
            registries,
            bots: &bots,
            environment: Environment::Development,
            debug: &debug,
        };
        let node = RequestNode::build("ask", &config, &ctx, Outputs::new("ask", wires, tx)).unwrap();
        (node, rx)
    }

    fn inbound(chat: &ChatContext) -> Message {
        Message::new(json!({"content": "hi", "chatId": chat.chat_id(), "messageId": "m1", "city": "Oslo"}))
            .with_chat(chat.clone())
    }

    #[tokio::test]
    async fn test_question_and_handoff() {
        let registries = Registries::new();
        let config = RequestConfig {
            message: "Hi {{name}}, still in {{payload.city}}? <ok>".into(),
            request_type: RequestType::Location,
            button_label: None,
        };
        let (node, mut rx) = build(&registries, config, vec![vec!["send".into()], vec!["answer".into()]]);

        let store: ContextStore = InMemoryContextStore::new(0);
        let chat = ChatContext::new(store, "100");
        chat.set("name", "Ada").await.unwrap();

        node.on_input(inbound(&chat)).await.unwrap();

        let delivery = rx.try_recv().unwrap();
        assert_eq!(delivery.target, "send");
        assert_eq!(
            delivery.message.payload,
            json!({
                "type": "message",
                "content": "Hi Ada, still in Oslo? <ok>",
                "chatId": "100",
                "messageId": "m1",
                "requestType": "location",
                "buttonLabel": "Send your position",
            })
        );
        assert_eq!(handoff::read_and_clear(&chat).await.unwrap(), Some("ask".to_string()));
    }

    #[tokio::test]
    async fn test_no_follow_up_no_handoff() {
        let registries = Registries::new();
        let config = RequestConfig {
            message: "Hello".into(),
            ..Default::default()
        };
        let (node, mut rx) = build(&registries, config, vec![vec!["send".into()]]);

        let store: ContextStore = InMemoryContextStore::new(0);
        let chat = ChatContext::new(store, "7");
        node.on_input(inbound(&chat)).await.unwrap();

        assert_eq!(rx.try_recv().unwrap().message.payload["buttonLabel"], Value::Null);
        assert_eq!(handoff::peek(&chat).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_question_goes_out_when_tracking_fails() {
        let registries = Registries::new();
        let config = RequestConfig {
            message: "Phone?".into(),
            request_type: RequestType::PhoneNumber,
            button_label: None,
        };
        let (node, mut rx) = build(&registries, config, vec![vec!["send".into()], vec!["answer".into()]]);

        let store = FlakyStore::new();
        store.fail_sets(true);
        let chat = ChatContext::new(store.clone(), "11");
        node.on_input(inbound(&chat)).await.unwrap();

        let question = rx.try_recv().unwrap();
        assert_eq!(question.target, "send");
        assert_eq!(question.message.payload["content"], "Phone?");
        assert_eq!(question.message.payload["buttonLabel"], "Send your phone number");
        assert_eq!(handoff::peek(&chat).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_relayed_reply_goes_to_follow_up() {
        let registries = Registries::new();
        let config = RequestConfig {
            message: "Age?".into(),
            ..Default::default()
        };
        let (_node, mut rx) = build(&registries, config, vec![vec!["send".into()], vec!["answer".into()]]);

        assert!(registries.bus.emit("node:f/ask", Message::new(json!({"content": "42"}))));
        assert_eq!(rx.try_recv().unwrap().target, "answer");
    }

    #[tokio::test]
    async fn test_bad_template_fails_build() {
        let registries = Registries::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let bots = HashMap::new();
        let debug = DebugSink::new();
        let ctx = NodeContext {
            flow_id: "f",
            registries: &registries,
            bots: &bots,
            environment: Environment::Development,
            debug: &debug,
        };
        let config = RequestConfig {
            message: "{{#if}".into(),
            ..Default::default()
        };
        let built = RequestNode::build("ask", &config, &ctx, Outputs::new("ask", vec![], tx));
        assert!(matches!(built, Err(NodeError::Template(_))));
        assert!(!registries.bus.is_subscribed("node:f/ask"));
    }
}
