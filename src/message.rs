use chrono::Utc;
use channel_plugin::message::{ChannelMessage, MessageContent, MessageDirection, Participant};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::context::ChatContext;

/// What flows along wires and through the relay bus.
///
/// `payload` carries the content plus the routing hints `chatId` and
/// `messageId`. Messages built from an inbound platform message also carry
/// that message and a handle on the chat's context.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Message {
    pub id: String,
    pub payload: Value,
    pub original_message: Option<ChannelMessage>,
    #[serde(skip)]
    #[schemars(skip)]
    chat: Option<ChatContext>,
}

impl Message {
    pub fn new(payload: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            payload,
            original_message: None,
            chat: None,
        }
    }

    /// Wraps an inbound platform message, binding its chat context.
    pub fn from_channel(inbound: ChannelMessage, chat: ChatContext) -> Self {
        let content = match &inbound.content {
            Some(MessageContent::Text(text)) => Value::String(text.clone()),
            Some(MessageContent::Location(location)) => json!(location),
            Some(MessageContent::Contact(contact)) => json!(contact),
            Some(MessageContent::Event(event)) => json!(event),
            None => Value::Null,
        };
        let kind = match &inbound.content {
            Some(MessageContent::Text(_)) | None => "message",
            Some(MessageContent::Location(_)) => "location",
            Some(MessageContent::Contact(_)) => "contact",
            Some(MessageContent::Event(_)) => "event",
        };
        let payload = json!({
            "type": kind,
            "content": content,
            "chatId": chat.chat_id(),
            "messageId": inbound.id,
            "platform": inbound.channel,
            "username": inbound.from.username,
        });
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            payload,
            original_message: Some(inbound),
            chat: Some(chat),
        }
    }

    /// The context of the chat this message belongs to, when it came from a bot.
    pub fn chat(&self) -> Option<&ChatContext> {
        self.chat.as_ref()
    }

    pub fn set_chat(&mut self, chat: ChatContext) {
        self.chat = Some(chat);
    }

    pub fn with_chat(mut self, chat: ChatContext) -> Self {
        self.set_chat(chat);
        self
    }

    /// Chat id from the bound context, else from `payload.chatId`.
    pub fn chat_id(&self) -> Option<String> {
        if let Some(chat) = &self.chat {
            return Some(chat.chat_id().to_string());
        }
        hint(&self.payload, "chatId")
    }

    pub fn message_id(&self) -> Option<String> {
        hint(&self.payload, "messageId")
    }

    /// Replaces the payload, keeping the routing hints of the old one.
    pub fn set_payload(&mut self, payload: Value) {
        let chat_id = hint(&self.payload, "chatId");
        let message_id = hint(&self.payload, "messageId");
        self.payload = payload;
        if let Value::Object(map) = &mut self.payload {
            for (key, value) in [("chatId", chat_id), ("messageId", message_id)] {
                if let Some(value) = value {
                    map.entry(key).or_insert(Value::String(value));
                }
            }
        }
    }

    /// Platform message for the adapter. Routing hints become the chat and
    /// reply ids, the remaining payload fields travel as metadata.
    pub fn to_outbound(&self, platform: &str) -> Option<ChannelMessage> {
        let chat_id = self.chat_id()?;
        let text = match &self.payload {
            Value::String(text) => text.clone(),
            Value::Object(map) => match map.get("content") {
                Some(Value::String(text)) => text.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            },
            other => other.to_string(),
        };
        let metadata = match &self.payload {
            Value::Object(map) => extras(map),
            _ => Default::default(),
        };
        Some(ChannelMessage {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id: chat_id.clone(),
            direction: MessageDirection::Outgoing,
            timestamp: Utc::now(),
            channel: platform.to_string(),
            from: Participant::new(platform.to_string(), None, None),
            content: Some(MessageContent::Text(text)),
            reply_to_id: self.message_id(),
            metadata,
        })
    }
}

fn hint(payload: &Value, key: &str) -> Option<String> {
    match payload.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn extras(map: &Map<String, Value>) -> std::collections::HashMap<String, Value> {
    map.iter()
        .filter(|(key, _)| !matches!(key.as_str(), "content" | "chatId" | "messageId"))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
