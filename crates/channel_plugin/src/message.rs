use std::collections::HashMap;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A message as seen by a platform adapter, before the runtime wraps it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
pub struct ChannelMessage {
    pub id: String,                       // Platform message id (or a UUID)
    pub chat_id: String,                  // Platform chat id, numbers rendered as strings
    pub direction: MessageDirection,      // Incoming or Outgoing
    pub timestamp: DateTime<Utc>,         // When it was sent or received
    pub channel: String,                  // telegram, alexa, console, ...
    pub from: Participant,                // Sender info
    pub content: Option<MessageContent>,  // What the user (or bot) said
    pub reply_to_id: Option<String>,      // If replying to another message
    pub metadata: HashMap<String, Value>, // Platform specific extras
}

impl ChannelMessage {
    /// Incoming text message for `chat_id`, the shape most adapters produce.
    pub fn incoming_text(channel: &str, chat_id: &str, text: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            direction: MessageDirection::Incoming,
            timestamp: Utc::now(),
            channel: channel.to_string(),
            from: Participant::new(chat_id.to_string(), None, None),
            content: Some(MessageContent::Text(text.to_string())),
            reply_to_id: None,
            metadata: HashMap::new(),
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.content {
            Some(MessageContent::Text(text)) => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
pub enum MessageDirection {
    #[default]
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
pub struct Participant {
    pub id: String,                   // Platform user id
    pub display_name: Option<String>, // "Jane Doe"
    pub username: Option<String>,     // Handle used for authorisation lists
}

impl Participant {
    pub fn new(id: String, display_name: Option<String>, username: Option<String>) -> Self {
        Self { id, display_name, username }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum MessageContent {
    Text(String),
    Location(Location),
    Contact(Contact),
    Event(Event),
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Contact {
    pub phone_number: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Event {
    pub event_type: String,
    pub event_payload: Option<Value>,
}
