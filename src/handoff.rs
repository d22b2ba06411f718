//! Records which node is waiting for a chat's next reply.
//!
//! A chat is either idle (no record) or awaiting a reply for one node. The
//! record lives in the chat context under two reserved keys so that any
//! provider can hold it and any receiver bound to the same store can read it.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::{context::ChatContext, error::ContextError, state::StateValue};

pub const CURRENT_CONVERSATION_NODE: &str = "currentConversationNode";
pub const CURRENT_CONVERSATION_NODE_AT: &str = "currentConversationNode_at";

#[derive(Debug, Clone, PartialEq)]
pub struct Handoff {
    pub node_id: String,
    /// `None` when the timestamp is missing or unreadable.
    pub at: Option<DateTime<Utc>>,
}

/// Marks `node_id` as the target of the chat's next reply, overwriting any
/// pending record. Both keys go to the provider in one `set` call.
pub async fn set(chat: &ChatContext, node_id: &str) -> Result<(), ContextError> {
    debug!(chat_id = chat.chat_id(), node = node_id, "awaiting reply");
    chat.set_many(vec![
        (CURRENT_CONVERSATION_NODE.to_string(), StateValue::from(node_id)),
        (
            CURRENT_CONVERSATION_NODE_AT.to_string(),
            StateValue::String(Utc::now().to_rfc3339()),
        ),
    ])
    .await
}

/// Reads the pending record without clearing it.
pub async fn peek(chat: &ChatContext) -> Result<Option<Handoff>, ContextError> {
    let Some(node_id) = node_id(chat.get(CURRENT_CONVERSATION_NODE).await?) else {
        return Ok(None);
    };
    let at = chat
        .get(CURRENT_CONVERSATION_NODE_AT)
        .await?
        .as_ref()
        .and_then(StateValue::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));
    Ok(Some(Handoff { node_id, at }))
}

/// Takes the pending node id, returning it at most once.
///
/// The node key is removed with the provider's atomic `take`, so two callers
/// racing on the same chat can never both see it. The timestamp goes with it;
/// once the node is taken, failing to drop the timestamp only logs.
pub async fn read_and_clear(chat: &ChatContext) -> Result<Option<String>, ContextError> {
    let taken = chat.take(CURRENT_CONVERSATION_NODE).await?;
    if taken.is_none() {
        return Ok(None);
    }
    if let Err(err) = chat.remove(CURRENT_CONVERSATION_NODE_AT).await {
        warn!(chat_id = chat.chat_id(), "stale handoff timestamp left behind: {}", err);
    }
    Ok(node_id(taken))
}

fn node_id(value: Option<StateValue>) -> Option<String> {
    match value {
        Some(StateValue::String(id)) if !id.is_empty() => Some(id),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextStore, InMemoryContextStore, test_util::FlakyStore};

    fn chat(id: &str) -> ChatContext {
        let store: ContextStore = InMemoryContextStore::new(0);
        ChatContext::new(store, id)
    }

    #[tokio::test]
    async fn test_read_and_clear_returns_node_once() {
        let chat = chat("42");
        set(&chat, "A").await.unwrap();

        assert_eq!(read_and_clear(&chat).await.unwrap(), Some("A".to_string()));
        assert_eq!(read_and_clear(&chat).await.unwrap(), None);
        assert_eq!(chat.get(CURRENT_CONVERSATION_NODE_AT).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_idle_chat_has_no_handoff() {
        let chat = chat("7");
        assert_eq!(peek(&chat).await.unwrap(), None);
        assert_eq!(read_and_clear(&chat).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_last_writer_wins() {
        let chat = chat("1");
        set(&chat, "first").await.unwrap();
        set(&chat, "second").await.unwrap();

        let pending = peek(&chat).await.unwrap().unwrap();
        assert_eq!(pending.node_id, "second");
        assert!(pending.at.is_some());
        assert_eq!(read_and_clear(&chat).await.unwrap(), Some("second".to_string()));
    }

    #[tokio::test]
    async fn test_peek_does_not_clear() {
        let chat = chat("3");
        set(&chat, "B").await.unwrap();
        assert!(peek(&chat).await.unwrap().is_some());
        assert!(peek(&chat).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_non_string_node_reads_as_idle() {
        let chat = chat("5");
        chat.set(CURRENT_CONVERSATION_NODE, 12.0).await.unwrap();
        assert_eq!(peek(&chat).await.unwrap(), None);
        assert_eq!(read_and_clear(&chat).await.unwrap(), None);
        // taken either way
        assert_eq!(chat.get(CURRENT_CONVERSATION_NODE).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_timestamp_cleanup_failure_keeps_node() {
        let store = FlakyStore::new();
        let chat = ChatContext::new(store.clone(), "42");
        set(&chat, "A").await.unwrap();
        store.fail_removes(true);

        assert_eq!(read_and_clear(&chat).await.unwrap(), Some("A".to_string()));
        assert_eq!(read_and_clear(&chat).await.unwrap(), None);
    }
}
