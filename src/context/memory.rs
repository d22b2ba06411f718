use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use moka::future::Cache;
use tracing::debug;

use crate::{context::ContextStoreType, error::ContextError, state::StateValue};

type ChatState = Arc<DashMap<String, StateValue>>;

/// Keeps chat state in process memory.
///
/// With a non-zero `ttl_secs`, chats idle for longer are evicted; that is
/// store housekeeping, not a handoff expiry.
#[derive(Clone, Debug)]
pub struct InMemoryContextStore {
    chats: Cache<String, ChatState>, // chat_id → state
}

impl InMemoryContextStore {
    pub fn new(ttl_secs: u64) -> Arc<Self> {
        let mut builder = Cache::builder().eviction_listener(|key: Arc<String>, _value: ChatState, cause| {
            debug!(chat_id = %key, ?cause, "chat context evicted");
        });
        if ttl_secs > 0 {
            builder = builder.time_to_idle(Duration::from_secs(ttl_secs));
        }
        Arc::new(Self { chats: builder.build() })
    }

    /// Existing state for the chat, or a fresh empty one. Concurrent callers
    /// for the same chat always end up with the same map.
    async fn chat_state(&self, chat_id: &str) -> ChatState {
        self.chats
            .get_with(chat_id.to_string(), async { Arc::new(DashMap::new()) })
            .await
    }

    /// State for the chat if it was ever written. Reads never create entries.
    async fn existing(&self, chat_id: &str) -> Option<ChatState> {
        self.chats.get(chat_id).await
    }
}

#[async_trait]
impl ContextStoreType for InMemoryContextStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn stop(&self) -> Result<(), ContextError> {
        self.chats.invalidate_all();
        Ok(())
    }

    async fn get(&self, chat_id: &str, key: &str) -> Result<Option<StateValue>, ContextError> {
        Ok(self
            .existing(chat_id)
            .await
            .and_then(|state| state.get(key).map(|v| v.clone())))
    }

    async fn set(&self, chat_id: &str, entries: Vec<(String, StateValue)>) -> Result<(), ContextError> {
        let state = self.chat_state(chat_id).await;
        for (key, value) in entries {
            state.insert(key, value);
        }
        Ok(())
    }

    async fn remove(&self, chat_id: &str, key: &str) -> Result<(), ContextError> {
        if let Some(state) = self.existing(chat_id).await {
            state.remove(key);
        }
        Ok(())
    }

    async fn take(&self, chat_id: &str, key: &str) -> Result<Option<StateValue>, ContextError> {
        Ok(self
            .existing(chat_id)
            .await
            .and_then(|state| state.remove(key).map(|(_, v)| v)))
    }

    async fn all(&self, chat_id: &str) -> Result<Vec<(String, StateValue)>, ContextError> {
        Ok(match self.existing(chat_id).await {
            Some(state) => state
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
            None => vec![],
        })
    }

    async fn clear(&self, chat_id: &str) -> Result<(), ContextError> {
        self.chats.invalidate(chat_id).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_on_unknown_chat_is_empty() {
        let store = InMemoryContextStore::new(60);
        assert_eq!(store.get("abc123", "foo").await, Ok(None));
        assert!(store.all("abc123").await.unwrap().is_empty());
        assert_eq!(store.take("abc123", "foo").await, Ok(None));
        store.remove("abc123", "foo").await.unwrap();
        assert!(!store.chats.contains_key("abc123"));
    }

    #[tokio::test]
    async fn test_set_and_retrieve() {
        let store = InMemoryContextStore::new(60);
        store.set("abc123", vec![("foo".into(), "bar".into())]).await.unwrap();

        assert_eq!(store.get("abc123", "foo").await.unwrap(), Some(StateValue::from("bar")));
        assert_eq!(store.get("other", "foo").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_take_returns_value_once() {
        let store = InMemoryContextStore::new(0);
        store.set("1", vec![("k".into(), 3.0.into())]).await.unwrap();

        assert_eq!(store.take("1", "k").await.unwrap(), Some(StateValue::Number(3.0)));
        assert_eq!(store.take("1", "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_chat() {
        let store = InMemoryContextStore::new(60);
        store.set("session1", vec![("foo".into(), "bar".into())]).await.unwrap();
        store.set("session2", vec![("foo".into(), "baz".into())]).await.unwrap();

        store.clear("session1").await.unwrap();

        assert_eq!(store.get("session1", "foo").await.unwrap(), None);
        assert_eq!(store.get("session2", "foo").await.unwrap(), Some(StateValue::from("baz")));
    }

    #[tokio::test]
    async fn test_stop_drops_everything() {
        let store = InMemoryContextStore::new(0);
        store.set("a", vec![("x".into(), true.into())]).await.unwrap();
        store.stop().await.unwrap();
        assert_eq!(store.get("a", "x").await.unwrap(), None);
    }
}
