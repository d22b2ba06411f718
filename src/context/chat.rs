use std::collections::HashMap;

use crate::{
    context::ContextStore,
    error::ContextError,
    state::StateValue,
};

/// Facade over a `ContextStore` bound to one chat id.
///
/// Handles are cheap to clone and never copy state: every handle for the
/// same `(store, chat_id)` addresses the same stored map.
#[derive(Clone, Debug)]
pub struct ChatContext {
    chat_id: String,
    store: ContextStore,
}

impl ChatContext {
    pub fn new(store: ContextStore, chat_id: impl Into<String>) -> Self {
        Self { chat_id: chat_id.into(), store }
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn store(&self) -> &ContextStore {
        &self.store
    }

    pub async fn get(&self, key: &str) -> Result<Option<StateValue>, ContextError> {
        self.store.get(&self.chat_id, key).await
    }

    pub async fn set(&self, key: &str, value: impl Into<StateValue>) -> Result<(), ContextError> {
        self.store
            .set(&self.chat_id, vec![(key.to_string(), value.into())])
            .await
    }

    /// Writes several keys in one provider call.
    pub async fn set_many(&self, entries: Vec<(String, StateValue)>) -> Result<(), ContextError> {
        self.store.set(&self.chat_id, entries).await
    }

    pub async fn remove(&self, key: &str) -> Result<(), ContextError> {
        self.store.remove(&self.chat_id, key).await
    }

    pub async fn take(&self, key: &str) -> Result<Option<StateValue>, ContextError> {
        self.store.take(&self.chat_id, key).await
    }

    pub async fn all(&self) -> Result<HashMap<String, StateValue>, ContextError> {
        Ok(self.store.all(&self.chat_id).await?.into_iter().collect())
    }

    pub async fn clear(&self) -> Result<(), ContextError> {
        self.store.clear(&self.chat_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::InMemoryContextStore;

    #[tokio::test]
    async fn unknown_chat_reads_empty() {
        let store: ContextStore = InMemoryContextStore::new(0);
        let chat = ChatContext::new(store, "never-seen");
        assert_eq!(chat.get("anything").await, Ok(None));
        assert!(chat.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn handles_share_state() {
        let store: ContextStore = InMemoryContextStore::new(0);
        let first = ChatContext::new(store.clone(), "42");
        let second = ChatContext::new(store, "42");

        first.set("name", "Ada").await.unwrap();
        assert_eq!(second.get("name").await.unwrap(), Some(StateValue::from("Ada")));

        second.remove("name").await.unwrap();
        assert_eq!(first.get("name").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_many_merges() {
        let store: ContextStore = InMemoryContextStore::new(0);
        let chat = ChatContext::new(store, "7");
        chat.set("a", 1.0).await.unwrap();
        chat.set_many(vec![("b".into(), true.into()), ("a".into(), 2.0.into())])
            .await
            .unwrap();

        let all = chat.all().await.unwrap();
        assert_eq!(all.get("a"), Some(&StateValue::Number(2.0)));
        assert_eq!(all.get("b"), Some(&StateValue::Boolean(true)));
    }
}
