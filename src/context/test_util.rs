use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;

use crate::{
    context::{ContextStoreType, InMemoryContextStore},
    error::ContextError,
    state::StateValue,
};

/// Memory store whose writes or removals can be made to fail.
#[derive(Debug)]
pub struct FlakyStore {
    inner: Arc<InMemoryContextStore>,
    fail_sets: AtomicBool,
    fail_removes: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryContextStore::new(0),
            fail_sets: AtomicBool::new(false),
            fail_removes: AtomicBool::new(false),
        })
    }

    pub fn fail_sets(&self, fail: bool) {
        self.fail_sets.store(fail, Ordering::SeqCst);
    }

    pub fn fail_removes(&self, fail: bool) {
        self.fail_removes.store(fail, Ordering::SeqCst);
    }

    fn refused(&self) -> ContextError {
        ContextError::Io("store refused the write".into())
    }
}

#[async_trait]
impl ContextStoreType for FlakyStore {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn get(&self, chat_id: &str, key: &str) -> Result<Option<StateValue>, ContextError> {
        self.inner.get(chat_id, key).await
    }

    async fn set(&self, chat_id: &str, entries: Vec<(String, StateValue)>) -> Result<(), ContextError> {
        if self.fail_sets.load(Ordering::SeqCst) {
            return Err(self.refused());
        }
        self.inner.set(chat_id, entries).await
    }

    async fn remove(&self, chat_id: &str, key: &str) -> Result<(), ContextError> {
        if self.fail_removes.load(Ordering::SeqCst) {
            return Err(self.refused());
        }
        self.inner.remove(chat_id, key).await
    }

    async fn take(&self, chat_id: &str, key: &str) -> Result<Option<StateValue>, ContextError> {
        self.inner.take(chat_id, key).await
    }

    async fn all(&self, chat_id: &str) -> Result<Vec<(String, StateValue)>, ContextError> {
        self.inner.all(chat_id).await
    }

    async fn clear(&self, chat_id: &str) -> Result<(), ContextError> {
        self.inner.clear(chat_id).await
    }
}
