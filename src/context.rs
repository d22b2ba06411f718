use std::fmt::{self, Debug};
use std::sync::Arc;

use async_trait::async_trait;

use crate::{error::ContextError, state::StateValue};

pub mod chat;
pub mod file;
pub mod memory;
pub mod providers;
#[cfg(test)]
pub(crate) mod test_util;

pub use chat::ChatContext;
pub use file::FileContextStore;
pub use memory::InMemoryContextStore;
pub use providers::{ContextProviders, ProviderFactory, ProviderParams};

pub type ContextStore = Arc<dyn ContextStoreType>;

/// Per-chat key/value storage behind every `ChatContext`.
///
/// Providers may be remote, so every operation is async. A chat that was
/// never written reads as "all keys absent"; none of these calls fail just
/// because the chat is unknown. Concurrent writers are last-writer-wins per key.
#[async_trait]
pub trait ContextStoreType: Send + Sync {
    fn name(&self) -> &'static str;

    /// Called once when the owning bot starts.
    async fn start(&self) -> Result<(), ContextError> {
        Ok(())
    }

    /// Called once when the owning bot stops.
    async fn stop(&self) -> Result<(), ContextError> {
        Ok(())
    }

    async fn get(&self, chat_id: &str, key: &str) -> Result<Option<StateValue>, ContextError>;

    /// Merges `entries` into the chat state, overwriting existing keys.
    async fn set(&self, chat_id: &str, entries: Vec<(String, StateValue)>) -> Result<(), ContextError>;

    async fn remove(&self, chat_id: &str, key: &str) -> Result<(), ContextError>;

    /// Removes `key` and returns what it held, as one atomic step.
    async fn take(&self, chat_id: &str, key: &str) -> Result<Option<StateValue>, ContextError>;

    async fn all(&self, chat_id: &str) -> Result<Vec<(String, StateValue)>, ContextError>;

    async fn clear(&self, chat_id: &str) -> Result<(), ContextError>;
}

impl Debug for dyn ContextStoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextStore")
            .field("impl", &self.name())
            .finish()
    }
}
