use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::{fs, sync::Mutex};
use tracing::{debug, info};

use crate::{context::ContextStoreType, error::ContextError, state::StateValue};

/// Stores each chat as one JSON document under `dir`.
///
/// Read-modify-write cycles for a chat are serialised within the process;
/// two processes sharing a directory are last-writer-wins per document.
#[derive(Debug)]
pub struct FileContextStore {
    dir: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FileContextStore {
    pub fn new(dir: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            dir: dir.into(),
            locks: DashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock_for(&self, chat_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(chat_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn path_for(&self, chat_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_chat_id(chat_id)))
    }

    async fn read(&self, chat_id: &str) -> Result<HashMap<String, StateValue>, ContextError> {
        match fs::read_to_string(self.path_for(chat_id)).await {
            Ok(contents) if contents.trim().is_empty() => Ok(HashMap::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, chat_id: &str, state: &HashMap<String, StateValue>) -> Result<(), ContextError> {
        let path = self.path_for(chat_id);
        if state.is_empty() {
            return match fs::remove_file(&path).await {
                Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            };
        }
        // write to a sibling file first so readers never see half a document
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(state)?).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Runs one locked read-modify-write cycle for `chat_id`.
    async fn update<T>(
        &self,
        chat_id: &str,
        change: impl FnOnce(&mut HashMap<String, StateValue>) -> T,
    ) -> Result<T, ContextError> {
        let lock = self.lock_for(chat_id);
        let result: Result<T, ContextError> = async {
            let _guard = lock.lock().await;
            let mut state = self.read(chat_id).await?;
            let out = change(&mut state);
            self.write(chat_id, &state).await?;
            Ok(out)
        }
        .await;
        self.prune_lock(chat_id, lock);
        result
    }

    /// Reads the chat's document under its lock.
    async fn snapshot(&self, chat_id: &str) -> Result<HashMap<String, StateValue>, ContextError> {
        let lock = self.lock_for(chat_id);
        let result = {
            let _guard = lock.lock().await;
            self.read(chat_id).await
        };
        self.prune_lock(chat_id, lock);
        result
    }

    /// Drops the chat's lock once nobody else holds or waits on it.
    fn prune_lock(&self, chat_id: &str, lock: Arc<Mutex<()>>) {
        // the map's reference plus ours
        self.locks
            .remove_if(chat_id, |_, held| Arc::ptr_eq(held, &lock) && Arc::strong_count(held) == 2);
    }
}

/// Keeps file names portable: anything outside `[A-Za-z0-9_-]` becomes `%XX`.
fn encode_chat_id(chat_id: &str) -> String {
    let mut out = String::with_capacity(chat_id.len());
    for byte in chat_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

#[async_trait]
impl ContextStoreType for FileContextStore {
    fn name(&self) -> &'static str {
        "plain-file"
    }

    async fn start(&self) -> Result<(), ContextError> {
        fs::create_dir_all(&self.dir).await?;
        info!(dir = %self.dir.display(), "plain-file context store ready");
        Ok(())
    }

    async fn get(&self, chat_id: &str, key: &str) -> Result<Option<StateValue>, ContextError> {
        Ok(self.snapshot(chat_id).await?.remove(key))
    }

    async fn set(&self, chat_id: &str, entries: Vec<(String, StateValue)>) -> Result<(), ContextError> {
        self.update(chat_id, |state| state.extend(entries)).await
    }

    async fn remove(&self, chat_id: &str, key: &str) -> Result<(), ContextError> {
        self.update(chat_id, |state| {
            state.remove(key);
        })
        .await
    }

    async fn take(&self, chat_id: &str, key: &str) -> Result<Option<StateValue>, ContextError> {
        self.update(chat_id, |state| state.remove(key)).await
    }

    async fn all(&self, chat_id: &str) -> Result<Vec<(String, StateValue)>, ContextError> {
        Ok(self.snapshot(chat_id).await?.into_iter().collect())
    }

    async fn clear(&self, chat_id: &str) -> Result<(), ContextError> {
        debug!(chat_id, "clearing chat context file");
        self.update(chat_id, |state| state.clear()).await
    }
}
