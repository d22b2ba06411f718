use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::{
    message::ChannelMessage,
    plugin::{AdapterSink, ChannelAdapter, ChannelState, PluginError},
};

/// In-process adapter for tests: inbound messages are injected by hand,
/// outbound messages are recorded.
#[derive(Clone)]
pub struct MockAdapter {
    name: String,
    sink: Arc<Mutex<Option<AdapterSink>>>,
    outgoing: Arc<Mutex<Vec<ChannelMessage>>>,
    sent: Arc<Notify>,
    state: Arc<std::sync::Mutex<ChannelState>>,
    fail_sends: Arc<AtomicBool>,
}

impl MockAdapter {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            sink: Arc::new(Mutex::new(None)),
            outgoing: Arc::new(Mutex::new(vec![])),
            sent: Arc::new(Notify::new()),
            state: Arc::new(std::sync::Mutex::new(ChannelState::Stopped)),
            fail_sends: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Inject an incoming message. Returns false if the adapter is not started.
    pub async fn inject(&self, msg: ChannelMessage) -> bool {
        match self.sink.lock().await.as_ref() {
            Some(sink) => sink.message(msg),
            None => false,
        }
    }

    pub async fn inject_text(&self, chat_id: &str, text: &str) -> bool {
        self.inject(ChannelMessage::incoming_text(&self.name, chat_id, text)).await
    }

    pub async fn emit_error(&self, error: &str) -> bool {
        match self.sink.lock().await.as_ref() {
            Some(sink) => sink.error(error),
            None => false,
        }
    }

    pub async fn emit_warning(&self, warning: &str) -> bool {
        match self.sink.lock().await.as_ref() {
            Some(sink) => sink.warning(warning),
            None => false,
        }
    }

    /// Make every following `send` fail with a platform error.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub async fn sent_messages(&self) -> Vec<ChannelMessage> {
        self.outgoing.lock().await.clone()
    }

    /// Wait until at least `count` messages were sent, or the timeout expires.
    pub async fn wait_for_sent(&self, count: usize, timeout: Duration) -> Vec<ChannelMessage> {
        let _ = tokio::time::timeout(timeout, async {
            loop {
                let notified = self.sent.notified();
                if self.outgoing.lock().await.len() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await;
        self.sent_messages().await
    }
}

#[async_trait]
impl ChannelAdapter for MockAdapter {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn state(&self) -> ChannelState {
        *self.state.lock().unwrap()
    }

    async fn start(&self, sink: AdapterSink) -> Result<(), PluginError> {
        *self.sink.lock().await = Some(sink);
        *self.state.lock().unwrap() = ChannelState::Running;
        Ok(())
    }

    async fn send(&self, msg: ChannelMessage) -> Result<(), PluginError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(PluginError::Platform(format!("{} refused chat {}", self.name, msg.chat_id)));
        }
        self.outgoing.lock().await.push(msg);
        self.sent.notify_waiters();
        Ok(())
    }

    async fn stop(&self) -> Result<(), PluginError> {
        *self.sink.lock().await = None;
        *self.state.lock().unwrap() = ChannelState::Stopped;
        Ok(())
    }
}
