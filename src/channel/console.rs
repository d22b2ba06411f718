use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use channel_plugin::{
    message::ChannelMessage,
    plugin::{AdapterSink, ChannelAdapter, ChannelState, PluginError},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    task::JoinHandle,
};
use tracing::{debug, info};

/// Line-based adapter for running flows from a terminal.
///
/// Each stdin line `<chat_id> <text>` is one inbound message; outbound
/// messages are printed. Only one adapter per process should read stdin.
pub struct ConsoleAdapter {
    platform: String,
    read_stdin: bool,
    state: Arc<Mutex<ChannelState>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl ConsoleAdapter {
    pub fn new(platform: &str, read_stdin: bool) -> Self {
        Self {
            platform: platform.to_string(),
            read_stdin,
            state: Arc::new(Mutex::new(ChannelState::Stopped)),
            reader: Mutex::new(None),
        }
    }

    fn set_state(&self, state: ChannelState) {
        if let Ok(mut current) = self.state.lock() {
            *current = state;
        }
    }
}

/// Splits `<chat_id> <text>`; both parts must be non-empty.
pub fn parse_line(line: &str) -> Option<(&str, &str)> {
    let (chat_id, text) = line.trim().split_once(char::is_whitespace)?;
    let text = text.trim();
    if chat_id.is_empty() || text.is_empty() {
        return None;
    }
    Some((chat_id, text))
}

/// How an outbound message is shown on the terminal.
pub fn render_outbound(platform: &str, msg: &ChannelMessage) -> String {
    let text = msg.text().unwrap_or("<non-text message>");
    match msg.metadata.get("buttonLabel").and_then(|v| v.as_str()) {
        Some(label) => format!("[{} → {}] {} [{}]", platform, msg.chat_id, text, label),
        None => format!("[{} → {}] {}", platform, msg.chat_id, text),
    }
}

#[async_trait]
impl ChannelAdapter for ConsoleAdapter {
    fn name(&self) -> String {
        self.platform.clone()
    }

    fn state(&self) -> ChannelState {
        self.state.lock().map(|s| *s).unwrap_or_default()
    }

    async fn start(&self, sink: AdapterSink) -> Result<(), PluginError> {
        self.set_state(ChannelState::Starting);
        if self.read_stdin {
            let platform = self.platform.clone();
            let handle = tokio::spawn(async move {
                let mut lines = BufReader::new(tokio::io::stdin()).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let delivered = match parse_line(&line) {
                        Some((chat_id, text)) => sink.message(ChannelMessage::incoming_text(&platform, chat_id, text)),
                        None => sink.warning("expected `<chat_id> <text>`"),
                    };
                    if !delivered {
                        break;
                    }
                }
                debug!(platform = platform.as_str(), "stdin closed");
            });
            if let Ok(mut reader) = self.reader.lock() {
                *reader = Some(handle);
            }
            info!(platform = self.platform.as_str(), "reading `<chat_id> <text>` lines from stdin");
        }
        self.set_state(ChannelState::Running);
        Ok(())
    }

    async fn send(&self, msg: ChannelMessage) -> Result<(), PluginError> {
        let line = format!("{}\n", render_outbound(&self.platform, &msg));
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(line.as_bytes())
            .await
            .map_err(|e| PluginError::Platform(e.to_string()))?;
        stdout.flush().await.map_err(|e| PluginError::Platform(e.to_string()))
    }

    async fn stop(&self) -> Result<(), PluginError> {
        let reader = self.reader.lock().ok().and_then(|mut r| r.take());
        if let Some(reader) = reader {
            reader.abort();
        }
        self.set_state(ChannelState::Stopped);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use channel_plugin::message::MessageDirection;
    use serde_json::json;

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line("42 hello there"), Some(("42", "hello there")));
        assert_eq!(parse_line("  7\tyes  "), Some(("7", "yes")));
        assert_eq!(parse_line("42"), None);
        assert_eq!(parse_line("42   "), None);
    }

    #[test]
    fn test_render_outbound() {
        let mut msg = ChannelMessage::incoming_text("console", "100", "Share your location?");
        msg.direction = MessageDirection::Outgoing;
        assert_eq!(render_outbound("console", &msg), "[console → 100] Share your location?");

        msg.metadata.insert("buttonLabel".into(), json!("Send your position"));
        assert_eq!(
            render_outbound("console", &msg),
            "[console → 100] Share your location? [Send your position]"
        );
    }

    #[tokio::test]
    async fn test_lifecycle_without_stdin() {
        let adapter = ConsoleAdapter::new("console", false);
        assert_eq!(adapter.state(), ChannelState::Stopped);
        let (sink, _rx) = AdapterSink::new();
        adapter.start(sink).await.unwrap();
        assert_eq!(adapter.state(), ChannelState::Running);
        adapter.stop().await.unwrap();
        assert_eq!(adapter.state(), ChannelState::Stopped);
    }
}
