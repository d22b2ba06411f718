use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::message::ChannelMessage;

#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
pub enum ChannelState {
    Starting,
    Running,
    #[default]
    Stopped,
}

/// What an adapter reports back to the runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    /// A user wrote something.
    Message(ChannelMessage),
    /// The platform connection failed in a way the bot owner should see.
    Error(String),
    /// Something odd but recoverable happened.
    Warning(String),
}

/// Handed to an adapter on start; everything it pushes is processed
/// by the owning bot one event at a time, in order.
#[derive(Debug, Clone)]
pub struct AdapterSink {
    tx: UnboundedSender<AdapterEvent>,
}

impl AdapterSink {
    pub fn new() -> (Self, UnboundedReceiver<AdapterEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns false once the bot stopped listening.
    pub fn message(&self, msg: ChannelMessage) -> bool {
        self.tx.send(AdapterEvent::Message(msg)).is_ok()
    }

    pub fn error(&self, error: impl Into<String>) -> bool {
        self.tx.send(AdapterEvent::Error(error.into())).is_ok()
    }

    pub fn warning(&self, warning: impl Into<String>) -> bool {
        self.tx.send(AdapterEvent::Warning(warning.into())).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The one trait platform adapters implement.
///
/// Adapters only translate between a platform SDK and `ChannelMessage`;
/// payload formatting (keyboards, cards) stays on their side.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// The name of the adapter, used in logs.
    fn name(&self) -> String;

    /// What state are we in?
    fn state(&self) -> ChannelState;

    /// Start up underlying connections and begin pushing events into `sink`.
    async fn start(&self, sink: AdapterSink) -> Result<(), PluginError>;

    /// Deliver a message to the platform (bot → user).
    async fn send(&self, msg: ChannelMessage) -> Result<(), PluginError>;

    /// Stop taking new messages and release connections.
    async fn stop(&self) -> Result<(), PluginError>;
}

/// Errors that a ChannelAdapter implementation can return.
#[derive(Error, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub enum PluginError {
    /// Something went wrong sending or receiving JSON.
    #[error("JSON error: {0}")]
    Json(String),

    /// The adapter is not in a state where this operation is valid.
    #[error("invalid state for this operation")]
    InvalidState,

    /// A timeout occurred.
    #[error("operation timed out after {0} ms")]
    Timeout(u64),

    /// The platform rejected the request.
    #[error("platform error: {0}")]
    Platform(String),

    /// The adapter returned an unspecified failure.
    #[error("plugin error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for PluginError {
    fn from(err: serde_json::Error) -> PluginError {
        PluginError::Json(err.to_string())
    }
}

impl From<anyhow::Error> for PluginError {
    fn from(err: anyhow::Error) -> PluginError {
        PluginError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sink_forwards_events_in_order() {
        let (sink, mut rx) = AdapterSink::new();
        assert!(sink.message(ChannelMessage::incoming_text("mock", "1", "a")));
        assert!(sink.warning("careful"));
        assert!(sink.error("boom"));

        assert!(matches!(rx.recv().await, Some(AdapterEvent::Message(_))));
        assert_eq!(rx.recv().await, Some(AdapterEvent::Warning("careful".into())));
        assert_eq!(rx.recv().await, Some(AdapterEvent::Error("boom".into())));
    }

    #[tokio::test]
    async fn sink_reports_closed_receiver() {
        let (sink, rx) = AdapterSink::new();
        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.error("nobody listens"));
    }
}
