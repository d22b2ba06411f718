use thiserror::Error;

pub mod definition;
pub mod runtime;

pub use definition::{Flow, NodeConfig, NodeKind};
pub use runtime::{FlowRuntime, NodeFailure};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FlowError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("unsupported extension `{0}` (expected .json, .yaml or .yml)")]
    UnsupportedFormat(String),

    #[error("flow has no id")]
    MissingId,

    #[error("duplicate node id `{0}`")]
    DuplicateNode(String),

    #[error("duplicate bot id `{0}`")]
    DuplicateBot(String),

    #[error("node `{from}` is wired to unknown node `{to}`")]
    UnknownWireTarget { from: String, to: String },

    #[error("node `{node}` refers to unknown bot `{bot}`")]
    UnknownBot { node: String, bot: String },

    #[error("flow `{0}` is already deployed")]
    AlreadyDeployed(String),
}
