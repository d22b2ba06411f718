pub mod apps;
pub mod bot;
pub mod channel;
pub mod config;
pub mod context;
pub mod election;
pub mod error;
pub mod extension;
pub mod flow;
pub mod handoff;
pub mod logger;
pub mod message;
pub mod node;
pub mod registries;
pub mod relay;
pub mod state;
