use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    bot::BotConfig,
    config::Environment,
    flow::FlowError,
    node::{
        DebugNode, Node, NodeContext, NodeError, Outputs, ReceiveNode, RequestNode, SendNode, bot_reference,
        debug::DebugConfig, receive::ReceiveConfig, request::RequestConfig, send::SendConfig,
    },
};

/// A flow file: the bots it talks through and the node graph.
///
/// Nodes are kept in file order; receivers claim mastership in that order.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Flow {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub bots: Vec<BotConfig>,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NodeConfig {
    pub id: String,
    #[serde(flatten)]
    pub kind: NodeKind,
    /// `wires[port]` lists the nodes fed by output `port`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub wires: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum NodeKind {
    Receive(ReceiveConfig),
    Send(SendConfig),
    Request(RequestConfig),
    Debug(DebugConfig),
}

impl NodeKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Receive(_) => "receive",
            NodeKind::Send(_) => "send",
            NodeKind::Request(_) => "request",
            NodeKind::Debug(_) => "debug",
        }
    }

    /// `(bot, bot_production)` for node kinds bound to a bot.
    pub fn bot_refs(&self) -> Option<(&Option<String>, &Option<String>)> {
        match self {
            NodeKind::Receive(cfg) => Some((&cfg.bot, &cfg.bot_production)),
            NodeKind::Send(cfg) => Some((&cfg.bot, &cfg.bot_production)),
            NodeKind::Request(_) | NodeKind::Debug(_) => None,
        }
    }

    pub fn build(&self, id: &str, ctx: &NodeContext<'_>, outputs: Outputs) -> Result<Node, NodeError> {
        let node: Node = match self {
            NodeKind::Receive(cfg) => Arc::new(ReceiveNode::build(id, cfg, ctx, outputs)?),
            NodeKind::Send(cfg) => Arc::new(SendNode::build(id, cfg, ctx, outputs)?),
            NodeKind::Request(cfg) => Arc::new(RequestNode::build(id, cfg, ctx, outputs)?),
            NodeKind::Debug(cfg) => Arc::new(DebugNode::build(id, cfg, ctx)),
        };
        Ok(node)
    }
}

impl Flow {
    /// Reads a `.json`, `.yaml` or `.yml` flow file and validates it.
    pub fn load(path: &Path) -> Result<Flow, FlowError> {
        let contents = fs::read_to_string(path).map_err(|e| FlowError::Io(format!("{}: {}", path.display(), e)))?;
        let ext = path
            .extension()
            .and_then(|os| os.to_str())
            .unwrap_or_default()
            .to_lowercase();
        let flow = match ext.as_str() {
            "json" => Self::from_json(&contents)?,
            "yaml" | "yml" => Self::from_yaml(&contents)?,
            other => return Err(FlowError::UnsupportedFormat(other.to_string())),
        };
        info!(flow = flow.id.as_str(), nodes = flow.nodes.len(), bots = flow.bots.len(), "flow loaded");
        Ok(flow)
    }

    pub fn from_json(contents: &str) -> Result<Flow, FlowError> {
        let flow: Flow = serde_json::from_str(contents).map_err(|e| FlowError::Parse(format!("JSON: {}", e)))?;
        flow.validate()?;
        Ok(flow)
    }

    pub fn from_yaml(contents: &str) -> Result<Flow, FlowError> {
        let flow: Flow = serde_yaml_bw::from_str(contents).map_err(|e| FlowError::Parse(format!("YAML: {}", e)))?;
        flow.validate()?;
        Ok(flow)
    }

    pub fn validate(&self) -> Result<(), FlowError> {
        if self.id.trim().is_empty() {
            return Err(FlowError::MissingId);
        }

        let mut bot_ids = HashSet::new();
        for bot in &self.bots {
            if !bot_ids.insert(bot.id.as_str()) {
                return Err(FlowError::DuplicateBot(bot.id.clone()));
            }
        }

        let mut node_ids = HashSet::new();
        for node in &self.nodes {
            if !node_ids.insert(node.id.as_str()) {
                return Err(FlowError::DuplicateNode(node.id.clone()));
            }
        }

        for node in &self.nodes {
            for target in node.wires.iter().flatten() {
                if !node_ids.contains(target.as_str()) {
                    return Err(FlowError::UnknownWireTarget {
                        from: node.id.clone(),
                        to: target.clone(),
                    });
                }
            }
            if let Some((bot, bot_production)) = node.kind.bot_refs() {
                for reference in [bot, bot_production].into_iter().flatten() {
                    if !reference.trim().is_empty() && !bot_ids.contains(reference.as_str()) {
                        return Err(FlowError::UnknownBot {
                            node: node.id.clone(),
                            bot: reference.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Whether any node needs `bot_id` in `environment`. A node without a
    /// reference uses the flow's only bot, if it has exactly one.
    pub fn is_bot_used(&self, bot_id: &str, environment: Environment) -> bool {
        let only_bot = self.bots.len() == 1;
        self.nodes.iter().any(|node| match node.kind.bot_refs() {
            Some((bot, bot_production)) => match bot_reference(environment, bot, bot_production) {
                Some(reference) => reference == bot_id,
                None => only_bot,
            },
            None => false,
        })
    }

    pub fn node(&self, id: &str) -> Option<&NodeConfig> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::request::RequestType;
    use tempfile::tempdir;

    const FLOW: &str = r#"
id: survey
title: Survey
bots:
  - id: tg
    platform: telegram
    botname: survey_bot
    store: memory
  - id: tg-prod
    platform: telegram
    botname: survey_prod_bot
nodes:
  - id: in
    type: receive
    bot: tg
    bot_production: tg-prod
    wires: [[ask]]
  - id: ask
    type: request
    message: "How old are you, {{firstName}}?"
    request_type: phone-number
    wires: [[out], [log]]
  - id: out
    type: send
    bot: tg
    track: true
  - id: log
    type: debug
"#;

    #[test]
    fn test_parse_yaml() {
        let flow = Flow::from_yaml(FLOW).unwrap();
        assert_eq!(flow.id, "survey");
        assert_eq!(flow.bots.len(), 2);
        let ids: Vec<&str> = flow.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["in", "ask", "out", "log"]);

        match &flow.node("ask").unwrap().kind {
            NodeKind::Request(cfg) => assert_eq!(cfg.request_type, RequestType::PhoneNumber),
            other => panic!("unexpected node {:?}", other),
        }
        match &flow.node("out").unwrap().kind {
            NodeKind::Send(cfg) => {
                assert!(cfg.track);
                assert!(!cfg.pass_through);
            }
            other => panic!("unexpected node {:?}", other),
        }
        assert_eq!(flow.node("ask").unwrap().wires, vec![vec!["out".to_string()], vec!["log".to_string()]]);
    }

    #[test]
    fn test_json_roundtrip_through_file() {
        let flow = Flow::from_yaml(FLOW).unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("survey.json");
        fs::write(&path, serde_json::to_string_pretty(&flow).unwrap()).unwrap();

        let loaded = Flow::load(&path).unwrap();
        assert_eq!(loaded.nodes.len(), 4);
        assert_eq!(loaded.node("in").unwrap().kind.type_name(), "receive");
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flow.txt");
        fs::write(&path, "id: x").unwrap();
        assert_eq!(Flow::load(&path).unwrap_err(), FlowError::UnsupportedFormat("txt".into()));
    }

    #[test]
    fn test_validation_errors() {
        let unknown_wire = r#"
id: f
nodes:
  - id: a
    type: debug
    wires: [[ghost]]
"#;
        assert_eq!(
            Flow::from_yaml(unknown_wire).unwrap_err(),
            FlowError::UnknownWireTarget {
                from: "a".into(),
                to: "ghost".into()
            }
        );

        let duplicate = r#"
id: f
nodes:
  - id: a
    type: debug
  - id: a
    type: debug
"#;
        assert_eq!(Flow::from_yaml(duplicate).unwrap_err(), FlowError::DuplicateNode("a".into()));

        let unknown_bot = r#"
id: f
nodes:
  - id: a
    type: receive
    bot: nope
"#;
        assert!(matches!(Flow::from_yaml(unknown_bot), Err(FlowError::UnknownBot { .. })));

        let no_id = r#"
id: ""
"#;
        assert_eq!(Flow::from_yaml(no_id).unwrap_err(), FlowError::MissingId);
    }

    #[test]
    fn test_bot_used_per_environment() {
        let flow = Flow::from_yaml(FLOW).unwrap();
        assert!(flow.is_bot_used("tg", Environment::Development));
        assert!(!flow.is_bot_used("tg-prod", Environment::Development));
        assert!(flow.is_bot_used("tg-prod", Environment::Production));
        // the send node has no production bot
        assert!(!flow.is_bot_used("tg", Environment::Production));
    }

    #[test]
    fn test_only_bot_is_implicit() {
        let flow = Flow::from_yaml(
            r#"
id: f
bots:
  - id: solo
    platform: console
    botname: solo
nodes:
  - id: in
    type: receive
"#,
        )
        .unwrap();
        assert!(flow.is_bot_used("solo", Environment::Development));
        assert!(flow.is_bot_used("solo", Environment::Production));
    }
}
