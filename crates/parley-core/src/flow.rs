//! Flow graph model: typed nodes, branch-aware edges, load-time validation.
//!
//! A flow arrives as editor JSON (`{nodes, edges}`). Each node carries a type
//! tag and a loosely shaped `config` object; deserialization turns that pair
//! into a [`NodeConfig`] variant so malformed nodes are rejected when the flow
//! is loaded rather than deep inside a handler.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ParleyError, Result};

/// Node type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Begin,
    Interface,
    Generate,
    Categorize,
    Retrieval,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Begin => "begin",
            Self::Interface => "interface",
            Self::Generate => "generate",
            Self::Categorize => "categorize",
            Self::Retrieval => "retrieval",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared dependency on another node's named output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputRef {
    pub source_node_id: String,
    pub output_name: String,
    pub input_name: String,
}

impl InputRef {
    pub fn new(
        source_node_id: impl Into<String>,
        output_name: impl Into<String>,
        input_name: impl Into<String>,
    ) -> Self {
        Self {
            source_node_id: source_node_id.into(),
            output_name: output_name.into(),
            input_name: input_name.into(),
        }
    }
}

/// A variable declared by the Begin node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDecl {
    pub name: String,
    #[serde(default)]
    pub default: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginConfig {
    #[serde(default)]
    pub greeting: String,
    #[serde(default)]
    pub variables: Vec<VariableDecl>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceConfig {
    /// Overrides the engine-wide fallback text for this node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_message: Option<String>,
}

/// Per-node overrides merged onto the default model configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateConfig {
    pub prompt: String,
    #[serde(default = "default_generate_output")]
    pub output_variable: String,
    #[serde(flatten)]
    pub model: ModelOverrides,
}

fn default_generate_output() -> String {
    "generatedText".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub examples: Vec<String>,
    /// Explicit branch target; wins over edge branch selectors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_node: Option<String>,
}

impl Category {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            examples: vec![],
            target_node: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorizeConfig {
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_category: Option<String>,
    /// Variable holding the text to classify.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(flatten)]
    pub model: ModelOverrides,
}

/// How merged retrieval results are rendered into text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    #[default]
    Text,
    Json,
    Citations,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalConfig {
    #[serde(default)]
    pub knowledge_ids: Vec<String>,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default)]
    pub threshold: f32,
    #[serde(default)]
    pub output_mode: OutputMode,
    /// Variable holding the query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default = "default_documents_variable")]
    pub output_variable: String,
    #[serde(default = "default_context_variable")]
    pub context_variable: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            knowledge_ids: vec![],
            max_results: default_max_results(),
            threshold: 0.0,
            output_mode: OutputMode::default(),
            input: None,
            output_variable: default_documents_variable(),
            context_variable: default_context_variable(),
        }
    }
}

fn default_max_results() -> usize { 5 }
fn default_documents_variable() -> String { "documents".to_string() }
fn default_context_variable() -> String { "formattedDocuments".to_string() }

/// Type-specific node configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeConfig {
    Begin(BeginConfig),
    Interface(InterfaceConfig),
    Generate(GenerateConfig),
    Categorize(CategorizeConfig),
    Retrieval(RetrievalConfig),
}

impl NodeConfig {
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Begin(_) => NodeKind::Begin,
            Self::Interface(_) => NodeKind::Interface,
            Self::Generate(_) => NodeKind::Generate,
            Self::Categorize(_) => NodeKind::Categorize,
            Self::Retrieval(_) => NodeKind::Retrieval,
        }
    }
}

/// A typed processing step in a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNode", into = "RawNode")]
pub struct Node {
    pub id: String,
    pub label: Option<String>,
    pub inputs: Vec<InputRef>,
    pub config: NodeConfig,
}

/// Wire shape of a node as produced by the flow editor.
#[derive(Serialize, Deserialize)]
struct RawNode {
    id: String,
    #[serde(rename = "type")]
    kind: NodeKind,
    #[serde(default)]
    config: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    inputs: Vec<InputRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
}

impl TryFrom<RawNode> for Node {
    type Error = String;

    fn try_from(raw: RawNode) -> std::result::Result<Self, Self::Error> {
        let value = if raw.config.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            raw.config
        };
        let config = match raw.kind {
            NodeKind::Begin => serde_json::from_value(value).map(NodeConfig::Begin),
            NodeKind::Interface => serde_json::from_value(value).map(NodeConfig::Interface),
            NodeKind::Generate => serde_json::from_value(value).map(NodeConfig::Generate),
            NodeKind::Categorize => serde_json::from_value(value).map(NodeConfig::Categorize),
            NodeKind::Retrieval => serde_json::from_value(value).map(NodeConfig::Retrieval),
        }
        .map_err(|e| format!("node '{}' ({}): invalid config: {}", raw.id, raw.kind, e))?;

        Ok(Node {
            id: raw.id,
            label: raw.label,
            inputs: raw.inputs,
            config,
        })
    }
}

impl From<Node> for RawNode {
    fn from(node: Node) -> Self {
        let kind = node.kind();
        let config = match node.config {
            NodeConfig::Begin(c) => serde_json::to_value(c),
            NodeConfig::Interface(c) => serde_json::to_value(c),
            NodeConfig::Generate(c) => serde_json::to_value(c),
            NodeConfig::Categorize(c) => serde_json::to_value(c),
            NodeConfig::Retrieval(c) => serde_json::to_value(c),
        }
        .unwrap_or_default();
        RawNode {
            id: node.id,
            kind,
            config,
            inputs: node.inputs,
            label: node.label,
        }
    }
}

impl Node {
    pub fn new(id: impl Into<String>, config: NodeConfig) -> Self {
        Self {
            id: id.into(),
            label: None,
            inputs: vec![],
            config,
        }
    }

    pub fn begin(id: impl Into<String>, greeting: impl Into<String>) -> Self {
        Self::new(
            id,
            NodeConfig::Begin(BeginConfig {
                greeting: greeting.into(),
                variables: vec![],
            }),
        )
    }

    pub fn interface(id: impl Into<String>) -> Self {
        Self::new(id, NodeConfig::Interface(InterfaceConfig::default()))
    }

    pub fn generate(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(
            id,
            NodeConfig::Generate(GenerateConfig {
                prompt: prompt.into(),
                output_variable: default_generate_output(),
                model: ModelOverrides::default(),
            }),
        )
    }

    pub fn categorize(id: impl Into<String>, config: CategorizeConfig) -> Self {
        Self::new(id, NodeConfig::Categorize(config))
    }

    pub fn retrieval(id: impl Into<String>, config: RetrievalConfig) -> Self {
        Self::new(id, NodeConfig::Retrieval(config))
    }

    /// Set the declared input references.
    pub fn with_inputs(mut self, inputs: Vec<InputRef>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn kind(&self) -> NodeKind {
        self.config.kind()
    }
}

/// A directed connection between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_selector: Option<String>,
    /// Editor handle encoding, e.g. `out-positive`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
}

impl Edge {
    /// Create an unconditional edge.
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            branch_selector: None,
            source_handle: None,
        }
    }

    /// Create an edge taken only for the given branch selector.
    pub fn branch(
        source: impl Into<String>,
        target: impl Into<String>,
        selector: impl Into<String>,
    ) -> Self {
        Self {
            branch_selector: Some(selector.into()),
            ..Self::new(source, target)
        }
    }

    /// The branch selector, falling back to the `out-<selector>` handle encoding.
    pub fn selector(&self) -> Option<&str> {
        self.branch_selector.as_deref().or_else(|| {
            self.source_handle
                .as_deref()
                .and_then(|h| h.strip_prefix("out-"))
        })
    }
}

/// Immutable node/edge graph for one agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Flow {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    /// Parse editor JSON and validate the result.
    pub fn from_json(json: &str) -> Result<Self> {
        let flow: Flow =
            serde_json::from_str(json).map_err(|e| ParleyError::InvalidFlow(e.to_string()))?;
        flow.validate()?;
        Ok(flow)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn begin_node(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.kind() == NodeKind::Begin)
    }

    /// Outgoing edges of `source` in declared order.
    pub fn outgoing<'a>(&'a self, source: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source == source)
    }

    /// Structural checks run before any handler executes.
    ///
    /// Dangling edge targets are reported but tolerated; the driver fails the
    /// run when it actually tries to follow one.
    pub fn validate(&self) -> Result<()> {
        let begin_count = self
            .nodes
            .iter()
            .filter(|n| n.kind() == NodeKind::Begin)
            .count();
        match begin_count {
            0 => return Err(ParleyError::InvalidFlow("flow has no begin node".into())),
            1 => {}
            n => {
                return Err(ParleyError::InvalidFlow(format!(
                    "flow has {} begin nodes, expected exactly one",
                    n
                )))
            }
        }

        if !self.nodes.iter().any(|n| n.kind() == NodeKind::Interface) {
            return Err(ParleyError::InvalidFlow(
                "flow has no interface node".into(),
            ));
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(ParleyError::InvalidFlow(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
        }

        for edge in &self.edges {
            if !seen.contains(edge.target.as_str()) {
                warn!(source = %edge.source, target = %edge.target, "Edge targets unknown node");
            }
        }

        Ok(())
    }
}
