//! Graph model: nodes, edges, and schema descriptors.
//!
//! This is the shape handed over by a graph-authoring UI. It is pure data
//! and engines never mutate it. A node's `status` is the state it was
//! authored with; per-run state lives in `WorkflowExecution::node_states`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of processing node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Trigger,
    Processor,
    Decision,
    Integration,
    Terminal,
    Agent,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeType::Trigger => "trigger",
            NodeType::Processor => "processor",
            NodeType::Decision => "decision",
            NodeType::Integration => "integration",
            NodeType::Terminal => "terminal",
            NodeType::Agent => "agent",
        };
        f.write_str(s)
    }
}

/// Per-node execution state: pending -> running -> completed | failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

/// Declared shape of the data a node consumes or produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SchemaDescriptor {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            extra: Map::new(),
        }
    }
}

/// A node in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique identifier for this node.
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Human-readable label.
    #[serde(default)]
    pub label: String,
    /// Free-form, type-specific configuration.
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<SchemaDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<SchemaDescriptor>,
    /// Authored initial state. Runs track theirs in `node_states`.
    #[serde(default)]
    pub status: NodeStatus,
}

impl Node {
    /// Create a node with an empty config and a label equal to its id.
    pub fn new(id: impl Into<String>, node_type: NodeType) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            node_type,
            config: Map::new(),
            input_schema: None,
            output_schema: None,
            status: NodeStatus::Pending,
        }
    }

    /// Set the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set a single config entry.
    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// Declare the input schema type.
    pub fn with_input_schema(mut self, kind: impl Into<String>) -> Self {
        self.input_schema = Some(SchemaDescriptor::new(kind));
        self
    }

    /// Declare the output schema type.
    pub fn with_output_schema(mut self, kind: impl Into<String>) -> Self {
        self.output_schema = Some(SchemaDescriptor::new(kind));
        self
    }

    /// Label if set, otherwise the id.
    pub fn display_name(&self) -> &str {
        if self.label.is_empty() {
            &self.id
        } else {
            &self.label
        }
    }

    /// Read a string config entry.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }
}

/// Kind of connection between two nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeType {
    Data,
    #[default]
    Control,
    /// Followed only when the source node fails.
    Error,
    /// Agent-to-agent message dependency, used by the step scheduler.
    A2a,
}

/// Copy instruction applied to the context when an edge is taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataMapping {
    pub source_field: String,
    pub target_field: String,
}

/// An edge connecting two nodes in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    /// Source node id.
    pub source: String,
    /// Target node id.
    pub target: String,
    #[serde(rename = "type", default)]
    pub edge_type: EdgeType,
    /// Boolean expression with `${path}` placeholders; absent means always taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_mapping: Option<DataMapping>,
}

impl Edge {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        edge_type: EdgeType,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            edge_type,
            condition: None,
            data_mapping: None,
        }
    }

    /// Create a control edge with an id derived from its endpoints.
    pub fn control(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::derived(source.into(), target.into(), EdgeType::Control)
    }

    /// Create a data edge with an id derived from its endpoints.
    pub fn data(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::derived(source.into(), target.into(), EdgeType::Data)
    }

    /// Create an error-routing edge with an id derived from its endpoints.
    pub fn error(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::derived(source.into(), target.into(), EdgeType::Error)
    }

    /// Create an agent-to-agent edge with an id derived from its endpoints.
    pub fn a2a(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::derived(source.into(), target.into(), EdgeType::A2a)
    }

    fn derived(source: String, target: String, edge_type: EdgeType) -> Self {
        let id = format!("{}->{}", source, target);
        Self::new(id, source, target, edge_type)
    }

    /// Attach a condition expression.
    pub fn with_condition(mut self, expr: impl Into<String>) -> Self {
        self.condition = Some(expr.into());
        self
    }

    /// Attach a data mapping.
    pub fn with_mapping(
        mut self,
        source_field: impl Into<String>,
        target_field: impl Into<String>,
    ) -> Self {
        self.data_mapping = Some(DataMapping {
            source_field: source_field.into(),
            target_field: target_field.into(),
        });
        self
    }
}

/// A named graph, as registered with a workflow store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowGraph {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl WorkflowGraph {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self {
            nodes,
            edges,
            ..Default::default()
        }
    }

    /// Set the workflow id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Edges leaving `id`, in declaration order.
    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source == id)
    }

    /// Edges entering `id`, in declaration order.
    pub fn incoming<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.target == id)
    }

    pub fn nodes_of_type(&self, node_type: NodeType) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |n| n.node_type == node_type)
    }
}
