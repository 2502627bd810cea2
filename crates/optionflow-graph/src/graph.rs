use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::edge::Edge;
use crate::node::Node;

/// A fully-typed pipeline graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Graph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub entry_node_id: String,
    pub return_node_id: String,
}

impl Graph {
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
}

/// A graph as authored, before structural validation.
///
/// Nodes and edges stay as JSON so the compiler can reject malformed entries
/// one by one instead of failing the whole definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawGraph {
    #[serde(default)]
    pub nodes: Vec<Value>,
    #[serde(default)]
    pub edges: Vec<Value>,
    #[serde(default)]
    pub entry_node_id: String,
    #[serde(default)]
    pub return_node_id: String,
}

impl From<&Graph> for RawGraph {
    fn from(graph: &Graph) -> Self {
        Self {
            nodes: graph
                .nodes
                .iter()
                .filter_map(|n| serde_json::to_value(n).ok())
                .collect(),
            edges: graph
                .edges
                .iter()
                .filter_map(|e| serde_json::to_value(e).ok())
                .collect(),
            entry_node_id: graph.entry_node_id.clone(),
            return_node_id: graph.return_node_id.clone(),
        }
    }
}
