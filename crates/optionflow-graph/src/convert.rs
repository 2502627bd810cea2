//! Conversion between the graph form and the linear pipeline form.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::edge::Edge;
use crate::graph::Graph;
use crate::node::{Node, NodeKind};
use crate::steps::{OutputMapping, SourceStep, TransformStep};

/// Horizontal spacing between generated nodes.
const NODE_SPACING: f64 = 240.0;

/// A linear pipeline: one source, a chain of transforms, one output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineAst {
    pub source: SourceStep,
    #[serde(default)]
    pub steps: Vec<TransformStep>,
    pub output: OutputMapping,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvertError {
    #[error("Entry node \"{0}\" does not exist")]
    MissingEntry(String),

    #[error("Entry node must be control.start")]
    EntryNotStart,

    #[error("Pipeline must start with a source node")]
    MissingSource,

    #[error("Edge points at missing node \"{0}\"")]
    MissingNode(String),

    #[error("Branching not supported; pipeline must be linear")]
    Branching,

    #[error("Graph contains a cycle")]
    Cycle,

    #[error("Node \"{id}\" ({kind}) cannot appear mid-pipeline")]
    UnexpectedNode { id: String, kind: &'static str },

    #[error("Pipeline must end with output.options")]
    MissingOutput,
}

/// Walk a graph from its entry and flatten it into a pipeline.
///
/// The start node may fan out; the first outgoing edge is followed. Every
/// other node may have at most one outgoing edge.
pub fn graph_to_pipeline_ast(graph: &Graph) -> Result<PipelineAst, ConvertError> {
    let entry = graph
        .node(&graph.entry_node_id)
        .ok_or_else(|| ConvertError::MissingEntry(graph.entry_node_id.clone()))?;
    if entry.kind != NodeKind::Start {
        return Err(ConvertError::EntryNotStart);
    }

    let mut visited: HashSet<&str> = HashSet::new();
    visited.insert(entry.id.as_str());

    let first = graph
        .outgoing(&entry.id)
        .next()
        .ok_or(ConvertError::MissingSource)?;
    let source_node = lookup(graph, &first.target)?;
    let source = match &source_node.kind {
        NodeKind::Source(step) => step.clone(),
        _ => return Err(ConvertError::MissingSource),
    };
    visited.insert(source_node.id.as_str());

    let mut steps = Vec::new();
    let mut current = source_node;
    loop {
        let next_id = match single_outgoing(graph, &current.id)? {
            Some(edge) => &edge.target,
            None => return Err(ConvertError::MissingOutput),
        };
        if !visited.insert(next_id.as_str()) {
            return Err(ConvertError::Cycle);
        }
        let next = lookup(graph, next_id)?;
        match &next.kind {
            NodeKind::Transform(step) => steps.push(step.clone()),
            NodeKind::Output(mapping) => {
                if next.id != graph.return_node_id {
                    return Err(ConvertError::MissingOutput);
                }
                return Ok(PipelineAst {
                    source,
                    steps,
                    output: mapping.clone(),
                });
            }
            other => {
                return Err(ConvertError::UnexpectedNode {
                    id: next.id.clone(),
                    kind: other.name(),
                })
            }
        }
        current = next;
    }
}

/// Build a linear graph with stable ids: `start_1`, `source_1`, `step_N`,
/// `output_1`, joined by `edge_N`.
pub fn pipeline_ast_to_graph(ast: &PipelineAst) -> Graph {
    let mut nodes = Vec::with_capacity(ast.steps.len() + 3);
    nodes.push(Node::start("start_1"));
    nodes.push(Node::source("source_1", ast.source.clone()));
    for (i, step) in ast.steps.iter().enumerate() {
        nodes.push(Node::transform(format!("step_{}", i + 1), step.clone()));
    }
    nodes.push(Node::output("output_1", ast.output.clone()));

    let nodes: Vec<Node> = nodes
        .into_iter()
        .enumerate()
        .map(|(i, node)| node.at(i as f64 * NODE_SPACING, 0.0))
        .collect();

    let edges = nodes
        .windows(2)
        .enumerate()
        .map(|(i, pair)| Edge::new(format!("edge_{}", i + 1), &pair[0].id, &pair[1].id))
        .collect();

    Graph {
        nodes,
        edges,
        entry_node_id: "start_1".to_string(),
        return_node_id: "output_1".to_string(),
    }
}

fn lookup<'a>(graph: &'a Graph, id: &str) -> Result<&'a Node, ConvertError> {
    graph
        .node(id)
        .ok_or_else(|| ConvertError::MissingNode(id.to_string()))
}

fn single_outgoing<'a>(graph: &'a Graph, id: &'a str) -> Result<Option<&'a Edge>, ConvertError> {
    let mut outgoing = graph.outgoing(id);
    let first = outgoing.next();
    if outgoing.next().is_some() {
        return Err(ConvertError::Branching);
    }
    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::*;
    use serde_json::json;

    fn sample_ast() -> PipelineAst {
        serde_json::from_value(json!({
            "source": {"type": "grid_rows", "gridId": "products"},
            "steps": [
                {"type": "filter", "conditions": [{"path": "price", "op": ">", "value": 10}]},
                {"type": "sort", "path": "name", "direction": "desc"},
                {"type": "limit", "count": 5}
            ],
            "output": {"label": "name", "value": "sku"}
        }))
        .unwrap()
    }

    #[test]
    fn test_ast_to_graph_ids_and_positions() {
        let graph = pipeline_ast_to_graph(&sample_ast());
        let ids: Vec<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["start_1", "source_1", "step_1", "step_2", "step_3", "output_1"]
        );
        let xs: Vec<f64> = graph.nodes.iter().map(|n| n.position.x).collect();
        assert!(xs.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(graph.edges.len(), 5);
        assert_eq!(graph.edges[0], Edge::new("edge_1", "start_1", "source_1"));
        assert_eq!(graph.return_node_id, "output_1");
    }

    #[test]
    fn test_roundtrip_through_graph() {
        let ast = sample_ast();
        let graph = pipeline_ast_to_graph(&ast);
        assert_eq!(graph_to_pipeline_ast(&graph).unwrap(), ast);

        // And back again after a JSON trip, positions ignored.
        let json = serde_json::to_value(&graph).unwrap();
        let reparsed: Graph = serde_json::from_value(json).unwrap();
        assert_eq!(graph_to_pipeline_ast(&reparsed).unwrap(), ast);
    }

    #[test]
    fn test_generated_graph_compiles() {
        let graph = pipeline_ast_to_graph(&sample_ast());
        let plan = crate::compiler::compile_graph(&graph, &Default::default()).unwrap();
        assert_eq!(plan.execution_order.len(), 6);
    }

    #[test]
    fn test_branching_rejected() {
        let mut graph = pipeline_ast_to_graph(&sample_ast());
        graph.edges.push(Edge::new("extra", "step_1", "output_1"));
        assert_eq!(graph_to_pipeline_ast(&graph), Err(ConvertError::Branching));
        assert_eq!(
            ConvertError::Branching.to_string(),
            "Branching not supported; pipeline must be linear"
        );
    }

    #[test]
    fn test_start_may_fan_out() {
        let mut graph = pipeline_ast_to_graph(&sample_ast());
        graph.nodes.push(Node::source(
            "ctx",
            SourceStep::CurrentContext(CurrentContextConfig::default()),
        ));
        graph.edges.push(Edge::new("side", "start_1", "ctx"));
        assert_eq!(graph_to_pipeline_ast(&graph).unwrap(), sample_ast());
    }

    #[test]
    fn test_cycle_rejected() {
        let mut graph = pipeline_ast_to_graph(&sample_ast());
        graph.edges.retain(|e| e.id != "edge_5");
        graph.edges.push(Edge::new("back", "step_3", "step_1"));
        assert_eq!(graph_to_pipeline_ast(&graph), Err(ConvertError::Cycle));
    }

    #[test]
    fn test_dead_end_requires_output() {
        let mut graph = pipeline_ast_to_graph(&sample_ast());
        graph.edges.retain(|e| e.id != "edge_5");
        let err = graph_to_pipeline_ast(&graph).unwrap_err();
        assert_eq!(err.to_string(), "Pipeline must end with output.options");
    }

    #[test]
    fn test_first_node_must_be_source() {
        let mut graph = pipeline_ast_to_graph(&sample_ast());
        graph.edges[0] = Edge::new("edge_1", "start_1", "step_1");
        assert_eq!(graph_to_pipeline_ast(&graph), Err(ConvertError::MissingSource));
    }

    #[test]
    fn test_entry_must_be_start() {
        let mut graph = pipeline_ast_to_graph(&sample_ast());
        graph.entry_node_id = "source_1".into();
        assert_eq!(graph_to_pipeline_ast(&graph), Err(ConvertError::EntryNotStart));
    }

    #[test]
    fn test_mid_pipeline_source_rejected() {
        let ast = PipelineAst {
            source: SourceStep::GridRows(GridRowsConfig {
                grid_id: "a".into(),
            }),
            steps: vec![],
            output: OutputMapping {
                label: ValueSelector::path("name"),
                value: ValueSelector::path("id"),
                id: None,
                extra: vec![],
            },
        };
        let mut graph = pipeline_ast_to_graph(&ast);
        graph.nodes.push(Node::source(
            "src2",
            SourceStep::GridRows(GridRowsConfig {
                grid_id: "b".into(),
            }),
        ));
        graph.edges.retain(|e| e.id != "edge_2");
        graph.edges.push(Edge::new("x", "source_1", "src2"));
        graph.edges.push(Edge::new("y", "src2", "output_1"));
        let err = graph_to_pipeline_ast(&graph).unwrap_err();
        assert!(matches!(err, ConvertError::UnexpectedNode { ref id, .. } if id == "src2"));
    }
}
