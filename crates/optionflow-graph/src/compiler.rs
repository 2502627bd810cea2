//! Static validation of pipeline graphs.
//!
//! `compile_raw` runs every validation pass and collects all issues before
//! deciding; a plan is only produced when none were found.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::convert::{pipeline_ast_to_graph, PipelineAst};
use crate::definition::{DslPipeline, FunctionBody, FunctionDefinition};
use crate::edge::Edge;
use crate::graph::{Graph, RawGraph};
use crate::node::{Node, NodeKind, PortType};
use crate::steps::{OutputMapping, SourceStep, TransformStep};

/// A single validation failure, optionally pinned to a node or edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileIssue {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<String>,
}

impl CompileIssue {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            node_id: None,
            edge_id: None,
        }
    }

    pub fn at_node(message: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            node_id: Some(node_id.into()),
            ..Self::new(message)
        }
    }

    pub fn at_edge(message: impl Into<String>, edge_id: impl Into<String>) -> Self {
        Self {
            edge_id: Some(edge_id.into()),
            ..Self::new(message)
        }
    }
}

impl fmt::Display for CompileIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        match (&self.node_id, &self.edge_id) {
            (Some(node), _) => write!(f, " [node {}]", node),
            (None, Some(edge)) => write!(f, " [edge {}]", edge),
            (None, None) => Ok(()),
        }
    }
}

/// A validated graph, ready to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPlan {
    /// Topological order restricted to nodes reachable from the entry.
    pub execution_order: Vec<String>,
    pub nodes_by_id: HashMap<String, Node>,
    /// Upstream node ids per node.
    pub incoming_by_node_id: HashMap<String, Vec<String>>,
    /// Downstream node ids per node.
    pub outgoing_by_node_id: HashMap<String, Vec<String>>,
    pub entry_node_id: String,
    pub return_node_id: String,
    /// Some reachable node needs server-only capabilities.
    pub requires_remote: bool,
    /// Some reachable node reads the runtime row snapshot.
    pub uses_runtime_row: bool,
}

impl CompiledPlan {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes_by_id.get(id)
    }

    /// The single upstream node of `id`, if any.
    pub fn upstream_of(&self, id: &str) -> Option<&str> {
        self.incoming_by_node_id
            .get(id)
            .and_then(|ids| ids.first())
            .map(String::as_str)
    }
}

/// Compile any function definition. DSL definitions are converted to a graph first.
pub fn compile_definition(
    definition: &FunctionDefinition,
    known_connector_ids: &BTreeSet<String>,
) -> Result<CompiledPlan, Vec<CompileIssue>> {
    debug!(
        function_id = %definition.id,
        flavour = definition.flavour(),
        "Compiling function definition"
    );
    match &definition.body {
        FunctionBody::Graph { graph } => compile_raw(graph, known_connector_ids),
        FunctionBody::Dsl(dsl) => {
            let ast = parse_dsl(dsl)?;
            compile_graph(&pipeline_ast_to_graph(&ast), known_connector_ids)
        }
    }
}

/// Compile an already-typed graph.
pub fn compile_graph(
    graph: &Graph,
    known_connector_ids: &BTreeSet<String>,
) -> Result<CompiledPlan, Vec<CompileIssue>> {
    compile_parsed(
        graph.nodes.clone(),
        graph.edges.clone(),
        &graph.entry_node_id,
        &graph.return_node_id,
        known_connector_ids,
        Vec::new(),
    )
}

/// Compile a graph as authored. An empty `known_connector_ids` skips the
/// connector reference check.
pub fn compile_raw(
    raw: &RawGraph,
    known_connector_ids: &BTreeSet<String>,
) -> Result<CompiledPlan, Vec<CompileIssue>> {
    let mut issues = Vec::new();

    // Pass 1: structural parse, one entry at a time.
    let mut nodes = Vec::with_capacity(raw.nodes.len());
    for (index, value) in raw.nodes.iter().enumerate() {
        match serde_json::from_value::<Node>(value.clone()) {
            Ok(node) => nodes.push(node),
            Err(e) => {
                let message = format!("Node #{} is malformed: {}", index, e);
                issues.push(match value.get("id").and_then(Value::as_str) {
                    Some(id) => CompileIssue::at_node(message, id),
                    None => CompileIssue::new(message),
                });
            }
        }
    }
    let mut edges = Vec::with_capacity(raw.edges.len());
    for (index, value) in raw.edges.iter().enumerate() {
        match serde_json::from_value::<Edge>(value.clone()) {
            Ok(edge) => edges.push(edge),
            Err(e) => {
                let message = format!("Edge #{} is malformed: {}", index, e);
                issues.push(match value.get("id").and_then(Value::as_str) {
                    Some(id) => CompileIssue::at_edge(message, id),
                    None => CompileIssue::new(message),
                });
            }
        }
    }

    compile_parsed(
        nodes,
        edges,
        &raw.entry_node_id,
        &raw.return_node_id,
        known_connector_ids,
        issues,
    )
}

fn compile_parsed(
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    entry_node_id: &str,
    return_node_id: &str,
    known_connector_ids: &BTreeSet<String>,
    mut issues: Vec<CompileIssue>,
) -> Result<CompiledPlan, Vec<CompileIssue>> {
    // Pass 2: duplicate node ids. The first declaration wins.
    let mut order: Vec<String> = Vec::with_capacity(nodes.len());
    let mut nodes_by_id: HashMap<String, Node> = HashMap::with_capacity(nodes.len());
    for node in nodes {
        if nodes_by_id.contains_key(&node.id) {
            issues.push(CompileIssue::at_node(
                format!("Duplicate node id \"{}\"", node.id),
                node.id.clone(),
            ));
            continue;
        }
        order.push(node.id.clone());
        nodes_by_id.insert(node.id.clone(), node);
    }

    // Pass 3: dangling edges are reported and dropped from later passes.
    let mut valid_edges: Vec<Edge> = Vec::with_capacity(edges.len());
    for edge in edges {
        let mut dangling = false;
        for (end, id) in [("source", &edge.source), ("target", &edge.target)] {
            if !nodes_by_id.contains_key(id) {
                issues.push(CompileIssue::at_edge(
                    format!(
                        "Edge \"{}\" references missing {} node \"{}\"",
                        edge.id, end, id
                    ),
                    edge.id.clone(),
                ));
                dangling = true;
            }
        }
        if !dangling {
            valid_edges.push(edge);
        }
    }

    // Pass 4: entry / return.
    check_entry_and_return(&order, &nodes_by_id, entry_node_id, return_node_id, &mut issues);
    for id in &order {
        if let NodeKind::Output(mapping) = &nodes_by_id[id].kind {
            for key in mapping.reserved_extra_keys() {
                issues.push(CompileIssue::at_node(
                    format!("Output \"{}\" cannot map \"{}\" as an extra field", id, key),
                    id.clone(),
                ));
            }
        }
    }

    // Pass 5: connector references.
    if !known_connector_ids.is_empty() {
        for id in &order {
            if let NodeKind::Source(SourceStep::HttpGet(cfg)) = &nodes_by_id[id].kind {
                if !known_connector_ids.contains(&cfg.connector_id) {
                    issues.push(CompileIssue::at_node(
                        format!("Unknown connector \"{}\"", cfg.connector_id),
                        id.clone(),
                    ));
                }
            }
        }
    }

    let mut incoming: HashMap<String, Vec<String>> = HashMap::new();
    let mut outgoing: HashMap<String, Vec<String>> = HashMap::new();
    for edge in &valid_edges {
        incoming
            .entry(edge.target.clone())
            .or_default()
            .push(edge.source.clone());
        outgoing
            .entry(edge.source.clone())
            .or_default()
            .push(edge.target.clone());
    }

    // Pass 6: port types.
    check_ports(&order, &nodes_by_id, &valid_edges, &mut issues);

    // Pass 7: cycles (Kahn over the full node set).
    let topo = topological_order(&order, &valid_edges);
    if topo.len() < order.len() {
        let sorted: HashSet<&str> = topo.iter().map(String::as_str).collect();
        let stuck: Vec<&str> = order
            .iter()
            .map(String::as_str)
            .filter(|id| !sorted.contains(id))
            .collect();
        issues.push(CompileIssue::new(format!(
            "Graph contains a cycle involving nodes: {}",
            stuck.join(", ")
        )));
    }

    // Pass 8: the return node must be reachable from the entry.
    let reachable = reachable_from(entry_node_id, &outgoing);
    if nodes_by_id.contains_key(entry_node_id)
        && nodes_by_id.contains_key(return_node_id)
        && !reachable.contains(return_node_id)
    {
        issues.push(CompileIssue::at_node(
            format!(
                "Output node \"{}\" is unreachable from entry node \"{}\"",
                return_node_id, entry_node_id
            ),
            return_node_id,
        ));
    }

    if !issues.is_empty() {
        debug!(issue_count = issues.len(), "Graph compilation failed");
        return Err(issues);
    }

    let execution_order: Vec<String> = topo
        .into_iter()
        .filter(|id| reachable.contains(id.as_str()))
        .collect();
    let requires_remote = execution_order
        .iter()
        .any(|id| nodes_by_id[id].kind.requires_remote());
    let uses_runtime_row = execution_order
        .iter()
        .any(|id| nodes_by_id[id].kind.uses_runtime_row());

    debug!(
        nodes = execution_order.len(),
        requires_remote, uses_runtime_row, "Graph compiled"
    );

    Ok(CompiledPlan {
        execution_order,
        nodes_by_id,
        incoming_by_node_id: incoming,
        outgoing_by_node_id: outgoing,
        entry_node_id: entry_node_id.to_string(),
        return_node_id: return_node_id.to_string(),
        requires_remote,
        uses_runtime_row,
    })
}

fn check_entry_and_return(
    order: &[String],
    nodes_by_id: &HashMap<String, Node>,
    entry_node_id: &str,
    return_node_id: &str,
    issues: &mut Vec<CompileIssue>,
) {
    match nodes_by_id.get(entry_node_id) {
        Some(node) if node.kind == NodeKind::Start => {}
        Some(node) => issues.push(CompileIssue::at_node(
            format!(
                "Entry node \"{}\" must be control.start, found {}",
                entry_node_id,
                node.kind.name()
            ),
            entry_node_id,
        )),
        None => issues.push(CompileIssue::new(format!(
            "Entry node \"{}\" does not exist",
            entry_node_id
        ))),
    }

    match nodes_by_id.get(return_node_id) {
        Some(node) if matches!(node.kind, NodeKind::Output(_)) => {}
        Some(node) => issues.push(CompileIssue::at_node(
            format!(
                "Return node \"{}\" must be output.options, found {}",
                return_node_id,
                node.kind.name()
            ),
            return_node_id,
        )),
        None => issues.push(CompileIssue::new(format!(
            "Return node \"{}\" does not exist",
            return_node_id
        ))),
    }

    let starts = order
        .iter()
        .filter(|id| nodes_by_id[*id].kind == NodeKind::Start)
        .count();
    if starts > 1 {
        issues.push(CompileIssue::new(format!(
            "Graph must contain exactly one control.start node (found {})",
            starts
        )));
    }

    let outputs = order
        .iter()
        .filter(|id| matches!(nodes_by_id[*id].kind, NodeKind::Output(_)))
        .count();
    if outputs != 1 {
        issues.push(CompileIssue::new(format!(
            "Graph must contain exactly one output.options node (found {})",
            outputs
        )));
    }
}

fn check_ports(
    order: &[String],
    nodes_by_id: &HashMap<String, Node>,
    edges: &[Edge],
    issues: &mut Vec<CompileIssue>,
) {
    for id in order {
        let node = &nodes_by_id[id];
        let into: Vec<&Edge> = edges.iter().filter(|e| &e.target == id).collect();
        let expected = node.kind.input_port();

        if expected == PortType::None {
            for edge in into {
                issues.push(CompileIssue::at_edge(
                    format!(
                        "Node \"{}\" ({}) does not accept incoming connections",
                        id,
                        node.kind.name()
                    ),
                    edge.id.clone(),
                ));
            }
            continue;
        }

        match into.as_slice() {
            [] => issues.push(CompileIssue::at_node(
                format!(
                    "Node \"{}\" ({}) requires an incoming connection",
                    id,
                    node.kind.name()
                ),
                id.clone(),
            )),
            [edge] => {
                let upstream = &nodes_by_id[&edge.source];
                let produced = upstream.kind.output_port();
                if expected != PortType::Any && produced != expected {
                    issues.push(CompileIssue::at_edge(
                        format!(
                            "Type mismatch: {} \"{}\" outputs {} but {} \"{}\" expects {}",
                            upstream.kind.name(),
                            upstream.id,
                            produced,
                            node.kind.name(),
                            id,
                            expected
                        ),
                        edge.id.clone(),
                    ));
                }
            }
            _ => issues.push(CompileIssue::at_node(
                format!(
                    "Node \"{}\" ({}) accepts only one incoming connection in v1",
                    id,
                    node.kind.name()
                ),
                id.clone(),
            )),
        }
    }
}

/// Kahn's algorithm. Ties break by declaration order so plans are deterministic.
fn topological_order(order: &[String], edges: &[Edge]) -> Vec<String> {
    let mut indegree: HashMap<&str, usize> = order.iter().map(|id| (id.as_str(), 0)).collect();
    let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        *indegree.entry(edge.target.as_str()).or_default() += 1;
        successors
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
    }

    let mut queue: VecDeque<&str> = order
        .iter()
        .map(String::as_str)
        .filter(|id| indegree[id] == 0)
        .collect();
    let mut sorted = Vec::with_capacity(order.len());

    while let Some(id) = queue.pop_front() {
        sorted.push(id.to_string());
        for next in successors.get(id).into_iter().flatten() {
            if let Some(degree) = indegree.get_mut(next) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(next);
                }
            }
        }
    }
    sorted
}

fn reachable_from<'a>(
    entry: &'a str,
    outgoing: &'a HashMap<String, Vec<String>>,
) -> HashSet<&'a str> {
    let mut seen = HashSet::new();
    let mut stack = vec![entry];
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        if let Some(next) = outgoing.get(id) {
            stack.extend(next.iter().map(String::as_str));
        }
    }
    seen
}

fn parse_dsl(dsl: &DslPipeline) -> Result<PipelineAst, Vec<CompileIssue>> {
    let mut issues = Vec::new();

    let source = serde_json::from_value::<SourceStep>(dsl.source.clone())
        .map_err(|e| issues.push(CompileIssue::new(format!("DSL source is malformed: {}", e))))
        .ok();

    let mut steps = Vec::with_capacity(dsl.transforms.len());
    for (index, value) in dsl.transforms.iter().enumerate() {
        match serde_json::from_value::<TransformStep>(value.clone()) {
            Ok(step) => steps.push(step),
            Err(e) => issues.push(CompileIssue::new(format!(
                "DSL transform #{} is malformed: {}",
                index, e
            ))),
        }
    }

    let output = serde_json::from_value::<OutputMapping>(dsl.output.clone())
        .map_err(|e| issues.push(CompileIssue::new(format!("DSL output is malformed: {}", e))))
        .ok();

    match (source, output) {
        (Some(source), Some(output)) if issues.is_empty() => Ok(PipelineAst {
            source,
            steps,
            output,
        }),
        _ => Err(issues),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn known() -> BTreeSet<String> {
        BTreeSet::new()
    }

    fn raw(value: Value) -> RawGraph {
        serde_json::from_value(value).unwrap()
    }

    fn products_graph() -> RawGraph {
        raw(json!({
            "nodes": [
                {"id": "start", "kind": "control.start"},
                {"id": "src", "kind": "source.grid_rows", "config": {"gridId": "products"}},
                {"id": "flt", "kind": "transform.filter",
                 "config": {"conditions": [{"path": "price", "op": ">", "value": 10}]}},
                {"id": "out", "kind": "output.options", "config": {"label": "name", "value": "sku"}}
            ],
            "edges": [
                {"id": "e1", "source": "start", "target": "src"},
                {"id": "e2", "source": "src", "target": "flt"},
                {"id": "e3", "source": "flt", "target": "out"}
            ],
            "entryNodeId": "start",
            "returnNodeId": "out"
        }))
    }

    fn messages(issues: &[CompileIssue]) -> Vec<&str> {
        issues.iter().map(|i| i.message.as_str()).collect()
    }

    #[test]
    fn test_compile_linear_graph() {
        let plan = compile_raw(&products_graph(), &known()).unwrap();
        assert_eq!(plan.execution_order, vec!["start", "src", "flt", "out"]);
        assert_eq!(plan.upstream_of("flt"), Some("src"));
        assert_eq!(plan.upstream_of("start"), None);
        assert_eq!(plan.outgoing_by_node_id["src"], vec!["flt"]);
        assert!(!plan.requires_remote);
        assert!(!plan.uses_runtime_row);
    }

    #[test]
    fn test_cycle_detected() {
        let mut graph = products_graph();
        graph.nodes.push(json!({"id": "lim", "kind": "transform.limit", "config": {"count": 3}}));
        graph.nodes.push(json!({"id": "srt", "kind": "transform.sort", "config": {"path": "name"}}));
        graph.edges.push(json!({"id": "c1", "source": "lim", "target": "srt"}));
        graph.edges.push(json!({"id": "c2", "source": "srt", "target": "lim"}));

        let issues = compile_raw(&graph, &known()).unwrap_err();
        assert!(messages(&issues).iter().any(|m| m.contains("cycle")));
    }

    #[test]
    fn test_reachable_cycle_detected() {
        let graph = raw(json!({
            "nodes": [
                {"id": "start", "kind": "control.start"},
                {"id": "src", "kind": "source.grid_rows", "config": {"gridId": "t"}},
                {"id": "a", "kind": "transform.unique", "config": {"path": "x"}},
                {"id": "b", "kind": "transform.limit", "config": {"count": 1}},
                {"id": "out", "kind": "output.options", "config": {"label": "x", "value": "x"}}
            ],
            "edges": [
                {"id": "e1", "source": "start", "target": "src"},
                {"id": "e2", "source": "src", "target": "a"},
                {"id": "e3", "source": "a", "target": "b"},
                {"id": "e4", "source": "b", "target": "a"},
                {"id": "e5", "source": "b", "target": "out"}
            ],
            "entryNodeId": "start",
            "returnNodeId": "out"
        }));
        let issues = compile_raw(&graph, &known()).unwrap_err();
        let msgs = messages(&issues);
        assert!(msgs.iter().any(|m| m.contains("cycle")));
        assert!(msgs.iter().any(|m| m.contains("accepts only one incoming connection")));
    }

    #[test]
    fn test_unreachable_output() {
        let mut graph = products_graph();
        graph.edges.retain(|e| e["id"] != "e3");
        graph.edges.push(json!({"id": "e9", "source": "src", "target": "out"}));
        graph.edges.retain(|e| e["id"] != "e1");

        let issues = compile_raw(&graph, &known()).unwrap_err();
        let unreachable = issues
            .iter()
            .find(|i| i.message.contains("unreachable"))
            .expect("unreachable issue");
        assert_eq!(unreachable.node_id.as_deref(), Some("out"));
    }

    #[test]
    fn test_all_issues_collected() {
        let graph = raw(json!({
            "nodes": [
                {"id": "start", "kind": "control.start"},
                {"id": "start", "kind": "control.start"},
                {"id": "bad", "kind": "transform.nope"},
                {"id": "src", "kind": "source.http_get", "config": {"connectorId": "ghost"}},
                {"id": "out", "kind": "output.options", "config": {"label": "a", "value": "a"}}
            ],
            "edges": [
                {"id": "e1", "source": "start", "target": "src"},
                {"id": "e2", "source": "src", "target": "missing"},
                {"source": "src"}
            ],
            "entryNodeId": "start",
            "returnNodeId": "out"
        }));
        let connectors: BTreeSet<String> = ["real".to_string()].into_iter().collect();
        let issues = compile_raw(&graph, &connectors).unwrap_err();
        let msgs = messages(&issues);

        assert!(msgs.iter().any(|m| m.starts_with("Node #2 is malformed")));
        assert!(msgs.iter().any(|m| m.starts_with("Edge #2 is malformed")));
        assert!(msgs.iter().any(|m| m.contains("Duplicate node id \"start\"")));
        assert!(msgs.iter().any(|m| m.contains("missing target node \"missing\"")));
        assert!(msgs.iter().any(|m| m.contains("Unknown connector \"ghost\"")));
        assert!(msgs.iter().any(|m| m.contains("requires an incoming connection")));
        let dangling = issues
            .iter()
            .find(|i| i.message.contains("missing target"))
            .unwrap();
        assert_eq!(dangling.edge_id.as_deref(), Some("e2"));
    }

    #[test]
    fn test_entry_and_return_kinds() {
        let mut graph = products_graph();
        graph.entry_node_id = "src".into();
        graph.return_node_id = "flt".into();
        let issues = compile_raw(&graph, &known()).unwrap_err();
        let msgs = messages(&issues);
        assert!(msgs.iter().any(|m| m.contains("must be control.start")));
        assert!(msgs.iter().any(|m| m.contains("must be output.options")));
    }

    #[test]
    fn test_exactly_one_output() {
        let mut graph = products_graph();
        graph.nodes.push(json!({"id": "out2", "kind": "output.options",
            "config": {"label": "a", "value": "a"}}));
        graph.edges.push(json!({"id": "e4", "source": "flt", "target": "out2"}));
        let issues = compile_raw(&graph, &known()).unwrap_err();
        assert!(messages(&issues)
            .iter()
            .any(|m| m.contains("exactly one output.options node (found 2)")));
    }

    #[test]
    fn test_type_mismatch() {
        let graph = raw(json!({
            "nodes": [
                {"id": "start", "kind": "control.start"},
                {"id": "http", "kind": "source.http_get", "config": {"connectorId": "api"}},
                {"id": "flt", "kind": "transform.filter", "config": {}},
                {"id": "out", "kind": "output.options", "config": {"label": "a", "value": "a"}}
            ],
            "edges": [
                {"id": "e1", "source": "start", "target": "http"},
                {"id": "e2", "source": "http", "target": "flt"},
                {"id": "e3", "source": "flt", "target": "out"}
            ],
            "entryNodeId": "start",
            "returnNodeId": "out"
        }));
        let issues = compile_raw(&graph, &known()).unwrap_err();
        let mismatch = issues
            .iter()
            .find(|i| i.message.starts_with("Type mismatch"))
            .expect("type mismatch");
        assert_eq!(mismatch.edge_id.as_deref(), Some("e2"));
        assert!(mismatch.message.contains("outputs object"));
    }

    #[test]
    fn test_output_extra_cannot_shadow_option_fields() {
        let graph = raw(json!({
            "nodes": [
                {"id": "start", "kind": "control.start"},
                {"id": "src", "kind": "source.grid_rows", "config": {"gridId": "products"}},
                {"id": "out", "kind": "output.options", "config": {
                    "label": "name", "value": "sku",
                    "extra": {"id": "internal", "label": "alt", "color": "color"}
                }}
            ],
            "edges": [
                {"id": "e1", "source": "start", "target": "src"},
                {"id": "e2", "source": "src", "target": "out"}
            ],
            "entryNodeId": "start",
            "returnNodeId": "out"
        }));
        let issues = compile_raw(&graph, &known()).unwrap_err();
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|i| i.node_id.as_deref() == Some("out")));
        let msgs = messages(&issues);
        assert!(msgs.iter().any(|m| m.contains("cannot map \"id\"")));
        assert!(msgs.iter().any(|m| m.contains("cannot map \"label\"")));
    }

    #[test]
    fn test_any_input_accepts_payload() {
        let graph = raw(json!({
            "nodes": [
                {"id": "start", "kind": "control.start"},
                {"id": "http", "kind": "source.http_get", "config": {"connectorId": "api"}},
                {"id": "flat", "kind": "transform.flatten_path", "config": {"path": "data.items"}},
                {"id": "out", "kind": "output.options", "config": {"label": "a", "value": "a"}}
            ],
            "edges": [
                {"id": "e1", "source": "start", "target": "http"},
                {"id": "e2", "source": "http", "target": "flat"},
                {"id": "e3", "source": "flat", "target": "out"}
            ],
            "entryNodeId": "start",
            "returnNodeId": "out"
        }));
        let connectors: BTreeSet<String> = ["api".to_string()].into_iter().collect();
        let plan = compile_raw(&graph, &connectors).unwrap();
        assert!(plan.requires_remote);
    }

    #[test]
    fn test_side_branch_sets_runtime_flag() {
        let mut graph = products_graph();
        graph.nodes.push(json!({"id": "ctx", "kind": "source.current_context"}));
        graph.nodes.push(json!({"id": "flat", "kind": "transform.flatten_path",
            "config": {"path": ""}}));
        graph.edges.push(json!({"id": "x1", "source": "start", "target": "ctx"}));
        graph.edges.push(json!({"id": "x2", "source": "ctx", "target": "flat"}));
        let plan = compile_raw(&graph, &known()).unwrap();
        assert_eq!(plan.execution_order.len(), 6);
        assert!(plan.execution_order.contains(&"ctx".to_string()));
        assert!(plan.uses_runtime_row);
    }

    #[test]
    fn test_compile_dsl_definition() {
        let def: FunctionDefinition = serde_json::from_value(json!({
            "id": "fn",
            "type": "dsl_v1",
            "source": {"type": "grid_rows", "gridId": "products"},
            "transforms": [{"type": "sort", "path": "name"}, {"type": "limit", "count": 2}],
            "output": {"label": "name", "value": "sku"}
        }))
        .unwrap();
        let plan = compile_definition(&def, &known()).unwrap();
        assert_eq!(
            plan.execution_order,
            vec!["start_1", "source_1", "step_1", "step_2", "output_1"]
        );
    }

    #[test]
    fn test_compile_dsl_reports_each_bad_step() {
        let def: FunctionDefinition = serde_json::from_value(json!({
            "id": "fn",
            "type": "dsl_v1",
            "source": {"type": "nowhere"},
            "transforms": [{"type": "limit"}, {"type": "unique", "path": "x"}, {"type": "zap"}],
            "output": {"label": "name", "value": "sku"}
        }))
        .unwrap();
        let issues = compile_definition(&def, &known()).unwrap_err();
        let msgs = messages(&issues);
        assert_eq!(issues.len(), 3);
        assert!(msgs[0].starts_with("DSL source is malformed"));
        assert!(msgs[1].starts_with("DSL transform #0"));
        assert!(msgs[2].starts_with("DSL transform #2"));
    }

    #[test]
    fn test_issue_display() {
        assert_eq!(CompileIssue::at_node("boom", "n1").to_string(), "boom [node n1]");
        assert_eq!(CompileIssue::at_edge("bad", "e1").to_string(), "bad [edge e1]");
        assert_eq!(CompileIssue::new("plain").to_string(), "plain");
    }
}
