//! Runs a compiled plan against a context.
//!
//! Nodes run one at a time in plan order; each sees only its single
//! upstream value. Step failures never abort the run: they add a warning
//! and the step yields an empty value.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tracing::{debug, warn};

use optionflow_core::condition::{Condition, Operator};
use optionflow_core::config::HttpConfig;
use optionflow_core::path::{
    as_number, get_path, get_row_path, last_segment, normalize_row, remove_row_path, stable_key,
    value_to_string,
};
use optionflow_core::traits::{AiExtractor, ExprEvaluator, HttpTransport, SecretResolver};
use optionflow_core::{
    AiExtractRequest, EngineConfig, OptionFlowError, OptionItem, ResultSource, Row, RuntimeState,
};
use optionflow_graph::steps::*;
use optionflow_graph::{CompiledPlan, Node, NodeKind};

use crate::context::{runtime_scope, ResolveContext};
use crate::http::{fetch_json, HttpGetEnv};
use crate::output::{map_rows_to_options, select};

/// What the caller lets a local run do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Permit server-only nodes (`source.http_get`, `ai.extract_options`) to run here.
    pub allow_http_get: bool,
}

/// Per-call inputs.
pub struct ExecutionInput<'a> {
    pub context: &'a ResolveContext,
    pub runtime: Option<&'a RuntimeState>,
    pub args: &'a Value,
    pub capabilities: Capabilities,
    pub secrets: Option<&'a dyn SecretResolver>,
    pub ai: Option<&'a dyn AiExtractor>,
}

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub options: Vec<OptionItem>,
    pub warnings: Vec<String>,
    /// The plan needs capabilities this run was not granted; nothing ran.
    pub requires_remote: bool,
    pub source: ResultSource,
}

/// Value produced by a node.
#[derive(Debug, Clone, PartialEq)]
enum NodeValue {
    /// A single object or raw payload.
    Payload(Value),
    Rows(Vec<Row>),
    Options(Vec<OptionItem>),
}

impl NodeValue {
    fn into_rows(self) -> Vec<Row> {
        match self {
            Self::Rows(rows) => rows,
            Self::Payload(Value::Null) => Vec::new(),
            Self::Payload(Value::Array(items)) => items.into_iter().map(normalize_row).collect(),
            Self::Payload(other) => vec![normalize_row(other)],
            Self::Options(_) => Vec::new(),
        }
    }

    fn into_value(self) -> Value {
        match self {
            Self::Payload(value) => value,
            Self::Rows(rows) => Value::Array(rows.into_iter().map(Value::Object).collect()),
            Self::Options(options) => serde_json::to_value(options).unwrap_or(Value::Null),
        }
    }
}

/// Shared per-run state handed to node handlers.
struct RunState<'a, 'b> {
    input: &'b ExecutionInput<'a>,
    scope: Value,
    warnings: Vec<String>,
}

impl RunState<'_, '_> {
    fn warn(&mut self, node_id: &str, message: String) {
        warn!(node_id, warning = %message, "Pipeline step warning");
        self.warnings.push(message);
    }
}

/// Executes compiled plans. Cheap to share; holds no per-call state.
pub struct Executor {
    transport: Arc<dyn HttpTransport>,
    expr: Option<Arc<dyn ExprEvaluator>>,
    http: HttpConfig,
    max_options: usize,
    ai_default_max_rows: usize,
}

impl Executor {
    pub fn new(config: &EngineConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            expr: None,
            http: config.http.clone(),
            max_options: config.output.max_options,
            ai_default_max_rows: config.ai.default_max_rows,
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_expr_evaluator(mut self, evaluator: Arc<dyn ExprEvaluator>) -> Self {
        self.expr = Some(evaluator);
        self
    }

    pub async fn execute(&self, plan: &CompiledPlan, input: &ExecutionInput<'_>) -> Execution {
        if plan.requires_remote && !input.capabilities.allow_http_get {
            debug!(entry = %plan.entry_node_id, "Plan needs remote capabilities, not running locally");
            return Execution {
                options: Vec::new(),
                warnings: Vec::new(),
                requires_remote: true,
                source: ResultSource::LocalCustom,
            };
        }

        let mut state = RunState {
            input,
            scope: runtime_scope(input.runtime),
            warnings: Vec::new(),
        };
        let mut values: HashMap<&str, NodeValue> = HashMap::with_capacity(plan.execution_order.len());

        for id in &plan.execution_order {
            let Some(node) = plan.node(id) else {
                continue;
            };
            // Single-consumer values are moved instead of cloned.
            let upstream = match plan.upstream_of(id) {
                Some(up) if plan.outgoing_by_node_id.get(up).map_or(0, Vec::len) <= 1 => {
                    values.remove(up)
                }
                Some(up) => values.get(up).cloned(),
                None => None,
            };

            let started = Instant::now();
            let value = self.run_node(node, upstream, &mut state).await;
            debug!(
                node_id = %node.id,
                kind = node.kind.name(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Node executed"
            );
            values.insert(id.as_str(), value);
        }

        let options = match values.remove(plan.return_node_id.as_str()) {
            Some(NodeValue::Options(options)) => options,
            _ => Vec::new(),
        };
        Execution {
            options,
            warnings: state.warnings,
            requires_remote: false,
            source: ResultSource::LocalCustom,
        }
    }

    async fn run_node(
        &self,
        node: &Node,
        upstream: Option<NodeValue>,
        state: &mut RunState<'_, '_>,
    ) -> NodeValue {
        let upstream = upstream.unwrap_or(NodeValue::Payload(Value::Null));
        match &node.kind {
            NodeKind::Start => NodeValue::Payload(Value::Object(Row::new())),
            NodeKind::Source(SourceStep::GridRows(cfg)) => {
                NodeValue::Rows(grid_rows(state.input.context, &cfg.grid_id))
            }
            NodeKind::Source(SourceStep::CurrentContext(cfg)) => {
                NodeValue::Payload(current_context(cfg, state.input))
            }
            NodeKind::Source(SourceStep::LayoutFields(cfg)) => {
                NodeValue::Rows(layout_fields(cfg, state.input.context))
            }
            NodeKind::Source(SourceStep::HttpGet(cfg)) => {
                NodeValue::Payload(self.http_get(&node.id, cfg, state).await)
            }
            NodeKind::Transform(TransformStep::Filter(cfg)) => {
                NodeValue::Rows(self.filter(&node.id, cfg, upstream.into_rows(), state))
            }
            NodeKind::Transform(TransformStep::MapFields(cfg)) => {
                NodeValue::Rows(map_fields(cfg, upstream.into_rows(), state))
            }
            NodeKind::Transform(TransformStep::Unique(cfg)) => {
                NodeValue::Rows(unique(&cfg.path, upstream.into_rows()))
            }
            NodeKind::Transform(TransformStep::Sort(cfg)) => {
                NodeValue::Rows(sort(cfg, upstream.into_rows()))
            }
            NodeKind::Transform(TransformStep::Limit(cfg)) => {
                let mut rows = upstream.into_rows();
                rows.truncate(cfg.count.max(0) as usize);
                NodeValue::Rows(rows)
            }
            NodeKind::Transform(TransformStep::FlattenPath(cfg)) => {
                NodeValue::Rows(flatten_path(&cfg.path, upstream))
            }
            NodeKind::Transform(TransformStep::AiExtractOptions(cfg)) => {
                NodeValue::Rows(self.ai_extract(&node.id, cfg, upstream, state).await)
            }
            NodeKind::Output(mapping) => {
                let (options, truncated) = map_rows_to_options(
                    upstream.into_rows(),
                    mapping,
                    state.input.args,
                    &state.scope,
                    self.max_options,
                );
                if truncated {
                    state.warn(
                        &node.id,
                        format!("Options truncated to {}", self.max_options),
                    );
                }
                NodeValue::Options(options)
            }
        }
    }

    async fn http_get(&self, node_id: &str, cfg: &HttpGetConfig, state: &mut RunState<'_, '_>) -> Value {
        let input = state.input;
        let Some(connector) = input.context.connector(&cfg.connector_id) else {
            let err = OptionFlowError::ConnectorNotFound(cfg.connector_id.clone());
            state.warn(node_id, err.to_string());
            return Value::Null;
        };

        let env = HttpGetEnv {
            transport: self.transport.as_ref(),
            secrets: input.secrets,
            config: &self.http,
            args: input.args,
            scope: &state.scope,
        };
        let started = Instant::now();
        let result = fetch_json(connector, cfg, &env).await;
        debug!(
            node_id,
            connector_id = %connector.id,
            ok = result.is_ok(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "HTTP source finished"
        );
        match result {
            Ok(payload) => payload,
            Err(e) => {
                state.warn(node_id, e.to_string());
                Value::Null
            }
        }
    }

    fn filter(
        &self,
        node_id: &str,
        cfg: &FilterConfig,
        rows: Vec<Row>,
        state: &mut RunState<'_, '_>,
    ) -> Vec<Row> {
        let args = state.input.args;

        if let Some(expr) = &cfg.expr {
            match &self.expr {
                Some(evaluator) => {
                    let scope = json!({ "args": args, "context": state.scope });
                    return rows
                        .into_iter()
                        .filter(|row| evaluator.evaluate(expr, row, &scope))
                        .collect();
                }
                None => state.warn(
                    node_id,
                    format!(
                        "Filter \"{}\" has an expression but no evaluator is configured; using conditions",
                        node_id
                    ),
                ),
            }
        }

        let mut unknown_ops: Vec<&str> = Vec::new();
        let conditions: Vec<Option<Condition>> = cfg
            .conditions
            .iter()
            .map(|predicate| {
                let Some(op) = Operator::parse(&predicate.op) else {
                    unknown_ops.push(predicate.op.as_str());
                    return None;
                };
                let expected = match predicate.value_from {
                    ValueFrom::Literal => predicate.value.clone(),
                    ValueFrom::Arg => lookup(args, &predicate.value),
                    ValueFrom::Context => lookup(&state.scope, &predicate.value),
                };
                Some(Condition::new(predicate.path.clone(), op, expected))
            })
            .collect();

        if !unknown_ops.is_empty() {
            let message = format!(
                "Filter \"{}\" uses unknown operator(s): {}",
                node_id,
                unknown_ops.join(", ")
            );
            state.warn(node_id, message);
        }

        rows.into_iter()
            .filter(|row| {
                cfg.mode.combine(
                    conditions
                        .iter()
                        .map(|c| c.as_ref().is_some_and(|c| c.matches(row))),
                )
            })
            .collect()
    }

    async fn ai_extract(
        &self,
        node_id: &str,
        cfg: &AiExtractConfig,
        upstream: NodeValue,
        state: &mut RunState<'_, '_>,
    ) -> Vec<Row> {
        let Some(extractor) = state.input.ai else {
            state.warn(
                node_id,
                format!("AI extractor not configured; \"{}\" produced no rows", node_id),
            );
            return Vec::new();
        };

        let value = upstream.into_value();
        let input = match &cfg.input_path {
            Some(path) => get_path(&value, path).cloned().unwrap_or(Value::Null),
            None => value,
        };
        let max_rows = cfg.max_rows.unwrap_or(self.ai_default_max_rows);
        let request = AiExtractRequest {
            prompt: cfg.prompt.clone(),
            input,
            max_rows,
        };

        match extractor.extract(request).await {
            Ok(mut rows) => {
                rows.truncate(max_rows);
                rows
            }
            Err(e) => {
                state.warn(node_id, e.to_string());
                Vec::new()
            }
        }
    }
}

// ── Step handlers ───────────────────────────────────────────────

fn lookup(root: &Value, key: &Value) -> Value {
    match key {
        Value::String(path) => get_path(root, path).cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn grid_rows(context: &ResolveContext, grid_id: &str) -> Vec<Row> {
    match context.grid_rows(grid_id) {
        Some(items) => items.iter().cloned().map(normalize_row).collect(),
        None => {
            debug!(grid_id, "No rows for grid");
            Vec::new()
        }
    }
}

fn current_context(cfg: &CurrentContextConfig, input: &ExecutionInput<'_>) -> Value {
    let runtime = input.runtime;
    let grid_id = runtime.and_then(|r| r.grid_id.as_deref());
    let field_id = runtime.and_then(|r| r.field_id.as_deref());

    let mut snapshot = Row::new();
    snapshot.insert("gridId".into(), json!(grid_id));
    snapshot.insert("fieldId".into(), json!(field_id));
    snapshot.insert("rowIndex".into(), json!(runtime.and_then(|r| r.row_index)));

    if cfg.include_row_values {
        let values = runtime.map(|r| r.row_values.clone()).unwrap_or_default();
        snapshot.insert("rowValues".into(), Value::Object(values));
    }
    if cfg.include_field_meta {
        let field = match (grid_id, field_id) {
            (Some(grid), Some(field)) => input.context.field(grid, field),
            _ => None,
        };
        snapshot.insert(
            "field".into(),
            field
                .and_then(|f| serde_json::to_value(f).ok())
                .unwrap_or(Value::Null),
        );
    }
    if cfg.include_layout_meta {
        let placement = input
            .context
            .layout
            .iter()
            .find(|l| Some(l.grid_id.as_str()) == grid_id && Some(l.field_id.as_str()) == field_id);
        snapshot.insert(
            "layout".into(),
            placement
                .and_then(|l| serde_json::to_value(l).ok())
                .unwrap_or(Value::Null),
        );
    }
    Value::Object(snapshot)
}

fn layout_fields(cfg: &LayoutFieldsConfig, context: &ResolveContext) -> Vec<Row> {
    // Without an explicit layout every declared field is its own placement.
    let placements: Vec<(&str, &str, Option<&str>, Option<bool>, Option<i64>)> =
        if context.layout.is_empty() {
            context
                .fields
                .iter()
                .map(|f| (f.grid_id.as_str(), f.id.as_str(), None, None, None))
                .collect()
        } else {
            context
                .layout
                .iter()
                .map(|l| {
                    (
                        l.grid_id.as_str(),
                        l.field_id.as_str(),
                        l.section_id.as_deref(),
                        l.hidden,
                        l.order,
                    )
                })
                .collect()
        };

    placements
        .into_iter()
        .filter(|(grid_id, ..)| cfg.grid_id.as_deref().map_or(true, |g| g == *grid_id))
        .filter_map(|(grid_id, field_id, section_id, hidden, order)| {
            let field = context.field(grid_id, field_id);
            let grid = context.grid(grid_id);
            let hidden = hidden.unwrap_or_else(|| field.is_some_and(|f| f.hidden));
            let section_id = section_id
                .or_else(|| field.and_then(|f| f.section_id.as_deref()))
                .or_else(|| grid.and_then(|g| g.section_id.as_deref()));
            let shared = context.is_shared_section(section_id);

            if (cfg.exclude_hidden && hidden) || (cfg.exclude_shared && shared) {
                return None;
            }

            let mut row = Row::new();
            row.insert("gridId".into(), json!(grid_id));
            row.insert(
                "gridName".into(),
                json!(grid.and_then(|g| g.name.as_deref()).unwrap_or(grid_id)),
            );
            row.insert("fieldId".into(), json!(field_id));
            row.insert(
                "fieldName".into(),
                json!(field.map_or(field_id, |f| f.display_name())),
            );
            row.insert(
                "fieldType".into(),
                json!(field.and_then(|f| f.field_type.as_deref())),
            );
            row.insert("sectionId".into(), json!(section_id));
            row.insert("hidden".into(), json!(hidden));
            row.insert("shared".into(), json!(shared));
            row.insert("order".into(), json!(order));
            Some(row)
        })
        .collect()
}

fn map_fields(cfg: &MapFieldsConfig, rows: Vec<Row>, state: &RunState<'_, '_>) -> Vec<Row> {
    rows.into_iter()
        .map(|row| {
            let mut mapped = if cfg.keep_existing {
                row.clone()
            } else {
                Row::new()
            };
            for (key, selector) in &cfg.fields {
                mapped.insert(key.clone(), select(selector, &row, state.input.args, &state.scope));
            }
            mapped
        })
        .collect()
}

fn unique(path: &str, rows: Vec<Row>) -> Vec<Row> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| {
            let key = stable_key(get_row_path(row, path).unwrap_or(&Value::Null));
            seen.insert(key)
        })
        .collect()
}

fn sort(cfg: &SortConfig, mut rows: Vec<Row>) -> Vec<Row> {
    let descending = cfg.direction == SortDirection::Desc;
    match cfg.sort_as {
        SortAs::String => {
            let key = |row: &Row| get_row_path(row, &cfg.path).map(value_to_string).unwrap_or_default();
            rows.sort_by(|a, b| {
                let ord = key(a).cmp(&key(b));
                if descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }
        SortAs::Number => {
            let key = |row: &Row| get_row_path(row, &cfg.path).and_then(as_number);
            // Non-numeric values sort last in either direction.
            rows.sort_by(|a, b| match (key(a), key(b)) {
                (Some(x), Some(y)) => {
                    let ord = x.partial_cmp(&y).unwrap_or(Ordering::Equal);
                    if descending {
                        ord.reverse()
                    } else {
                        ord
                    }
                }
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            });
        }
    }
    rows
}

fn flatten_path(path: &str, upstream: NodeValue) -> Vec<Row> {
    let rows = match upstream {
        NodeValue::Rows(rows) => rows,
        // Applied straight to a payload: pull the array out.
        other => {
            let payload = other.into_value();
            return match get_path(&payload, path) {
                Some(Value::Array(items)) => items.iter().cloned().map(normalize_row).collect(),
                Some(Value::Null) | None => Vec::new(),
                Some(other) => vec![normalize_row(other.clone())],
            };
        }
    };

    let leaf = last_segment(path);
    let mut out = Vec::new();
    for row in &rows {
        let Some(Value::Array(children)) = get_row_path(row, path) else {
            continue;
        };
        let mut parent = row.clone();
        remove_row_path(&mut parent, path);
        for child in children {
            let mut merged = parent.clone();
            match child {
                Value::Object(fields) => {
                    for (k, v) in fields {
                        merged.insert(k.clone(), v.clone());
                    }
                }
                other => {
                    merged.insert(leaf.to_string(), other.clone());
                }
            }
            out.push(merged);
        }
    }
    out
}
