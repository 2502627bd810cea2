use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::steps::*;

pub const KIND_START: &str = "control.start";
pub const KIND_GRID_ROWS: &str = "source.grid_rows";
pub const KIND_CURRENT_CONTEXT: &str = "source.current_context";
pub const KIND_LAYOUT_FIELDS: &str = "source.layout_fields";
pub const KIND_HTTP_GET: &str = "source.http_get";
pub const KIND_FILTER: &str = "transform.filter";
pub const KIND_MAP_FIELDS: &str = "transform.map_fields";
pub const KIND_UNIQUE: &str = "transform.unique";
pub const KIND_SORT: &str = "transform.sort";
pub const KIND_LIMIT: &str = "transform.limit";
pub const KIND_FLATTEN_PATH: &str = "transform.flatten_path";
pub const KIND_AI_EXTRACT: &str = "ai.extract_options";
pub const KIND_OUTPUT: &str = "output.options";

/// Static type of a node's input or output port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortType {
    None,
    Object,
    Rows,
    Options,
    Any,
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Object => write!(f, "object"),
            Self::Rows => write!(f, "rows"),
            Self::Options => write!(f, "options"),
            Self::Any => write!(f, "any"),
        }
    }
}

/// Canvas position; cosmetic only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
}

/// What a node does, with its typed config.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Start,
    Source(SourceStep),
    Transform(TransformStep),
    Output(OutputMapping),
}

impl NodeKind {
    /// The wire name, e.g. `"transform.filter"`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => KIND_START,
            Self::Source(SourceStep::GridRows(_)) => KIND_GRID_ROWS,
            Self::Source(SourceStep::CurrentContext(_)) => KIND_CURRENT_CONTEXT,
            Self::Source(SourceStep::LayoutFields(_)) => KIND_LAYOUT_FIELDS,
            Self::Source(SourceStep::HttpGet(_)) => KIND_HTTP_GET,
            Self::Transform(TransformStep::Filter(_)) => KIND_FILTER,
            Self::Transform(TransformStep::MapFields(_)) => KIND_MAP_FIELDS,
            Self::Transform(TransformStep::Unique(_)) => KIND_UNIQUE,
            Self::Transform(TransformStep::Sort(_)) => KIND_SORT,
            Self::Transform(TransformStep::Limit(_)) => KIND_LIMIT,
            Self::Transform(TransformStep::FlattenPath(_)) => KIND_FLATTEN_PATH,
            Self::Transform(TransformStep::AiExtractOptions(_)) => KIND_AI_EXTRACT,
            Self::Output(_) => KIND_OUTPUT,
        }
    }

    pub fn input_port(&self) -> PortType {
        match self {
            Self::Start => PortType::None,
            Self::Source(_) => PortType::Object,
            Self::Transform(TransformStep::FlattenPath(_) | TransformStep::AiExtractOptions(_)) => {
                PortType::Any
            }
            Self::Transform(_) => PortType::Rows,
            Self::Output(_) => PortType::Rows,
        }
    }

    pub fn output_port(&self) -> PortType {
        match self {
            Self::Start => PortType::Object,
            Self::Source(SourceStep::GridRows(_) | SourceStep::LayoutFields(_)) => PortType::Rows,
            Self::Source(SourceStep::CurrentContext(_) | SourceStep::HttpGet(_)) => PortType::Object,
            Self::Transform(_) => PortType::Rows,
            Self::Output(_) => PortType::Options,
        }
    }

    /// Nodes that usually need server-side capabilities.
    pub fn requires_remote(&self) -> bool {
        matches!(
            self,
            Self::Source(SourceStep::HttpGet(_))
                | Self::Transform(TransformStep::AiExtractOptions(_))
        )
    }

    pub fn uses_runtime_row(&self) -> bool {
        matches!(self, Self::Source(SourceStep::CurrentContext(_)))
    }

    fn config_value(&self) -> Value {
        let value = match self {
            Self::Start => return Value::Object(Default::default()),
            Self::Source(step) => serde_json::to_value(step),
            Self::Transform(step) => serde_json::to_value(step),
            Self::Output(mapping) => serde_json::to_value(mapping),
        };
        match value {
            // Steps serialise with their `type` tag; the node kind already says it.
            Ok(Value::Object(mut map)) => {
                if !matches!(self, Self::Output(_)) {
                    map.remove("type");
                }
                Value::Object(map)
            }
            _ => Value::Object(Default::default()),
        }
    }

    fn from_parts(kind: &str, config: Value) -> Result<Self, String> {
        fn parse<T: DeserializeOwned>(kind: &str, config: Value) -> Result<T, String> {
            serde_json::from_value(config)
                .map_err(|e| format!("invalid config for {}: {}", kind, e))
        }

        let node_kind = match kind {
            KIND_START => Self::Start,
            KIND_GRID_ROWS => Self::Source(SourceStep::GridRows(parse(kind, config)?)),
            KIND_CURRENT_CONTEXT => Self::Source(SourceStep::CurrentContext(parse(kind, config)?)),
            KIND_LAYOUT_FIELDS => Self::Source(SourceStep::LayoutFields(parse(kind, config)?)),
            KIND_HTTP_GET => Self::Source(SourceStep::HttpGet(parse(kind, config)?)),
            KIND_FILTER => Self::Transform(TransformStep::Filter(parse(kind, config)?)),
            KIND_MAP_FIELDS => Self::Transform(TransformStep::MapFields(parse(kind, config)?)),
            KIND_UNIQUE => Self::Transform(TransformStep::Unique(parse(kind, config)?)),
            KIND_SORT => Self::Transform(TransformStep::Sort(parse(kind, config)?)),
            KIND_LIMIT => Self::Transform(TransformStep::Limit(parse(kind, config)?)),
            KIND_FLATTEN_PATH => Self::Transform(TransformStep::FlattenPath(parse(kind, config)?)),
            KIND_AI_EXTRACT => {
                Self::Transform(TransformStep::AiExtractOptions(parse(kind, config)?))
            }
            KIND_OUTPUT => Self::Output(parse(kind, config)?),
            other => return Err(format!("unknown node kind \"{}\"", other)),
        };
        Ok(node_kind)
    }
}

/// A node in a pipeline graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNode", into = "RawNode")]
pub struct Node {
    pub id: String,
    pub position: Position,
    pub kind: NodeKind,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            position: Position::default(),
            kind,
        }
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = Position { x, y };
        self
    }

    pub fn start(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Start)
    }

    pub fn source(id: impl Into<String>, step: SourceStep) -> Self {
        Self::new(id, NodeKind::Source(step))
    }

    pub fn transform(id: impl Into<String>, step: TransformStep) -> Self {
        Self::new(id, NodeKind::Transform(step))
    }

    pub fn output(id: impl Into<String>, mapping: OutputMapping) -> Self {
        Self::new(id, NodeKind::Output(mapping))
    }
}

/// Wire form: `{ id, kind, position?, config? }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawNode {
    id: String,
    kind: String,
    #[serde(default)]
    position: Position,
    #[serde(default)]
    config: Value,
}

impl TryFrom<RawNode> for Node {
    type Error = String;

    fn try_from(raw: RawNode) -> Result<Self, Self::Error> {
        let config = match raw.config {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        let kind = NodeKind::from_parts(&raw.kind, config)?;
        Ok(Self {
            id: raw.id,
            position: raw.position,
            kind,
        })
    }
}

impl From<Node> for RawNode {
    fn from(node: Node) -> Self {
        Self {
            config: node.kind.config_value(),
            kind: node.kind.name().to_string(),
            id: node.id,
            position: node.position,
        }
    }
}
