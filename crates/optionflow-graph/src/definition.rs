use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::graph::RawGraph;

/// A user-defined option function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(flatten)]
    pub body: FunctionBody,
}

fn default_version() -> u32 {
    1
}

impl FunctionDefinition {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    /// Per-definition TTL, if configured.
    pub fn ttl_seconds(&self) -> Option<u64> {
        self.cache.as_ref().and_then(|c| c.ttl_seconds)
    }

    pub fn flavour(&self) -> &'static str {
        match self.body {
            FunctionBody::Graph { .. } => "graph_v1",
            FunctionBody::Dsl(_) => "dsl_v1",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSettings {
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

/// The two authoring formats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FunctionBody {
    #[serde(rename = "graph_v1")]
    Graph { graph: RawGraph },
    #[serde(rename = "dsl_v1")]
    Dsl(DslPipeline),
}

/// Linear `source -> transforms[] -> output` definition, as authored.
///
/// Steps are parsed during compilation so each malformed one is reported
/// separately.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DslPipeline {
    #[serde(default)]
    pub source: Value,
    #[serde(default)]
    pub transforms: Vec<Value>,
    #[serde(default)]
    pub output: Value,
}
