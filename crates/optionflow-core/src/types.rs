use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A loosely-typed record flowing between pipeline nodes.
///
/// Keys keep their insertion order so mapped rows come out the way the
/// author declared them.
pub type Row = serde_json::Map<String, Value>;

/// Reserved section id whose fields are shared across grids.
pub const SHARED_SECTION_ID: &str = "shared";

/// A single resolved option shown by a selectable form field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionItem {
    pub label: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub extra: Row,
}

/// Where a resolved result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    Builtin,
    LocalCustom,
    RemoteCustom,
    Unknown,
}

impl std::fmt::Display for ResultSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Builtin => write!(f, "builtin"),
            Self::LocalCustom => write!(f, "local_custom"),
            Self::RemoteCustom => write!(f, "remote_custom"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Metadata attached to every resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveMeta {
    pub from_cache: bool,
    pub fetched_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub source: ResultSource,
    /// Set by a resolver that could not finish without server-only capabilities.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub requires_remote: bool,
}

/// The answer to "what options do I show?".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveResult {
    pub options: Vec<OptionItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub meta: ResolveMeta,
}

impl ResolveResult {
    /// An empty result carrying a single warning.
    pub fn warning(source: ResultSource, message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            options: vec![],
            warnings: vec![message.into()],
            meta: ResolveMeta {
                from_cache: false,
                fetched_at: Utc::now(),
                expires_at: None,
                duration_ms,
                source,
                requires_remote: false,
            },
        }
    }
}

// ── Context collaborators ───────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridMeta {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub section_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMeta {
    pub id: String,
    pub grid_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub field_type: Option<String>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub section_id: Option<String>,
}

impl FieldMeta {
    /// Display name: label, then name, then id.
    pub fn display_name(&self) -> &str {
        self.label
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or(&self.id)
    }
}

/// A (grid, field) placement in the form layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutNode {
    pub grid_id: String,
    pub field_id: String,
    #[serde(default)]
    pub section_id: Option<String>,
    #[serde(default)]
    pub hidden: Option<bool>,
    #[serde(default)]
    pub order: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionMeta {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub shared: bool,
}

/// Snapshot of the row the user is currently editing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeState {
    #[serde(default)]
    pub grid_id: Option<String>,
    #[serde(default)]
    pub field_id: Option<String>,
    #[serde(default)]
    pub row_index: Option<i64>,
    #[serde(default)]
    pub row_values: Row,
    #[serde(default)]
    pub version: Option<String>,
}

// ── Connectors ──────────────────────────────────────────────────

/// A named, reusable HTTP endpoint configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorDefinition {
    pub id: String,
    pub base_url: String,
    #[serde(default)]
    pub auth: ConnectorAuth,
    #[serde(default)]
    pub default_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub allow_hosts: Vec<String>,
}

impl ConnectorDefinition {
    /// Whether `host` passes this connector's allowlist.
    ///
    /// An empty allowlist admits every host. Entries match exactly or, when
    /// written as `*.example.com`, any subdomain of `example.com`.
    pub fn allows_host(&self, host: &str) -> bool {
        if self.allow_hosts.is_empty() {
            return true;
        }
        let host = host.to_ascii_lowercase();
        self.allow_hosts.iter().any(|entry| {
            let entry = entry.trim().to_ascii_lowercase();
            match entry.strip_prefix("*.") {
                Some(suffix) => host.ends_with(&format!(".{}", suffix)),
                None => host == entry,
            }
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectorAuth {
    #[default]
    None,
    SecretRef {
        #[serde(rename = "secretRefId")]
        secret_ref_id: String,
    },
}

// ── Collaborator payloads ───────────────────────────────────────

/// An outbound GET request prepared by the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
    pub max_bytes: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Everything a remote resolver needs to run a function server-side.
///
/// The context travels as JSON since it is usually forwarded over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRequest {
    pub function_id: String,
    #[serde(default)]
    pub args: Value,
    pub context: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeState>,
}

/// Input handed to a caller-supplied AI extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiExtractRequest {
    pub prompt: String,
    pub input: Value,
    pub max_rows: usize,
}
