use std::collections::BTreeMap;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use optionflow_core::condition::CombineMode;

/// A step that introduces data with no pipeline input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceStep {
    GridRows(GridRowsConfig),
    CurrentContext(CurrentContextConfig),
    LayoutFields(LayoutFieldsConfig),
    HttpGet(HttpGetConfig),
}

/// A step that maps one value to a row set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransformStep {
    Filter(FilterConfig),
    MapFields(MapFieldsConfig),
    Unique(UniqueConfig),
    Sort(SortConfig),
    Limit(LimitConfig),
    FlattenPath(FlattenPathConfig),
    AiExtractOptions(AiExtractConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridRowsConfig {
    pub grid_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentContextConfig {
    #[serde(default = "default_true")]
    pub include_row_values: bool,
    #[serde(default = "default_true")]
    pub include_field_meta: bool,
    #[serde(default = "default_true")]
    pub include_layout_meta: bool,
}

impl Default for CurrentContextConfig {
    fn default() -> Self {
        Self {
            include_row_values: true,
            include_field_meta: true,
            include_layout_meta: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutFieldsConfig {
    /// Restrict to a single grid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_id: Option<String>,
    #[serde(default)]
    pub exclude_hidden: bool,
    #[serde(default)]
    pub exclude_shared: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpGetConfig {
    pub connector_id: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfig {
    #[serde(default)]
    pub mode: CombineMode,
    #[serde(default)]
    pub conditions: Vec<Predicate>,
    /// Opaque expression tree handed to the injected evaluator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<Value>,
}

/// One filter predicate as authored. The operator is kept as written and
/// normalised at run time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Predicate {
    pub path: String,
    pub op: String,
    /// Literal expected value, or the arg key / context path when
    /// `value_from` says so.
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub value_from: ValueFrom,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueFrom {
    #[default]
    Literal,
    Arg,
    Context,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapFieldsConfig {
    #[serde(default, with = "ordered_selectors")]
    pub fields: Vec<(String, ValueSelector)>,
    /// Start from the input row instead of an empty one.
    #[serde(default)]
    pub keep_existing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniqueConfig {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortConfig {
    pub path: String,
    #[serde(default)]
    pub direction: SortDirection,
    #[serde(default)]
    pub sort_as: SortAs,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortAs {
    #[default]
    String,
    Number,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitConfig {
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlattenPathConfig {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiExtractConfig {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rows: Option<usize>,
}

/// How each row becomes an option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputMapping {
    pub label: ValueSelector,
    pub value: ValueSelector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ValueSelector>,
    #[serde(
        default,
        with = "ordered_selectors",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub extra: Vec<(String, ValueSelector)>,
}

/// Where a mapped value comes from.
///
/// Authors may write a bare string as shorthand for a row path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", from = "SelectorRepr")]
pub enum ValueSelector {
    Path { path: String },
    Const { value: Value },
    Arg { key: String },
    Context { path: String },
}

/// Keys every option already carries; `extra` must not reuse them.
pub const RESERVED_OPTION_KEYS: [&str; 3] = ["label", "value", "id"];

impl OutputMapping {
    /// `extra` keys that collide with the option's own fields.
    pub fn reserved_extra_keys(&self) -> impl Iterator<Item = &str> {
        self.extra
            .iter()
            .map(|(key, _)| key.as_str())
            .filter(|key| RESERVED_OPTION_KEYS.contains(key))
    }
}

impl ValueSelector {
    pub fn path(path: impl Into<String>) -> Self {
        Self::Path { path: path.into() }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SelectorRepr {
    Shorthand(String),
    Tagged(TaggedSelector),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TaggedSelector {
    Path { path: String },
    Const { value: Value },
    Arg { key: String },
    Context { path: String },
}

impl From<SelectorRepr> for ValueSelector {
    fn from(repr: SelectorRepr) -> Self {
        match repr {
            SelectorRepr::Shorthand(path) => Self::Path { path },
            SelectorRepr::Tagged(TaggedSelector::Path { path }) => Self::Path { path },
            SelectorRepr::Tagged(TaggedSelector::Const { value }) => Self::Const { value },
            SelectorRepr::Tagged(TaggedSelector::Arg { key }) => Self::Arg { key },
            SelectorRepr::Tagged(TaggedSelector::Context { path }) => Self::Context { path },
        }
    }
}

/// `{ "key": selector, ... }` kept in authored order.
mod ordered_selectors {
    use super::*;

    pub fn serialize<S: Serializer>(
        entries: &[(String, ValueSelector)],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (key, selector) in entries {
            map.serialize_entry(key, selector)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<(String, ValueSelector)>, D::Error> {
        deserializer.deserialize_map(EntriesVisitor)
    }

    struct EntriesVisitor;

    impl<'de> Visitor<'de> for EntriesVisitor {
        type Value = Vec<(String, ValueSelector)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of output keys to value selectors")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
            let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
            while let Some((key, selector)) = access.next_entry::<String, ValueSelector>()? {
                entries.retain(|(existing, _): &(String, ValueSelector)| existing != &key);
                entries.push((key, selector));
            }
            Ok(entries)
        }
    }
}
