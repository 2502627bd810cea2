use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use optionflow_core::path::{get_path, normalize_row};
use optionflow_core::Row;
use optionflow_graph::{OutputMapping, ValueSelector};

use crate::context::ResolveContext;

pub const BUILTIN_GRIDS: &str = "builtin.grids";
pub const BUILTIN_FIELDS: &str = "builtin.fields";
pub const BUILTIN_GRID_ROWS: &str = "builtin.grid_rows";

/// A cheap, pure function answered without compiling or caching.
///
/// Built-ins produce rows; the shared output mapper turns them into options.
pub trait BuiltinFunction: Send + Sync + 'static {
    fn rows(&self, context: &ResolveContext, args: &Value) -> Vec<Row>;

    /// How rows become options. Defaults to the `label` / `value` keys.
    fn mapping(&self, _args: &Value) -> OutputMapping {
        OutputMapping {
            label: ValueSelector::path("label"),
            value: ValueSelector::path("value"),
            id: None,
            extra: Vec::new(),
        }
    }
}

impl<F> BuiltinFunction for F
where
    F: Fn(&ResolveContext, &Value) -> Vec<Row> + Send + Sync + 'static,
{
    fn rows(&self, context: &ResolveContext, args: &Value) -> Vec<Row> {
        self(context, args)
    }
}

/// One option per grid.
struct Grids;

impl BuiltinFunction for Grids {
    fn rows(&self, context: &ResolveContext, _args: &Value) -> Vec<Row> {
        context
            .grids
            .iter()
            .map(|grid| {
                normalize_row(json!({
                    "label": grid.name.as_deref().unwrap_or(&grid.id),
                    "value": grid.id,
                }))
            })
            .collect()
    }
}

/// Fields of `args.gridId`, or of every grid when absent.
struct Fields;

impl BuiltinFunction for Fields {
    fn rows(&self, context: &ResolveContext, args: &Value) -> Vec<Row> {
        let grid_id = arg_str(args, "gridId");
        context
            .fields
            .iter()
            .filter(|field| grid_id.map_or(true, |g| field.grid_id == g))
            .map(|field| {
                normalize_row(json!({
                    "label": field.display_name(),
                    "value": field.id,
                    "gridId": field.grid_id,
                }))
            })
            .collect()
    }

    fn mapping(&self, _args: &Value) -> OutputMapping {
        OutputMapping {
            label: ValueSelector::path("label"),
            value: ValueSelector::path("value"),
            id: None,
            extra: vec![("gridId".to_string(), ValueSelector::path("gridId"))],
        }
    }
}

/// Rows of `args.gridId`, labelled by `args.labelPath` and valued by
/// `args.valuePath` (both default to the row's `label` / `value`).
struct GridRows;

impl BuiltinFunction for GridRows {
    fn rows(&self, context: &ResolveContext, args: &Value) -> Vec<Row> {
        arg_str(args, "gridId")
            .and_then(|grid_id| context.grid_rows(grid_id))
            .map(|items| items.iter().cloned().map(normalize_row).collect())
            .unwrap_or_default()
    }

    fn mapping(&self, args: &Value) -> OutputMapping {
        OutputMapping {
            label: ValueSelector::path(arg_str(args, "labelPath").unwrap_or("label")),
            value: ValueSelector::path(arg_str(args, "valuePath").unwrap_or("value")),
            id: None,
            extra: Vec::new(),
        }
    }
}

fn arg_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    get_path(args, key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Built-in functions by id.
#[derive(Clone, Default)]
pub struct BuiltinRegistry {
    functions: BTreeMap<String, Arc<dyn BuiltinFunction>>,
}

impl BuiltinRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The stock `builtin.*` functions.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(BUILTIN_GRIDS, Grids);
        registry.register(BUILTIN_FIELDS, Fields);
        registry.register(BUILTIN_GRID_ROWS, GridRows);
        registry
    }

    /// Register or replace a built-in.
    pub fn register(&mut self, id: impl Into<String>, function: impl BuiltinFunction) {
        self.functions.insert(id.into(), Arc::new(function));
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn BuiltinFunction>> {
        self.functions.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.functions.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }
}
