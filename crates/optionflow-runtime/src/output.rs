use serde_json::Value;

use optionflow_core::path::{get_path, get_row_path, value_to_string};
use optionflow_core::{OptionItem, Row};
use optionflow_graph::{OutputMapping, ValueSelector, RESERVED_OPTION_KEYS};

/// Evaluate a selector against a row, the call args, and the runtime scope.
/// Anything missing reads as `null`.
pub fn select(selector: &ValueSelector, row: &Row, args: &Value, scope: &Value) -> Value {
    let found = match selector {
        ValueSelector::Path { path } => get_row_path(row, path),
        ValueSelector::Const { value } => return value.clone(),
        ValueSelector::Arg { key } => get_path(args, key),
        ValueSelector::Context { path } => get_path(scope, path),
    };
    found.cloned().unwrap_or(Value::Null)
}

/// Map rows to options, capped at `max_options`.
///
/// Rows whose label or value resolve to null are dropped. Returns the
/// options and whether the cap cut anything off.
pub fn map_rows_to_options(
    rows: Vec<Row>,
    mapping: &OutputMapping,
    args: &Value,
    scope: &Value,
    max_options: usize,
) -> (Vec<OptionItem>, bool) {
    let mut options = Vec::with_capacity(rows.len().min(max_options));
    let mut truncated = false;

    for row in &rows {
        let label = select(&mapping.label, row, args, scope);
        let value = select(&mapping.value, row, args, scope);
        if label.is_null() || value.is_null() {
            continue;
        }
        if options.len() == max_options {
            truncated = true;
            break;
        }

        let id = mapping
            .id
            .as_ref()
            .map(|selector| select(selector, row, args, scope))
            .filter(|id| !id.is_null())
            .map(|id| value_to_string(&id))
            .unwrap_or_else(|| value_to_string(&value));

        // Compiled plans never carry reserved extras; hand-built mappings might.
        let extra: Row = mapping
            .extra
            .iter()
            .filter(|(key, _)| !RESERVED_OPTION_KEYS.contains(&key.as_str()))
            .map(|(key, selector)| (key.clone(), select(selector, row, args, scope)))
            .collect();

        options.push(OptionItem {
            label: value_to_string(&label),
            value,
            id: Some(id),
            extra,
        });
    }
    (options, truncated)
}
