//! Dotted-path access into nested JSON values, plus the string forms used
//! for labels, ids, and dedup keys.

use serde_json::Value;

use crate::types::Row;

/// Read `path` (e.g. `"items.0.name"`) out of `value`.
///
/// An empty path returns `value` itself. Numeric segments index arrays.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Remove the value at `path` from a row and return it. Objects the
/// removal leaves empty are dropped too; sibling keys keep their order.
pub fn remove_row_path(row: &mut Row, path: &str) -> Option<Value> {
    let path = path.trim();
    let Some((head, rest)) = path.split_once('.') else {
        return row.shift_remove(path);
    };
    let removed = match row.get_mut(head)? {
        Value::Object(child) => remove_row_path(child, rest)?,
        _ => return None,
    };
    if row
        .get(head)
        .and_then(Value::as_object)
        .is_some_and(|child| child.is_empty())
    {
        row.shift_remove(head);
    }
    Some(removed)
}

/// Read `path` out of a row without wrapping it in a `Value` first.
pub fn get_row_path<'a>(row: &'a Row, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, rest),
        None => (path, ""),
    };
    let first = row.get(head)?;
    if rest.is_empty() {
        Some(first)
    } else {
        get_path(first, rest)
    }
}

/// Final segment of a dotted path (`"a.b.c"` -> `"c"`).
pub fn last_segment(path: &str) -> &str {
    path.trim().rsplit('.').next().unwrap_or("")
}

/// Coerce a pipeline item into a row; non-objects become `{ "value": item }`.
pub fn normalize_row(item: Value) -> Row {
    match item {
        Value::Object(map) => map,
        other => {
            let mut row = Row::new();
            row.insert("value".to_string(), other);
            row
        }
    }
}

/// Human-facing string form: strings verbatim, null empty, anything else as JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Numeric view of a value. Numeric strings count; booleans and blanks do not.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
            }
        }
        _ => None,
    }
}

/// JavaScript-style truthiness.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Canonical key for dedup and cache keys.
///
/// Object keys are sorted recursively so two values that differ only in key
/// order produce the same key. Strings stay JSON-quoted, which keeps `"1"` and
/// `1` distinct.
pub fn stable_key(value: &Value) -> String {
    let mut out = String::new();
    write_stable(value, &mut out);
    out
}

fn write_stable(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_stable(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_stable(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}
