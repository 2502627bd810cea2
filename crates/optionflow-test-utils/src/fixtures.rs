use std::path::PathBuf;

use chrono::Utc;
use serde_json::{json, Value};
use tempfile::TempDir;

use optionflow_core::{OptionItem, ResolveMeta, ResolveResult, ResultSource, Row};

/// A linear graph `start -> source -> steps... -> output` as raw JSON.
///
/// `source` and each step are `{ "kind", "config" }`; `output` is the
/// `output.options` config. Node ids are `start`, `source`, `step_N`, `output`.
pub fn linear_graph(source: Value, steps: Vec<Value>, output: Value) -> Value {
    let mut nodes = vec![json!({"id": "start", "kind": "control.start"})];
    nodes.push(with_id(source, "source"));
    for (i, step) in steps.into_iter().enumerate() {
        nodes.push(with_id(step, &format!("step_{}", i + 1)));
    }
    nodes.push(json!({"id": "output", "kind": "output.options", "config": output}));

    let edges: Vec<Value> = nodes
        .windows(2)
        .enumerate()
        .map(|(i, pair)| {
            json!({
                "id": format!("e{}", i + 1),
                "source": pair[0]["id"],
                "target": pair[1]["id"],
            })
        })
        .collect();

    json!({
        "nodes": nodes,
        "edges": edges,
        "entryNodeId": "start",
        "returnNodeId": "output",
    })
}

fn with_id(mut node: Value, id: &str) -> Value {
    if let Value::Object(map) = &mut node {
        map.insert("id".to_string(), json!(id));
    }
    node
}

/// `start -> grid_rows(products) -> filter(price > 10) -> sort(name) -> output(name/sku)`.
pub fn expensive_products_graph() -> Value {
    linear_graph(
        json!({"kind": "source.grid_rows", "config": {"gridId": "products"}}),
        vec![
            json!({"kind": "transform.filter",
                "config": {"conditions": [{"path": "price", "op": ">", "value": 10}]}}),
            json!({"kind": "transform.sort", "config": {"path": "name"}}),
        ],
        json!({"label": "name", "value": "sku"}),
    )
}

/// A product catalogue form with an orders grid, a shared section, one
/// connector, and a handful of custom functions.
pub fn products_context() -> Value {
    json!({
        "grids": [
            {"id": "products", "name": "Products", "sectionId": "main"},
            {"id": "orders", "name": "Orders"}
        ],
        "fields": [
            {"id": "name", "gridId": "products", "label": "Name", "fieldType": "text"},
            {"id": "sku", "gridId": "products", "label": "SKU", "fieldType": "text"},
            {"id": "price", "gridId": "products", "label": "Price", "fieldType": "number", "hidden": true},
            {"id": "product", "gridId": "orders", "label": "Product", "fieldType": "select"}
        ],
        "sections": [
            {"id": "main", "name": "Main"},
            {"id": "shared", "name": "Shared", "shared": true}
        ],
        "layout": [
            {"gridId": "products", "fieldId": "name", "sectionId": "main", "order": 1},
            {"gridId": "products", "fieldId": "sku", "sectionId": "main", "order": 2},
            {"gridId": "products", "fieldId": "price", "sectionId": "main", "order": 3},
            {"gridId": "orders", "fieldId": "product", "sectionId": "shared", "order": 1}
        ],
        "gridData": {
            "products": [
                {"name": "Gamma", "sku": "g1", "price": 15, "category": "tools"},
                {"name": "Alpha", "sku": "a1", "price": 5, "category": "tools"},
                {"name": "Beta", "sku": "b1", "price": 20, "category": "toys"}
            ]
        },
        "runtime": {
            "gridId": "orders",
            "fieldId": "product",
            "rowIndex": 0,
            "rowValues": {"product": null, "qty": 2}
        },
        "connectors": [
            {"id": "catalog_api", "baseUrl": "https://api.example.com", "allowHosts": ["api.example.com"]}
        ],
        "functions": [
            {
                "id": "fn_expensive_products",
                "name": "Expensive products",
                "type": "graph_v1",
                "cache": {"ttlSeconds": 60},
                "graph": expensive_products_graph()
            },
            {
                "id": "fn_categories",
                "name": "Categories",
                "type": "dsl_v1",
                "source": {"type": "grid_rows", "gridId": "products"},
                "transforms": [
                    {"type": "unique", "path": "category"},
                    {"type": "sort", "path": "category"}
                ],
                "output": {"label": "category", "value": "category"}
            },
            {
                "id": "fn_disabled",
                "type": "dsl_v1",
                "enabled": false,
                "source": {"type": "grid_rows", "gridId": "products"},
                "output": {"label": "name", "value": "sku"}
            },
            {
                "id": "fn_remote_catalog",
                "type": "dsl_v1",
                "source": {"type": "http_get", "connectorId": "catalog_api", "path": "/items",
                           "query": {"q": "{{arg.q}}"}},
                "transforms": [{"type": "flatten_path", "path": "items"}],
                "output": {"label": "title", "value": "code"}
            },
            {
                "id": "fn_broken",
                "type": "graph_v1",
                "graph": {
                    "nodes": [
                        {"id": "start", "kind": "control.start"},
                        {"id": "out", "kind": "output.options", "config": {"label": "a", "value": "a"}}
                    ],
                    "edges": [],
                    "entryNodeId": "start",
                    "returnNodeId": "out"
                }
            }
        ]
    })
}

pub fn option(label: &str, value: Value) -> OptionItem {
    OptionItem {
        label: label.to_string(),
        id: Some(match &value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }),
        value,
        extra: Row::new(),
    }
}

/// A result as a remote resolver would send it back.
pub fn remote_result(options: Vec<OptionItem>) -> ResolveResult {
    ResolveResult {
        options,
        warnings: Vec::new(),
        meta: ResolveMeta {
            from_cache: false,
            fetched_at: Utc::now(),
            expires_at: None,
            duration_ms: 12,
            source: ResultSource::RemoteCustom,
            requires_remote: false,
        },
    }
}

/// Write `contents` to `optionflow.toml` in a fresh temp dir.
pub fn write_config(contents: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("optionflow.toml");
    std::fs::write(&path, contents).unwrap();
    (dir, path)
}
