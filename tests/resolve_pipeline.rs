use std::sync::Arc;

use serde_json::json;

use optionflow_core::{EngineConfig, ResultSource};
use optionflow_graph::FunctionDefinition;
use optionflow_runtime::{OptionResolver, ResolveContext, ResolveRequest};
use optionflow_test_utils::fixtures::{self, write_config};
use optionflow_test_utils::MockTransport;

fn context() -> ResolveContext {
    serde_json::from_value(fixtures::products_context()).expect("fixture context")
}

#[tokio::test]
async fn test_graph_and_dsl_forms_resolve_identically() {
    let mut ctx = context();
    let dsl: FunctionDefinition = serde_json::from_value(json!({
        "id": "fn_expensive_dsl",
        "type": "dsl_v1",
        "source": {"type": "grid_rows", "gridId": "products"},
        "transforms": [
            {"type": "filter", "conditions": [{"path": "price", "op": "gt", "value": 10}]},
            {"type": "sort", "path": "name"}
        ],
        "output": {"label": "name", "value": "sku"}
    }))
    .expect("dsl definition");
    ctx.functions.push(Arc::new(dsl));

    let resolver = OptionResolver::new(EngineConfig::default())
        .with_transport(Arc::new(MockTransport::new()));
    let graph = resolver
        .resolve(ResolveRequest::new("fn_expensive_products", &ctx))
        .await;
    let dsl = resolver
        .resolve(ResolveRequest::new("fn_expensive_dsl", &ctx))
        .await;

    assert_eq!(graph.options, dsl.options);
    assert_eq!(graph.options.len(), 2);
    assert_eq!(graph.options[0].label, "Beta");
    assert!(graph.warnings.is_empty());
    assert!(dsl.warnings.is_empty());
    assert_eq!(resolver.plans().len(), 2);
}

#[tokio::test]
async fn test_config_file_limits_apply() {
    let (_dir, path) = write_config(
        r#"
[cache]
default_ttl_secs = 42

[output]
max_options = 1
"#,
    );
    let config = EngineConfig::load(&path).expect("load config");
    let resolver = OptionResolver::new(config).with_transport(Arc::new(MockTransport::new()));
    let ctx = context();

    let result = resolver
        .resolve(ResolveRequest::new("fn_categories", &ctx))
        .await;
    assert_eq!(result.options.len(), 1);
    assert_eq!(result.warnings, vec!["Options truncated to 1".to_string()]);
    let ttl = result.meta.expires_at.expect("expiry") - result.meta.fetched_at;
    assert_eq!(ttl.num_seconds(), 42);
}

#[tokio::test]
async fn test_result_serialises_to_wire_shape() {
    let ctx = context();
    let resolver = OptionResolver::new(EngineConfig::default())
        .with_transport(Arc::new(MockTransport::new()));
    let result = resolver
        .resolve(ResolveRequest::new("fn_expensive_products", &ctx))
        .await;
    assert_eq!(result.meta.source, ResultSource::LocalCustom);

    let wire = serde_json::to_value(&result).expect("serialise");
    assert_eq!(wire["options"][0], json!({"label": "Beta", "value": "b1", "id": "b1"}));
    assert_eq!(wire["meta"]["fromCache"], json!(false));
    assert_eq!(wire["meta"]["source"], json!("local_custom"));
    assert!(wire["meta"]["fetchedAt"].is_string());
    assert!(wire.get("warnings").is_none());
}

#[tokio::test]
async fn test_missing_connector_is_a_warning() {
    let mut ctx = context();
    ctx.connectors.clear();
    let resolver = OptionResolver::new(EngineConfig::default())
        .with_transport(Arc::new(MockTransport::new()));

    let result = resolver
        .resolve(ResolveRequest::new("fn_remote_catalog", &ctx).allow_http_get())
        .await;
    assert!(result.options.is_empty());
    assert_eq!(result.warnings, vec!["Connector \"catalog_api\" not found".to_string()]);
}

#[tokio::test]
async fn test_unknown_connector_fails_compile_when_connectors_known() {
    let mut ctx = context();
    ctx.connectors[0].id = "other_api".into();
    let resolver = OptionResolver::new(EngineConfig::default())
        .with_transport(Arc::new(MockTransport::new()));

    let result = resolver
        .resolve(ResolveRequest::new("fn_remote_catalog", &ctx).allow_http_get())
        .await;
    assert!(result.options.is_empty());
    assert!(result.warnings[0].contains("failed to compile"));
    assert!(result
        .warnings
        .iter()
        .any(|w| w.contains("Unknown connector \"catalog_api\"")));
    assert!(resolver.cache().is_empty());
}
