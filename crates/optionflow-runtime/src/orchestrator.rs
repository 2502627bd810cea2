//! The resolution entry point.
//!
//! `OptionResolver::resolve` walks: built-in check, definition lookup,
//! cache check, compile, local execution or remote delegation, cache write.
//! Every path ends in a `ResolveResult`; nothing is returned as an error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use optionflow_core::traits::{
    AiExtractor, ExprEvaluator, HttpTransport, RemoteResolver, SecretResolver,
};
use optionflow_core::{
    EngineConfig, RemoteRequest, ResolveMeta, ResolveResult, ResultSource, RuntimeState,
};
use optionflow_graph::{FunctionDefinition, PlanCache};

use crate::builtins::{BuiltinFunction, BuiltinRegistry};
use crate::cache::{cache_key, ResultCache, MAX_TTL};
use crate::context::{runtime_scope, runtime_version_key, ResolveContext};
use crate::executor::{Capabilities, ExecutionInput, Executor};
use crate::http::ReqwestTransport;
use crate::output::map_rows_to_options;

/// One resolution request.
pub struct ResolveRequest<'a> {
    pub function_id: String,
    pub context: &'a ResolveContext,
    /// Overrides `context.runtime` when set.
    pub runtime: Option<RuntimeState>,
    pub args: Value,
    pub force_refresh: bool,
    pub cache_ttl_seconds_override: Option<u64>,
    pub allow_http_get: bool,
    pub secret_resolver: Option<Arc<dyn SecretResolver>>,
    pub ai_extractor: Option<Arc<dyn AiExtractor>>,
    /// Overrides the resolver-wide remote resolver when set.
    pub remote_resolver: Option<Arc<dyn RemoteResolver>>,
}

impl<'a> ResolveRequest<'a> {
    pub fn new(function_id: impl Into<String>, context: &'a ResolveContext) -> Self {
        Self {
            function_id: function_id.into(),
            context,
            runtime: None,
            args: Value::Object(Default::default()),
            force_refresh: false,
            cache_ttl_seconds_override: None,
            allow_http_get: false,
            secret_resolver: None,
            ai_extractor: None,
            remote_resolver: None,
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    pub fn with_runtime(mut self, runtime: RuntimeState) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    pub fn with_cache_ttl(mut self, seconds: u64) -> Self {
        self.cache_ttl_seconds_override = Some(seconds);
        self
    }

    pub fn allow_http_get(mut self) -> Self {
        self.allow_http_get = true;
        self
    }

    pub fn with_secret_resolver(mut self, resolver: Arc<dyn SecretResolver>) -> Self {
        self.secret_resolver = Some(resolver);
        self
    }

    pub fn with_ai_extractor(mut self, extractor: Arc<dyn AiExtractor>) -> Self {
        self.ai_extractor = Some(extractor);
        self
    }

    pub fn with_remote_resolver(mut self, resolver: Arc<dyn RemoteResolver>) -> Self {
        self.remote_resolver = Some(resolver);
        self
    }

    fn effective_runtime(&self) -> Option<&RuntimeState> {
        self.runtime.as_ref().or(self.context.runtime.as_ref())
    }
}

/// Resolves option functions. Construct once and share; all caches live here.
pub struct OptionResolver {
    config: EngineConfig,
    builtins: BuiltinRegistry,
    plans: PlanCache,
    cache: ResultCache,
    executor: Executor,
    remote: Option<Arc<dyn RemoteResolver>>,
}

impl OptionResolver {
    pub fn new(config: EngineConfig) -> Self {
        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(&config.http));
        Self {
            builtins: BuiltinRegistry::with_defaults(),
            plans: PlanCache::new(config.plans.signature_capacity),
            cache: ResultCache::new(config.cache.max_entries),
            executor: Executor::new(&config, transport),
            remote: None,
            config,
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.executor = self.executor.with_transport(transport);
        self
    }

    pub fn with_expr_evaluator(mut self, evaluator: Arc<dyn ExprEvaluator>) -> Self {
        self.executor = self.executor.with_expr_evaluator(evaluator);
        self
    }

    pub fn with_remote_resolver(mut self, resolver: Arc<dyn RemoteResolver>) -> Self {
        self.remote = Some(resolver);
        self
    }

    pub fn with_builtin(mut self, id: impl Into<String>, function: impl BuiltinFunction) -> Self {
        self.builtins.register(id, function);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn plans(&self) -> &PlanCache {
        &self.plans
    }

    pub fn builtins(&self) -> &BuiltinRegistry {
        &self.builtins
    }

    pub async fn resolve(&self, request: ResolveRequest<'_>) -> ResolveResult {
        let started = Instant::now();
        let function_id = request.function_id.as_str();
        let context = request.context;
        let runtime = request.effective_runtime();

        if let Some(builtin) = self.builtins.get(function_id) {
            debug!(function_id, "Resolving built-in");
            let scope = runtime_scope(runtime);
            let rows = builtin.rows(context, &request.args);
            let (options, truncated) = map_rows_to_options(
                rows,
                &builtin.mapping(&request.args),
                &request.args,
                &scope,
                self.config.output.max_options,
            );
            let mut warnings = Vec::new();
            if truncated {
                warnings.push(format!("Options truncated to {}", self.config.output.max_options));
            }
            return ResolveResult {
                options,
                warnings,
                meta: meta(ResultSource::Builtin, started, None),
            };
        }

        let Some(definition) = context.function(function_id) else {
            warn!(function_id, "Function not found");
            return ResolveResult::warning(
                ResultSource::Unknown,
                format!("Function \"{}\" not found", function_id),
                elapsed_ms(started),
            );
        };

        if !definition.is_enabled() {
            debug!(function_id, "Function disabled");
            return ResolveResult::warning(
                ResultSource::LocalCustom,
                format!("Function \"{}\" is disabled", function_id),
                elapsed_ms(started),
            );
        }

        let key = cache_key(
            function_id,
            &request.args,
            &context.version_key(),
            &runtime_version_key(runtime),
        );
        if !request.force_refresh {
            if let Some(mut hit) = self.cache.get(&key) {
                debug!(function_id, "Result cache hit");
                hit.meta.from_cache = true;
                hit.meta.duration_ms = elapsed_ms(started);
                return hit;
            }
        }
        debug!(function_id, force_refresh = request.force_refresh, "Result cache miss");

        let plan = match self.plans.get_or_compile(definition, &context.connector_ids()) {
            Ok(plan) => plan,
            Err(issues) => {
                warn!(function_id, issues = issues.len(), "Function failed to compile");
                let mut result = ResolveResult::warning(
                    ResultSource::LocalCustom,
                    format!("Function \"{}\" failed to compile", function_id),
                    elapsed_ms(started),
                );
                result
                    .warnings
                    .extend(issues.iter().map(|issue| issue.to_string()));
                return result;
            }
        };
        debug!(
            function_id,
            nodes = plan.execution_order.len(),
            requires_remote = plan.requires_remote,
            uses_runtime_row = plan.uses_runtime_row,
            "Plan ready"
        );

        let ttl = Duration::from_secs(self.ttl_seconds(&request, definition));

        let input = ExecutionInput {
            context,
            runtime,
            args: &request.args,
            capabilities: Capabilities {
                allow_http_get: request.allow_http_get,
            },
            secrets: request.secret_resolver.as_deref(),
            ai: request.ai_extractor.as_deref(),
        };
        let execution = self.executor.execute(&plan, &input).await;

        if execution.requires_remote {
            return self.delegate(&request, ttl, &key, started).await;
        }

        let result = ResolveResult {
            options: execution.options,
            warnings: execution.warnings,
            meta: meta(ResultSource::LocalCustom, started, Some(ttl)),
        };
        self.cache.insert(key, result.clone(), ttl);
        info!(
            function_id,
            options = result.options.len(),
            warnings = result.warnings.len(),
            duration_ms = result.meta.duration_ms,
            "Resolved locally"
        );
        result
    }

    /// TTL precedence: call override, then the definition, then the engine
    /// default. Clamped to `MAX_TTL`.
    fn ttl_seconds(&self, request: &ResolveRequest<'_>, definition: &FunctionDefinition) -> u64 {
        request
            .cache_ttl_seconds_override
            .or(definition.ttl_seconds())
            .unwrap_or(self.config.cache.default_ttl_secs)
            .min(MAX_TTL.as_secs())
    }

    async fn delegate(
        &self,
        request: &ResolveRequest<'_>,
        ttl: Duration,
        key: &str,
        started: Instant,
    ) -> ResolveResult {
        let function_id = request.function_id.as_str();
        let Some(remote) = request.remote_resolver.as_ref().or(self.remote.as_ref()) else {
            warn!(function_id, "Function needs remote execution but no remote resolver is configured");
            let mut result = ResolveResult::warning(
                ResultSource::LocalCustom,
                format!(
                    "Function \"{}\" requires remote execution (http_get or ai.extract_options) but no remote resolver is configured",
                    function_id
                ),
                elapsed_ms(started),
            );
            result.meta.requires_remote = true;
            return result;
        };

        let context = match serde_json::to_value(request.context) {
            Ok(context) => context,
            Err(e) => {
                return ResolveResult::warning(
                    ResultSource::RemoteCustom,
                    format!("Could not serialise context for remote resolver: {}", e),
                    elapsed_ms(started),
                )
            }
        };
        let remote_request = RemoteRequest {
            function_id: function_id.to_string(),
            args: request.args.clone(),
            context,
            runtime: request.effective_runtime().cloned(),
        };

        debug!(function_id, "Delegating to remote resolver");
        let remote_result = match remote.resolve(remote_request).await {
            Ok(result) => result,
            Err(e) => {
                warn!(function_id, error = %e, "Remote resolver failed");
                return ResolveResult::warning(
                    ResultSource::RemoteCustom,
                    e.to_string(),
                    elapsed_ms(started),
                );
            }
        };

        if remote_result.meta.requires_remote {
            warn!(function_id, "Remote resolver asked for further delegation");
            return ResolveResult::warning(
                ResultSource::RemoteCustom,
                format!(
                    "Remote resolver could not complete \"{}\"; remote resolvers must not require further delegation",
                    function_id
                ),
                elapsed_ms(started),
            );
        }

        // The cache entry lives exactly as long as the reported expiry.
        let now = Utc::now();
        let (expires_at, cache_ttl) = match remote_result.meta.expires_at {
            Some(at) => (Some(at), (at - now).to_std().unwrap_or(Duration::ZERO)),
            None => (expires_after(now, ttl), ttl),
        };
        let result = ResolveResult {
            options: remote_result.options,
            warnings: remote_result.warnings,
            meta: ResolveMeta {
                from_cache: false,
                fetched_at: remote_result.meta.fetched_at,
                expires_at,
                duration_ms: elapsed_ms(started),
                source: ResultSource::RemoteCustom,
                requires_remote: false,
            },
        };
        if cache_ttl.is_zero() {
            debug!(function_id, "Remote result already expired, not caching");
        } else {
            self.cache.insert(key.to_string(), result.clone(), cache_ttl);
        }
        info!(
            function_id,
            options = result.options.len(),
            duration_ms = result.meta.duration_ms,
            "Resolved remotely"
        );
        result
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// `from + ttl`, or `None` when it falls outside the representable range.
fn expires_after(from: DateTime<Utc>, ttl: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| from.checked_add_signed(ttl))
}

fn meta(source: ResultSource, started: Instant, ttl: Option<Duration>) -> ResolveMeta {
    let fetched_at = Utc::now();
    ResolveMeta {
        from_cache: false,
        fetched_at,
        expires_at: ttl.and_then(|ttl| expires_after(fetched_at, ttl)),
        duration_ms: elapsed_ms(started),
        source,
        requires_remote: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optionflow_test_utils::{
        fixtures, MockAiExtractor, MockExprEvaluator, MockRemoteResolver, MockSecretResolver,
        MockTransport,
    };
    use serde_json::json;

    fn context() -> ResolveContext {
        serde_json::from_value(fixtures::products_context()).unwrap()
    }

    fn resolver() -> OptionResolver {
        OptionResolver::new(EngineConfig::default()).with_transport(Arc::new(MockTransport::new()))
    }

    fn labels(result: &ResolveResult) -> Vec<&str> {
        result.options.iter().map(|o| o.label.as_str()).collect()
    }

    #[tokio::test]
    async fn test_builtin_bypasses_cache() {
        let ctx = context();
        let resolver = resolver();
        let result = resolver
            .resolve(ResolveRequest::new("builtin.grids", &ctx))
            .await;
        assert_eq!(labels(&result), vec!["Products", "Orders"]);
        assert_eq!(result.meta.source, ResultSource::Builtin);
        assert!(resolver.cache().is_empty());
        assert!(resolver.plans().is_empty());

        let result = resolver
            .resolve(
                ResolveRequest::new("builtin.grid_rows", &ctx).with_args(json!({
                    "gridId": "products", "labelPath": "name", "valuePath": "sku"
                })),
            )
            .await;
        assert_eq!(labels(&result), vec!["Gamma", "Alpha", "Beta"]);
        assert_eq!(result.options[1].id.as_deref(), Some("a1"));
    }

    #[tokio::test]
    async fn test_custom_builtin_overrides() {
        let ctx = context();
        let resolver = resolver().with_builtin("builtin.grids", |_: &ResolveContext, _: &Value| {
            vec![optionflow_core::path::normalize_row(json!({"label": "Only", "value": 1}))]
        });
        let result = resolver
            .resolve(ResolveRequest::new("builtin.grids", &ctx))
            .await;
        assert_eq!(labels(&result), vec!["Only"]);
    }

    #[tokio::test]
    async fn test_missing_function() {
        let ctx = context();
        let result = resolver().resolve(ResolveRequest::new("fn_nope", &ctx)).await;
        assert!(result.options.is_empty());
        assert_eq!(result.warnings, vec!["Function \"fn_nope\" not found".to_string()]);
        assert_eq!(result.meta.source, ResultSource::Unknown);
    }

    #[tokio::test]
    async fn test_disabled_function_skips_compile() {
        let ctx = context();
        let resolver = resolver();
        let result = resolver.resolve(ResolveRequest::new("fn_disabled", &ctx)).await;
        assert!(result.options.is_empty());
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("disabled"));
        assert!(resolver.plans().is_empty());
        assert!(resolver.cache().is_empty());
    }

    #[tokio::test]
    async fn test_local_resolution_and_cache() {
        let ctx = context();
        let resolver = resolver();
        let first = resolver
            .resolve(ResolveRequest::new("fn_expensive_products", &ctx))
            .await;
        assert_eq!(labels(&first), vec!["Beta", "Gamma"]);
        assert!(!first.meta.from_cache);
        assert_eq!(first.meta.source, ResultSource::LocalCustom);
        let expires = first.meta.expires_at.unwrap();
        assert_eq!((expires - first.meta.fetched_at).num_seconds(), 60);

        let second = resolver
            .resolve(ResolveRequest::new("fn_expensive_products", &ctx))
            .await;
        assert!(second.meta.from_cache);
        assert_eq!(second.options, first.options);

        let refreshed = resolver
            .resolve(ResolveRequest::new("fn_expensive_products", &ctx).force_refresh())
            .await;
        assert!(!refreshed.meta.from_cache);
        assert_eq!(refreshed.options, first.options);
    }

    #[tokio::test]
    async fn test_cache_key_tracks_args_and_runtime() {
        let ctx = context();
        let resolver = resolver();
        resolver
            .resolve(ResolveRequest::new("fn_categories", &ctx))
            .await;
        let other_args = resolver
            .resolve(ResolveRequest::new("fn_categories", &ctx).with_args(json!({"x": 1})))
            .await;
        assert!(!other_args.meta.from_cache);

        let other_runtime = resolver
            .resolve(ResolveRequest::new("fn_categories", &ctx).with_runtime(RuntimeState {
                row_index: Some(9),
                ..Default::default()
            }))
            .await;
        assert!(!other_runtime.meta.from_cache);
        assert_eq!(labels(&other_runtime), vec!["tools", "toys"]);
        assert_eq!(resolver.cache().len(), 3);
    }

    #[tokio::test]
    async fn test_ttl_precedence() {
        let ctx = context();
        let resolver = resolver();
        let result = resolver
            .resolve(ResolveRequest::new("fn_expensive_products", &ctx).with_cache_ttl(5))
            .await;
        let ttl = result.meta.expires_at.unwrap() - result.meta.fetched_at;
        assert_eq!(ttl.num_seconds(), 5);

        let result = resolver
            .resolve(ResolveRequest::new("fn_categories", &ctx))
            .await;
        let ttl = result.meta.expires_at.unwrap() - result.meta.fetched_at;
        assert_eq!(ttl.num_seconds(), 300);
    }

    #[tokio::test]
    async fn test_huge_ttl_override_is_clamped() {
        let ctx = context();
        let resolver = resolver();
        let request = || ResolveRequest::new("fn_expensive_products", &ctx).with_cache_ttl(u64::MAX);
        let result = resolver.resolve(request()).await;
        assert_eq!(labels(&result), vec!["Beta", "Gamma"]);
        let ttl = result.meta.expires_at.unwrap() - result.meta.fetched_at;
        assert_eq!(ttl.num_seconds() as u64, MAX_TTL.as_secs());
        assert!(resolver.resolve(request()).await.meta.from_cache);
    }

    #[tokio::test]
    async fn test_huge_definition_ttl_is_clamped() {
        let mut ctx = context();
        let definition: FunctionDefinition = serde_json::from_value(json!({
            "id": "fn_forever",
            "type": "dsl_v1",
            "cache": {"ttlSeconds": 10_000_000_000_000u64},
            "source": {"type": "grid_rows", "gridId": "products"},
            "output": {"label": "name", "value": "sku"}
        }))
        .unwrap();
        ctx.functions.push(Arc::new(definition));
        let resolver = resolver();
        let result = resolver.resolve(ResolveRequest::new("fn_forever", &ctx)).await;
        assert_eq!(result.options.len(), 3);
        let ttl = result.meta.expires_at.unwrap() - result.meta.fetched_at;
        assert_eq!(ttl.num_seconds() as u64, MAX_TTL.as_secs());
        let again = resolver.resolve(ResolveRequest::new("fn_forever", &ctx)).await;
        assert!(again.meta.from_cache);
    }

    #[tokio::test]
    async fn test_compile_failure_not_cached() {
        let ctx = context();
        let resolver = resolver();
        let result = resolver.resolve(ResolveRequest::new("fn_broken", &ctx)).await;
        assert!(result.options.is_empty());
        assert!(result.warnings[0].contains("failed to compile"));
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("requires an incoming connection")));
        assert!(resolver.cache().is_empty());
    }

    #[tokio::test]
    async fn test_remote_gap_warns_without_caching() {
        let ctx = context();
        let resolver = resolver();
        let result = resolver
            .resolve(ResolveRequest::new("fn_remote_catalog", &ctx))
            .await;
        assert!(result.options.is_empty());
        assert!(result.meta.requires_remote);
        assert!(result.warnings[0].contains("no remote resolver is configured"));
        assert!(resolver.cache().is_empty());
    }

    #[tokio::test]
    async fn test_remote_delegation_adopts_result() {
        let ctx = context();
        let mut remote_result = fixtures::remote_result(vec![fixtures::option("Remote", json!("r1"))]);
        remote_result.warnings.push("served from replica".into());
        let expires = Utc::now() + chrono::Duration::seconds(30);
        remote_result.meta.expires_at = Some(expires);
        let fetched = remote_result.meta.fetched_at;
        let remote = Arc::new(MockRemoteResolver::returning(remote_result));

        let resolver = resolver().with_remote_resolver(remote.clone());
        let result = resolver
            .resolve(ResolveRequest::new("fn_remote_catalog", &ctx).with_args(json!({"q": "x"})))
            .await;
        assert_eq!(labels(&result), vec!["Remote"]);
        assert_eq!(result.meta.source, ResultSource::RemoteCustom);
        assert_eq!(result.meta.fetched_at, fetched);
        assert_eq!(result.meta.expires_at, Some(expires));
        assert_eq!(result.warnings, vec!["served from replica".to_string()]);

        let requests = remote.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].function_id, "fn_remote_catalog");
        assert_eq!(requests[0].args, json!({"q": "x"}));
        assert_eq!(requests[0].runtime.as_ref().and_then(|r| r.row_index), Some(0));

        let again = resolver
            .resolve(ResolveRequest::new("fn_remote_catalog", &ctx).with_args(json!({"q": "x"})))
            .await;
        assert!(again.meta.from_cache);
        assert_eq!(remote.call_count(), 1);
    }

    #[tokio::test]
    async fn test_expired_remote_result_not_cached() {
        let ctx = context();
        let mut remote_result = fixtures::remote_result(vec![fixtures::option("Stale", json!("s"))]);
        let expired = Utc::now() - chrono::Duration::seconds(5);
        remote_result.meta.expires_at = Some(expired);
        let remote = Arc::new(MockRemoteResolver::returning(remote_result));
        let resolver = resolver().with_remote_resolver(remote.clone());

        let first = resolver
            .resolve(ResolveRequest::new("fn_remote_catalog", &ctx))
            .await;
        assert_eq!(labels(&first), vec!["Stale"]);
        assert_eq!(first.meta.expires_at, Some(expired));
        assert!(resolver.cache().is_empty());

        let second = resolver
            .resolve(ResolveRequest::new("fn_remote_catalog", &ctx))
            .await;
        assert!(!second.meta.from_cache);
        assert_eq!(remote.call_count(), 2);
    }

    #[tokio::test]
    async fn test_remote_without_expiry_uses_local_ttl() {
        let ctx = context();
        let remote = Arc::new(MockRemoteResolver::returning(fixtures::remote_result(vec![
            fixtures::option("R", json!("r")),
        ])));
        let resolver = resolver().with_remote_resolver(remote.clone());
        let result = resolver
            .resolve(ResolveRequest::new("fn_remote_catalog", &ctx).with_cache_ttl(90))
            .await;
        let remaining = result.meta.expires_at.unwrap() - Utc::now();
        assert!(remaining.num_seconds() > 80 && remaining.num_seconds() <= 90);
        assert_eq!(resolver.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_request_remote_resolver_wins() {
        let ctx = context();
        let shared = Arc::new(MockRemoteResolver::failing("should not be called"));
        let per_call = Arc::new(MockRemoteResolver::returning(fixtures::remote_result(vec![])));
        let resolver = resolver().with_remote_resolver(shared.clone());
        resolver
            .resolve(ResolveRequest::new("fn_remote_catalog", &ctx).with_remote_resolver(per_call.clone()))
            .await;
        assert_eq!(shared.call_count(), 0);
        assert_eq!(per_call.call_count(), 1);
    }

    #[tokio::test]
    async fn test_remote_requiring_remote_is_config_error() {
        let ctx = context();
        let mut remote_result = fixtures::remote_result(vec![fixtures::option("X", json!("x"))]);
        remote_result.meta.requires_remote = true;
        let resolver =
            resolver().with_remote_resolver(Arc::new(MockRemoteResolver::returning(remote_result)));
        let result = resolver
            .resolve(ResolveRequest::new("fn_remote_catalog", &ctx))
            .await;
        assert!(result.options.is_empty());
        assert!(result.warnings[0].contains("must not require further delegation"));
        assert!(resolver.cache().is_empty());
    }

    #[tokio::test]
    async fn test_remote_failure_becomes_warning() {
        let ctx = context();
        let resolver =
            resolver().with_remote_resolver(Arc::new(MockRemoteResolver::failing("upstream down")));
        let result = resolver
            .resolve(ResolveRequest::new("fn_remote_catalog", &ctx))
            .await;
        assert!(result.options.is_empty());
        assert_eq!(result.warnings, vec!["Remote resolver failed: upstream down".to_string()]);
        assert_eq!(result.meta.source, ResultSource::RemoteCustom);
    }

    #[tokio::test]
    async fn test_allow_http_get_runs_locally_with_secret() {
        let mut ctx = context();
        ctx.connectors[0].auth = optionflow_core::ConnectorAuth::SecretRef {
            secret_ref_id: "catalog_token".into(),
        };
        let transport = Arc::new(MockTransport::new().with_json(
            "https://api.example.com/items?q=ham",
            json!({"items": [{"title": "Hammer", "code": "h"}]}),
        ));
        let secrets = Arc::new(MockSecretResolver::new().with_secret("catalog_token", "tkn"));
        let resolver = OptionResolver::new(EngineConfig::default()).with_transport(transport.clone());
        let result = resolver
            .resolve(
                ResolveRequest::new("fn_remote_catalog", &ctx)
                    .with_args(json!({"q": "ham"}))
                    .allow_http_get()
                    .with_secret_resolver(secrets.clone()),
            )
            .await;
        assert_eq!(labels(&result), vec!["Hammer"]);
        assert_eq!(result.meta.source, ResultSource::LocalCustom);
        assert_eq!(secrets.lookups(), vec!["catalog_token"]);
        let sent = transport.requests();
        assert!(sent[0]
            .headers
            .contains(&("Authorization".to_string(), "Bearer tkn".to_string())));
    }

    #[tokio::test]
    async fn test_ai_step_with_extractor() {
        let mut ctx = context();
        let definition: FunctionDefinition = serde_json::from_value(json!({
            "id": "fn_ai",
            "type": "dsl_v1",
            "source": {"type": "grid_rows", "gridId": "products"},
            "transforms": [{"type": "ai_extract_options", "prompt": "brands"}],
            "output": {"label": "label", "value": "value"}
        }))
        .unwrap();
        ctx.functions.push(Arc::new(definition));
        let extractor = Arc::new(MockAiExtractor::returning(vec![json!({"label": "Acme", "value": "acme"})]));
        let result = resolver()
            .resolve(
                ResolveRequest::new("fn_ai", &ctx)
                    .allow_http_get()
                    .with_ai_extractor(extractor.clone()),
            )
            .await;
        assert_eq!(labels(&result), vec!["Acme"]);
        assert_eq!(extractor.requests()[0].max_rows, 100);
        assert_eq!(extractor.requests()[0].input.as_array().map(Vec::len), Some(3));
    }

    #[tokio::test]
    async fn test_expr_evaluator_wired_through() {
        let mut ctx = context();
        let definition: FunctionDefinition = serde_json::from_value(json!({
            "id": "fn_expr",
            "type": "dsl_v1",
            "source": {"type": "grid_rows", "gridId": "products"},
            "transforms": [{"type": "filter", "expr": {"truthy": "featured"}}],
            "output": {"label": "name", "value": "sku"}
        }))
        .unwrap();
        ctx.functions.push(Arc::new(definition));
        ctx.grid_data.insert(
            "products".into(),
            vec![json!({"name": "A", "sku": "a", "featured": true}), json!({"name": "B", "sku": "b"})],
        );
        let evaluator = Arc::new(MockExprEvaluator::new());
        let resolver = resolver().with_expr_evaluator(evaluator.clone());
        let result = resolver.resolve(ResolveRequest::new("fn_expr", &ctx)).await;
        assert_eq!(labels(&result), vec!["A"]);
        assert_eq!(evaluator.calls(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_resolutions() {
        let ctx = Arc::new(context());
        let resolver = Arc::new(resolver());
        let mut handles = Vec::new();
        for i in 0..8 {
            let ctx = ctx.clone();
            let resolver = resolver.clone();
            handles.push(tokio::spawn(async move {
                let function_id = if i % 2 == 0 { "fn_expensive_products" } else { "fn_categories" };
                resolver
                    .resolve(ResolveRequest::new(function_id, &ctx))
                    .await
                    .options
                    .len()
            }));
        }
        for handle in handles {
            let count = handle.await.unwrap();
            assert_eq!(count, 2);
        }
        assert_eq!(resolver.cache().len(), 2);
    }
}
