use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::Result;
use crate::types::{AiExtractRequest, HttpRequest, HttpResponse, RemoteRequest, ResolveResult, Row};

/// Turns a connector's `secretRefId` into a bearer token.
///
/// Closures `Fn(&str) -> Option<String>` implement this for the synchronous case.
pub trait SecretResolver: Send + Sync + 'static {
    fn resolve<'a>(&'a self, secret_ref_id: &'a str) -> BoxFuture<'a, Option<String>>;
}

impl<F> SecretResolver for F
where
    F: Fn(&str) -> Option<String> + Send + Sync + 'static,
{
    fn resolve<'a>(&'a self, secret_ref_id: &'a str) -> BoxFuture<'a, Option<String>> {
        let value = self(secret_ref_id);
        Box::pin(async move { value })
    }
}

/// Caller-supplied row extractor. The engine never talks to a model itself.
pub trait AiExtractor: Send + Sync + 'static {
    fn extract(&self, request: AiExtractRequest) -> BoxFuture<'_, Result<Vec<Row>>>;
}

/// Expression strategy for `transform.filter`'s optional `expr` tree.
///
/// `scope` carries `{ args, context }` for expressions that reference them.
pub trait ExprEvaluator: Send + Sync + 'static {
    fn evaluate(&self, expr: &Value, row: &Row, scope: &Value) -> bool;
}

impl<F> ExprEvaluator for F
where
    F: Fn(&Value, &Row, &Value) -> bool + Send + Sync + 'static,
{
    fn evaluate(&self, expr: &Value, row: &Row, scope: &Value) -> bool {
        self(expr, row, scope)
    }
}

/// Performs a single GET.
///
/// Implementations must honour `request.timeout` and stop reading once the
/// body passes `request.max_bytes`.
pub trait HttpTransport: Send + Sync + 'static {
    fn get(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>>;
}

/// Runs a custom function somewhere with server-only capabilities.
///
/// Remote resolvers are terminal: a result that still reports
/// `requires_remote` is treated as a misconfiguration.
pub trait RemoteResolver: Send + Sync + 'static {
    fn resolve(&self, request: RemoteRequest) -> BoxFuture<'_, Result<ResolveResult>>;
}
