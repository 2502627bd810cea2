use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;

use optionflow_core::path::{get_row_path, is_truthy, normalize_row};
use optionflow_core::traits::{
    AiExtractor, ExprEvaluator, HttpTransport, RemoteResolver, SecretResolver,
};
use optionflow_core::{
    AiExtractRequest, HttpRequest, HttpResponse, OptionFlowError, RemoteRequest, ResolveResult,
    Result, Row,
};

// ── HTTP ────────────────────────────────────────────────────────

/// Canned responses keyed by exact URL. Unknown URLs answer 404.
#[derive(Default)]
pub struct MockTransport {
    routes: HashMap<String, HttpResponse>,
    delay: Option<Duration>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_json(self, url: &str, body: Value) -> Self {
        self.with_body(url, body.to_string().into_bytes())
    }

    pub fn with_body(mut self, url: &str, body: Vec<u8>) -> Self {
        self.routes
            .insert(url.to_string(), HttpResponse { status: 200, body });
        self
    }

    pub fn with_status(mut self, url: &str, status: u16) -> Self {
        self.routes.insert(
            url.to_string(),
            HttpResponse {
                status,
                body: Vec::new(),
            },
        );
        self
    }

    /// Sleep before answering every request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl HttpTransport for MockTransport {
    fn get(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self
                .routes
                .get(&request.url)
                .cloned()
                .unwrap_or(HttpResponse {
                    status: 404,
                    body: Vec::new(),
                }))
        })
    }
}

// ── Secrets ─────────────────────────────────────────────────────

/// Async secret store that remembers which ids were asked for.
#[derive(Default)]
pub struct MockSecretResolver {
    secrets: HashMap<String, String>,
    lookups: Mutex<Vec<String>>,
}

impl MockSecretResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, id: &str, value: &str) -> Self {
        self.secrets.insert(id.to_string(), value.to_string());
        self
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }
}

impl SecretResolver for MockSecretResolver {
    fn resolve<'a>(&'a self, secret_ref_id: &'a str) -> BoxFuture<'a, Option<String>> {
        Box::pin(async move {
            self.lookups.lock().unwrap().push(secret_ref_id.to_string());
            tokio::task::yield_now().await;
            self.secrets.get(secret_ref_id).cloned()
        })
    }
}

// ── AI ──────────────────────────────────────────────────────────

/// Returns fixed rows (or a fixed error) and records each request.
pub struct MockAiExtractor {
    outcome: std::result::Result<Vec<Row>, String>,
    requests: Mutex<Vec<AiExtractRequest>>,
}

impl MockAiExtractor {
    pub fn returning(rows: Vec<Value>) -> Self {
        Self {
            outcome: Ok(rows.into_iter().map(normalize_row).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            outcome: Err(message.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<AiExtractRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl AiExtractor for MockAiExtractor {
    fn extract(&self, request: AiExtractRequest) -> BoxFuture<'_, Result<Vec<Row>>> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request);
            self.outcome.clone().map_err(OptionFlowError::Extractor)
        })
    }
}

// ── Remote ──────────────────────────────────────────────────────

/// Answers every remote request with the same result (or error).
pub struct MockRemoteResolver {
    outcome: std::result::Result<ResolveResult, String>,
    requests: Mutex<Vec<RemoteRequest>>,
}

impl MockRemoteResolver {
    pub fn returning(result: ResolveResult) -> Self {
        Self {
            outcome: Ok(result),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            outcome: Err(message.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<RemoteRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl RemoteResolver for MockRemoteResolver {
    fn resolve(&self, request: RemoteRequest) -> BoxFuture<'_, Result<ResolveResult>> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request);
            self.outcome.clone().map_err(OptionFlowError::Remote)
        })
    }
}

// ── Expressions ─────────────────────────────────────────────────

/// Understands a single expression shape: `{"truthy": "<row path>"}`.
#[derive(Default)]
pub struct MockExprEvaluator {
    calls: AtomicUsize,
}

impl MockExprEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ExprEvaluator for MockExprEvaluator {
    fn evaluate(&self, expr: &Value, row: &Row, _scope: &Value) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        expr.get("truthy")
            .and_then(Value::as_str)
            .and_then(|path| get_row_path(row, path))
            .is_some_and(is_truthy)
    }
}
