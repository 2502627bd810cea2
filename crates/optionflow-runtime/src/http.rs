//! Outbound GETs for `source.http_get`: template interpolation, URL and
//! header assembly, host allowlisting, bearer auth, and the default
//! reqwest-backed transport.

use std::sync::OnceLock;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::StreamExt;
use regex::{Captures, Regex};
use reqwest::Url;
use serde_json::Value;
use tracing::{debug, warn};

use optionflow_core::config::HttpConfig;
use optionflow_core::path::{get_path, value_to_string};
use optionflow_core::traits::{HttpTransport, SecretResolver};
use optionflow_core::{
    ConnectorAuth, ConnectorDefinition, HttpRequest, HttpResponse, OptionFlowError, Result,
};
use optionflow_graph::steps::HttpGetConfig;

// ── Templates ───────────────────────────────────────────────────

/// `{{arg.x}}` / `{{context.x}}` tokens, compiled once.
fn template_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*(arg|context)\.([^{}\s]+)\s*\}\}")
            .expect("Failed to compile template token pattern")
    })
}

/// Replace `{{arg.x}}` and `{{context.x}}` tokens. Unresolved tokens become
/// the empty string.
pub fn interpolate(template: &str, args: &Value, scope: &Value) -> String {
    template_pattern()
        .replace_all(template, |caps: &Captures<'_>| {
            let root = if &caps[1] == "arg" { args } else { scope };
            get_path(root, &caps[2])
                .map(value_to_string)
                .unwrap_or_default()
        })
        .into_owned()
}

// ── Request assembly ────────────────────────────────────────────

/// Join `base_url` and `path`, append the query, and check the scheme and
/// host allowlist.
pub fn build_url(
    connector: &ConnectorDefinition,
    path: &str,
    query: &[(String, String)],
) -> Result<Url> {
    let base = connector.base_url.trim_end_matches('/');
    let joined = if path.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, path.trim_start_matches('/'))
    };

    let invalid = |message: String| OptionFlowError::InvalidUrl {
        connector: connector.id.clone(),
        message,
    };

    let mut url = Url::parse(&joined).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme \"{}\"", url.scheme())));
    }
    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in query {
            pairs.append_pair(key, value);
        }
    }

    let host = url
        .host_str()
        .ok_or_else(|| invalid("missing host".to_string()))?;
    if !connector.allows_host(host) {
        return Err(OptionFlowError::HostNotAllowed {
            connector: connector.id.clone(),
            host: host.to_string(),
        });
    }
    Ok(url)
}

fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: String) {
    headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
    headers.push((name.to_string(), value));
}

/// Everything a `source.http_get` node needs besides its own config.
pub struct HttpGetEnv<'a> {
    pub transport: &'a dyn HttpTransport,
    pub secrets: Option<&'a dyn SecretResolver>,
    pub config: &'a HttpConfig,
    pub args: &'a Value,
    pub scope: &'a Value,
}

/// Prepare the request a node describes.
pub async fn prepare_request(
    connector: &ConnectorDefinition,
    step: &HttpGetConfig,
    env: &HttpGetEnv<'_>,
) -> Result<HttpRequest> {
    let path = interpolate(&step.path, env.args, env.scope);
    let query: Vec<(String, String)> = step
        .query
        .iter()
        .map(|(k, v)| (k.clone(), interpolate(v, env.args, env.scope)))
        .collect();
    let url = build_url(connector, &path, &query)?;

    let mut headers = Vec::new();
    for (name, value) in &connector.default_headers {
        set_header(&mut headers, name, value.clone());
    }
    for (name, value) in &step.headers {
        set_header(&mut headers, name, interpolate(value, env.args, env.scope));
    }

    if let ConnectorAuth::SecretRef { secret_ref_id } = &connector.auth {
        let token = match env.secrets {
            Some(resolver) => resolver.resolve(secret_ref_id).await,
            None => None,
        };
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| OptionFlowError::SecretUnresolved(secret_ref_id.clone()))?;
        set_header(&mut headers, "Authorization", format!("Bearer {}", token));
    }

    Ok(HttpRequest {
        url: url.to_string(),
        headers,
        timeout: step
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| env.config.timeout()),
        max_bytes: env.config.max_response_bytes,
    })
}

/// Run a `source.http_get` step end to end and parse the JSON payload.
pub async fn fetch_json(
    connector: &ConnectorDefinition,
    step: &HttpGetConfig,
    env: &HttpGetEnv<'_>,
) -> Result<Value> {
    let request = prepare_request(connector, step, env).await?;
    let timeout = request.timeout;
    let max_bytes = request.max_bytes;
    debug!(connector_id = %connector.id, url = %request.url, "HTTP GET");

    let response = tokio::time::timeout(timeout, env.transport.get(request))
        .await
        .map_err(|_| OptionFlowError::HttpTimeout(timeout.as_millis() as u64))??;

    if !response.is_success() {
        return Err(OptionFlowError::HttpStatus {
            connector: connector.id.clone(),
            status: response.status,
        });
    }
    if response.body.len() > max_bytes {
        return Err(OptionFlowError::ResponseTooLarge { limit: max_bytes });
    }
    serde_json::from_slice(&response.body)
        .map_err(|e| OptionFlowError::ResponseNotJson(e.to_string()))
}

// ── Default transport ───────────────────────────────────────────

/// `HttpTransport` backed by a shared `reqwest::Client`.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &HttpConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self { client }
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>> {
        Box::pin(async move {
            let timeout_ms = request.timeout.as_millis() as u64;
            let map_err = |e: reqwest::Error| {
                if e.is_timeout() {
                    OptionFlowError::HttpTimeout(timeout_ms)
                } else {
                    OptionFlowError::HttpRequest(e.to_string())
                }
            };

            let mut builder = self.client.get(&request.url).timeout(request.timeout);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            let response = builder.send().await.map_err(map_err)?;

            let status = response.status().as_u16();
            if !response.status().is_success() {
                return Ok(HttpResponse {
                    status,
                    body: Vec::new(),
                });
            }
            if response
                .content_length()
                .is_some_and(|len| len > request.max_bytes as u64)
            {
                return Err(OptionFlowError::ResponseTooLarge {
                    limit: request.max_bytes,
                });
            }

            let mut body = Vec::new();
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(map_err)?;
                if body.len() + chunk.len() > request.max_bytes {
                    return Err(OptionFlowError::ResponseTooLarge {
                        limit: request.max_bytes,
                    });
                }
                body.extend_from_slice(&chunk);
            }
            Ok(HttpResponse { status, body })
        })
    }
}
