use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OptionFlowError, Result};

/// Top-level engine configuration. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub plans: PlanCacheConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub ai: AiConfig,
}

/// Resolved-result cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL used when neither the call nor the definition sets one.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    /// Entry count past which expired entries are purged.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            max_entries: default_max_entries(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_max_entries() -> usize {
    1024
}

/// Compiled-plan cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanCacheConfig {
    /// Signature-cache size at which it is cleared.
    #[serde(default = "default_signature_capacity")]
    pub signature_capacity: usize,
}

impl Default for PlanCacheConfig {
    fn default() -> Self {
        Self {
            signature_capacity: default_signature_capacity(),
        }
    }
}

fn default_signature_capacity() -> usize {
    256
}

/// Outbound calls made by `source.http_get`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_response_bytes: default_max_response_bytes(),
            user_agent: default_user_agent(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_response_bytes() -> usize {
    1024 * 1024
}

fn default_user_agent() -> String {
    format!("optionflow/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Hard cap on options returned by a single resolution.
    #[serde(default = "default_max_options")]
    pub max_options: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            max_options: default_max_options(),
        }
    }
}

fn default_max_options() -> usize {
    500
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiConfig {
    /// Row cap for `ai.extract_options` nodes that do not set `maxRows`.
    #[serde(default = "default_ai_max_rows")]
    pub default_max_rows: usize,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            default_max_rows: default_ai_max_rows(),
        }
    }
}

fn default_ai_max_rows() -> usize {
    100
}

impl EngineConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| OptionFlowError::ConfigNotFound(path.display().to_string()))?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "Loaded engine config");
        Ok(config)
    }

    /// Parse config from TOML text, with env var expansion.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self =
            toml::from_str(&expanded).map_err(|e| OptionFlowError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.http.max_response_bytes == 0 {
            return Err(OptionFlowError::Config(
                "http.max_response_bytes must be greater than zero".into(),
            ));
        }
        if self.output.max_options == 0 {
            return Err(OptionFlowError::Config(
                "output.max_options must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Keep original if env var not set
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}
