use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ParleyError, Result};
use crate::flow::ModelOverrides;

/// Top-level Parley configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    pub model: ModelConfig,
    /// Credentials for providers selected by per-node overrides.
    #[serde(default)]
    pub providers: HashMap<String, ProviderCredentials>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub retrieval: Option<RetrievalConfig>,
    #[serde(default)]
    pub gateway: Option<GatewayConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Ceiling on node executions within one turn.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Number of stream events buffered before a flush.
    #[serde(default = "default_stream_batch_size")]
    pub stream_batch_size: usize,
    /// Shown by an interface node that has nothing else to display.
    #[serde(default = "default_fallback_message")]
    pub fallback_message: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            stream_batch_size: default_stream_batch_size(),
            fallback_message: default_fallback_message(),
        }
    }
}

fn default_max_steps() -> usize { 100 }
fn default_stream_batch_size() -> usize { 4 }
fn default_fallback_message() -> String { "How can I help you today?".to_string() }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 2048 }
fn default_temperature() -> f32 { 0.7 }

impl ModelConfig {
    pub fn new(provider: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model_id: model_id.into(),
            api_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            retry: None,
        }
    }

    /// Apply per-node overrides on top of this configuration.
    ///
    /// Switching provider drops the configured credentials and endpoint, which
    /// belong to the default provider.
    pub fn with_overrides(&self, overrides: &ModelOverrides) -> Self {
        let mut config = self.clone();
        if let Some(ref provider) = overrides.provider {
            if *provider != config.provider {
                config.provider = provider.clone();
                config.api_key = None;
                config.base_url = None;
            }
        }
        if let Some(ref model) = overrides.model {
            config.model_id = model.clone();
        }
        if let Some(temperature) = overrides.temperature {
            config.temperature = temperature;
        }
        if let Some(max_tokens) = overrides.max_tokens {
            config.max_tokens = max_tokens;
        }
        config
    }
}

/// API key and endpoint for one provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderCredentials {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Retry configuration for LLM requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Where conversations and flows live on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_workspace")]
    pub workspace: String,
    #[serde(default = "default_database")]
    pub database: String,
    /// Directory of `<flow_id>.json` files. Default: <workspace>/flows
    #[serde(default)]
    pub flows_dir: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            database: default_database(),
            flows_dir: None,
        }
    }
}

fn default_workspace() -> String { "~/.parley".to_string() }
fn default_database() -> String { "conversations.db".to_string() }

/// Knowledge retrieval backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_retrieval_url")]
    pub base_url: String,
    #[serde(default = "default_retrieval_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Process to supervise; absent when the backend runs elsewhere.
    #[serde(default)]
    pub backend: Option<BackendConfig>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            base_url: default_retrieval_url(),
            timeout_secs: default_retrieval_timeout(),
            api_key: None,
            backend: None,
        }
    }
}

fn default_retrieval_url() -> String { "http://127.0.0.1:8700".to_string() }
fn default_retrieval_timeout() -> u64 { 30 }

/// A retrieval backend process owned by the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,
}

fn default_health_path() -> String { "/health".to_string() }
fn default_startup_timeout() -> u64 { 30 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String { "127.0.0.1:18790".to_string() }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| ParleyError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| ParleyError::Config(e.to_string()))
    }

    /// Resolve the workspace directory (expand ~).
    pub fn workspace_dir(&self) -> PathBuf {
        expand_home(&self.store.workspace)
    }

    pub fn database_path(&self) -> PathBuf {
        self.workspace_dir().join(&self.store.database)
    }

    pub fn flows_dir(&self) -> PathBuf {
        match self.store.flows_dir {
            Some(ref dir) => expand_home(dir),
            None => self.workspace_dir().join("flows"),
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
