//! Application configuration
//!
//! Defaults, then an optional YAML file, then `NLGRAPH_*` environment
//! overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "nlgraph.yaml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Supported LLM providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LLMProvider {
    OpenAI,
    Ollama,
    Gemini,
    Anthropic,
    /// Always answers with an empty completion
    #[default]
    Mock,
}

impl std::str::FromStr for LLMProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(LLMProvider::OpenAI),
            "ollama" => Ok(LLMProvider::Ollama),
            "gemini" => Ok(LLMProvider::Gemini),
            "anthropic" => Ok(LLMProvider::Anthropic),
            "mock" => Ok(LLMProvider::Mock),
            other => Err(format!("unknown LLM provider `{}`", other)),
        }
    }
}

/// Which graph-store mechanism backs the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StoreBackend {
    /// In-process graphs, one per version name
    #[default]
    Embedded,
    /// A graph server reached over HTTP
    Remote,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub pipeline: PipelineConfig,
    pub store: StoreConfig,
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8090,
        }
    }
}

/// Configuration for NLQ features
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// The LLM provider to use
    pub provider: LLMProvider,
    /// Model name (e.g., "gpt-4o", "llama3")
    pub model: String,
    /// API Key (optional for local providers)
    pub api_key: Option<String>,
    /// API Base URL (optional, provider default otherwise)
    pub api_base_url: Option<String>,
    /// System prompt for the LLM
    pub system_prompt: Option<String>,
    /// Transport-level timeout of one HTTP call
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LLMProvider::Mock,
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            api_base_url: None,
            system_prompt: None,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub reasoning_timeout_ms: u64,
    pub synthesis_timeout_ms: u64,
    pub exploration_timeout_ms: u64,
    /// Upper bound on exploration queries per request (at most 10)
    pub max_exploration_queries: usize,
    /// How many entity captions an exploration summary may list
    pub summary_label_limit: usize,
    pub default_graph_version: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            reasoning_timeout_ms: 30_000,
            synthesis_timeout_ms: 30_000,
            exploration_timeout_ms: 5_000,
            max_exploration_queries: 10,
            summary_label_limit: 10,
            default_graph_version: "main".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub remote_url: String,
    /// JSON dataset seeded into every embedded version
    pub dataset_path: Option<PathBuf>,
    /// Version names created by the embedded backend
    pub versions: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Embedded,
            remote_url: "http://127.0.0.1:8080".to_string(),
            dataset_path: None,
            versions: vec!["main".to_string()],
        }
    }
}

impl AppConfig {
    /// Load configuration.
    ///
    /// An explicit `path` must exist; without one, `nlgraph.yaml` in the
    /// working directory is used when present.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.normalize();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    /// Apply `NLGRAPH_*` overrides read through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<()> {
        if let Some(host) = lookup("NLGRAPH_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("NLGRAPH_PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "NLGRAPH_PORT".to_string(),
                value: port,
            })?;
        }
        if let Some(provider) = lookup("NLGRAPH_LLM_PROVIDER") {
            self.llm.provider = provider.parse().map_err(|_| ConfigError::InvalidValue {
                key: "NLGRAPH_LLM_PROVIDER".to_string(),
                value: provider,
            })?;
        }
        if let Some(model) = lookup("NLGRAPH_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(key) = lookup("NLGRAPH_LLM_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(url) = lookup("NLGRAPH_LLM_BASE_URL") {
            self.llm.api_base_url = Some(url);
        }
        if let Some(url) = lookup("NLGRAPH_STORE_URL") {
            self.store.remote_url = url;
            self.store.backend = StoreBackend::Remote;
        }
        if let Some(path) = lookup("NLGRAPH_DATASET") {
            self.store.dataset_path = Some(PathBuf::from(path));
        }
        if let Some(level) = lookup("NLGRAPH_LOG_LEVEL") {
            self.log_level = level;
        }
        Ok(())
    }

    fn normalize(&mut self) {
        self.pipeline.max_exploration_queries = self.pipeline.max_exploration_queries.min(10);
        if self.log_level.trim().is_empty() {
            self.log_level = "info".to_string();
        }
        if self.store.versions.is_empty() {
            self.store.versions.push(self.pipeline.default_graph_version.clone());
        }
    }

    /// Get the server bind address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
