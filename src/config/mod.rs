pub mod validation;

use serde::{Deserialize, Serialize};
use std::fmt;

use self::validation::validate_config;

/// Environment variable consulted when `upstream.api_key` is left empty.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// How a chat response is assembled from the completion service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Streamed completion with native function calling.
    #[default]
    Function,
    /// One complete completion in the tagged `<reasoning>`/`<tool>` format.
    Xml,
}

impl ResponseMode {
    /// Parse the `mode` query parameter value.
    #[must_use]
    pub fn from_query_value(value: &str) -> Option<Self> {
        match value {
            "function" => Some(ResponseMode::Function),
            "xml" => Some(ResponseMode::Xml),
            _ => None,
        }
    }
}

impl fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseMode::Function => write!(f, "function"),
            ResponseMode::Xml => write!(f, "xml"),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_http_pool_max_idle_per_host")]
    pub http_pool_max_idle_per_host: usize,
    #[serde(default = "default_http_pool_idle_timeout_secs")]
    pub http_pool_idle_timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
    #[serde(default)]
    pub base_path: String,
    #[serde(default)]
    pub http_use_env_proxy: bool,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_timeout() -> u64 {
    180
}
fn default_http_pool_max_idle_per_host() -> usize {
    16
}
fn default_http_pool_idle_timeout_secs() -> u64 {
    15
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            timeout: default_timeout(),
            http_pool_max_idle_per_host: default_http_pool_max_idle_per_host(),
            http_pool_idle_timeout_secs: default_http_pool_idle_timeout_secs(),
            runtime_worker_threads: None,
            base_path: String::new(),
            http_use_env_proxy: false,
        }
    }
}

/// Completion service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_upstream_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-4o".to_string()
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_upstream_base_url(),
            api_key: String::new(),
            model: default_model(),
        }
    }
}

/// Settings for the built-in tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_weather_base_url")]
    pub weather_base_url: String,
}

fn default_weather_base_url() -> String {
    "https://api.open-meteo.com/v1/forecast".to_string()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            weather_base_url: default_weather_base_url(),
        }
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub default_mode: ResponseMode,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            default_mode: ResponseMode::default(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// Load configuration from a YAML file, resolve the API key and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    load_config_from_str(&contents, std::env::var(API_KEY_ENV).ok())
}

/// Parse and validate configuration text; `env_api_key` fills an empty
/// `upstream.api_key`.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] when parsing fails, or
/// [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config_from_str(
    contents: &str,
    env_api_key: Option<String>,
) -> Result<AppConfig, ConfigError> {
    let mut config: AppConfig = serde_yaml::from_str(contents)?;
    if config.upstream.api_key.trim().is_empty() {
        if let Some(key) = env_api_key {
            config.upstream.api_key = key;
        }
    }
    validate_config(&config)?;
    Ok(config)
}
