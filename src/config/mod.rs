//! Configuration management.
//!
//! nodeflow configuration can come from:
//! - Environment variables (NODEFLOW_*)
//! - Config file (~/.config/nodeflow/config.toml)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// nodeflow configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    /// HTTP request node settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Voice calling service used by the voiceCall node
    #[serde(default)]
    pub voice: VoiceConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Execution engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Run timeout when the workflow settings do not set one (seconds, 0 = none)
    #[serde(default = "default_execution_timeout")]
    pub execution_timeout_seconds: u64,

    /// Upper bound on node activations in a single run
    #[serde(default = "default_max_activations")]
    pub max_activations: usize,

    /// Wait between retries when a node does not set `waitBetweenTries` (ms)
    #[serde(default = "default_retry_wait")]
    pub default_retry_wait_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            execution_timeout_seconds: default_execution_timeout(),
            max_activations: default_max_activations(),
            default_retry_wait_ms: default_retry_wait(),
        }
    }
}

fn default_execution_timeout() -> u64 {
    3600
}

fn default_max_activations() -> usize {
    10_000
}

fn default_retry_wait() -> u64 {
    1000
}

/// HTTP request node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Default request timeout (seconds)
    #[serde(default = "default_http_timeout")]
    pub timeout_seconds: u64,

    /// Allow requests to localhost and private networks
    #[serde(default)]
    pub allow_internal_urls: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_http_timeout(),
            allow_internal_urls: false,
        }
    }
}

fn default_http_timeout() -> u64 {
    30
}

/// Voice calling service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Base URL of the voice API; the voiceCall node is unavailable without one
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Name of the environment variable holding the API key
    #[serde(default = "default_voice_key_env")]
    pub api_key_env: String,

    /// Poll interval while waiting for a call to finish (seconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,

    /// Longest a node waits for call completion (seconds)
    #[serde(default = "default_max_wait")]
    pub max_wait_seconds: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key_env: default_voice_key_env(),
            poll_interval_seconds: default_poll_interval(),
            max_wait_seconds: default_max_wait(),
        }
    }
}

impl VoiceConfig {
    /// API key read from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

fn default_voice_key_env() -> String {
    "NODEFLOW_VOICE_API_KEY".to_string()
}

fn default_poll_interval() -> u64 {
    5
}

fn default_max_wait() -> u64 {
    600
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "nodeflow=info".to_string()
}

impl Config {
    /// Load configuration from default locations.
    pub fn load() -> Self {
        let mut config = Self::default();

        let primary_path = Self::config_dir().join("config.toml");
        if let Ok(partial) = Self::load_partial_from_path(&primary_path) {
            config.apply_partial(partial);
        }

        config.apply_env_overrides();
        config
    }

    /// Load an explicit config file, then apply environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from TOML text (no environment overrides).
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let partial: PartialConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        let mut config = Self::default();
        config.apply_partial(partial);
        Ok(config)
    }

    /// Get the config directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("nodeflow"))
            .unwrap_or_else(|| PathBuf::from(".nodeflow"))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(timeout) = std::env::var("NODEFLOW_EXECUTION_TIMEOUT_SECONDS") {
            if let Ok(parsed) = timeout.parse::<u64>() {
                self.engine.execution_timeout_seconds = parsed;
            }
        }
        if let Ok(max) = std::env::var("NODEFLOW_MAX_ACTIVATIONS") {
            if let Ok(parsed) = max.parse::<usize>() {
                self.engine.max_activations = parsed;
            }
        }
        if let Ok(timeout) = std::env::var("NODEFLOW_HTTP_TIMEOUT_SECONDS") {
            if let Ok(parsed) = timeout.parse::<u64>() {
                self.http.timeout_seconds = parsed;
            }
        }
        if let Ok(allow) = std::env::var("NODEFLOW_ALLOW_INTERNAL_URLS") {
            self.http.allow_internal_urls = matches!(allow.as_str(), "1" | "true" | "yes");
        }
        if let Ok(endpoint) = std::env::var("NODEFLOW_VOICE_ENDPOINT") {
            self.voice.endpoint = Some(endpoint);
        }
        if let Ok(level) = std::env::var("NODEFLOW_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(json) = std::env::var("NODEFLOW_LOG_JSON") {
            self.logging.json = matches!(json.as_str(), "1" | "true" | "yes");
        }
    }

    fn load_partial_from_path(path: &Path) -> std::result::Result<PartialConfig, ()> {
        let content = std::fs::read_to_string(path).map_err(|_| ())?;
        toml::from_str(&content).map_err(|_| ())
    }

    fn apply_partial(&mut self, partial: PartialConfig) {
        if let Some(engine) = partial.engine {
            self.engine = engine;
        }
        if let Some(http) = partial.http {
            self.http = http;
        }
        if let Some(voice) = partial.voice {
            self.voice = voice;
        }
        if let Some(logging) = partial.logging {
            self.logging = logging;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    engine: Option<EngineConfig>,
    http: Option<HttpConfig>,
    voice: Option<VoiceConfig>,
    logging: Option<LoggingConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.engine.execution_timeout_seconds, 3600);
        assert_eq!(config.engine.max_activations, 10_000);
        assert_eq!(config.http.timeout_seconds, 30);
        assert!(!config.http.allow_internal_urls);
        assert!(config.voice.endpoint.is_none());
        assert_eq!(config.logging.level, "nodeflow=info");
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let config = Config::from_toml_str(
            r#"
[http]
allow_internal_urls = true

[voice]
endpoint = "https://voice.example.com/v1"
"#,
        )
        .unwrap();
        assert!(config.http.allow_internal_urls);
        assert_eq!(config.http.timeout_seconds, 30);
        assert_eq!(
            config.voice.endpoint.as_deref(),
            Some("https://voice.example.com/v1")
        );
        assert_eq!(config.voice.poll_interval_seconds, 5);
        assert_eq!(config.engine.default_retry_wait_ms, 1000);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = Config::from_toml_str("[engine\nmax = ").unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[engine]\nmax_activations = 42").unwrap();
        let config = Config::load_from_path(file.path()).unwrap();
        assert_eq!(config.engine.max_activations, 42);
    }
}
