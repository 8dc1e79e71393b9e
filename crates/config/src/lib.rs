//! Configuration loading, validation, and management for Convoke.
//!
//! Loads configuration from `~/.convoke/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.convoke/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default API key, used by the operator binary for scopes without one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Durable storage settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Debounced save settings
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Orchestration loop settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Settings applied to scopes the first time they are seen
    #[serde(default)]
    pub scope_defaults: ScopeDefaults,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_true() -> bool {
    true
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field(
                "api_key",
                &match self.api_key {
                    Some(_) => "[REDACTED]",
                    None => "None",
                },
            )
            .field("api_url", &self.api_url)
            .field("storage", &self.storage)
            .field("persistence", &self.persistence)
            .field("orchestrator", &self.orchestrator)
            .field("scope_defaults", &self.scope_defaults)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path of the DB document. Defaults to `~/.convoke/db.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl StorageConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| AppConfig::config_dir().join("db.json"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Seconds between periodic saves
    #[serde(default = "default_save_interval")]
    pub interval_secs: u64,

    /// Seconds to wait after startup before the first periodic save
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,
}

fn default_save_interval() -> u64 {
    120
}
fn default_initial_delay() -> u64 {
    30
}

impl PersistenceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_save_interval(),
            initial_delay_secs: default_initial_delay(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Wall-clock timeout for a single model call
    #[serde(default = "default_model_timeout")]
    pub model_timeout_secs: u64,

    /// Retries after the first failed model call
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff between retries, doubled per attempt
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Tokens of the context window kept free for the completion
    #[serde(default = "default_completion_reserve")]
    pub completion_reserve: usize,

    /// Optional cap on tokens generated per response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_response_tokens: Option<u32>,
}

fn default_model_timeout() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_backoff() -> u64 {
    500
}
fn default_completion_reserve() -> usize {
    1024
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            model_timeout_secs: default_model_timeout(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff(),
            completion_reserve: default_completion_reserve(),
            max_response_tokens: None,
        }
    }
}

/// Defaults copied into a scope's configuration when it is first created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeDefaults {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_embed_model")]
    pub embed_model: String,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default)]
    pub prompt: String,

    /// Conversation token budget
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Messages kept per conversation, 0 = unlimited
    #[serde(default = "default_max_retention")]
    pub max_retention: usize,

    /// Seconds a message is kept, 0 = unlimited
    #[serde(default = "default_max_retention_time")]
    pub max_retention_time: u64,

    /// Memories retrieved per message
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Minimum cosine similarity for a retrieved memory
    #[serde(default = "default_min_relatedness")]
    pub min_relatedness: f32,

    /// Capability-call iterations allowed per message
    #[serde(default = "default_max_function_calls")]
    pub max_function_calls: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_true")]
    pub use_function_calls: bool,

    #[serde(default)]
    pub persist_conversations: bool,
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_embed_model() -> String {
    "text-embedding-3-small".into()
}
fn default_system_prompt() -> String {
    "You are a helpful assistant in a community chat server.".into()
}
fn default_max_tokens() -> usize {
    4000
}
fn default_max_retention() -> usize {
    50
}
fn default_max_retention_time() -> u64 {
    1800
}
fn default_top_n() -> usize {
    2
}
fn default_min_relatedness() -> f32 {
    0.75
}
fn default_max_function_calls() -> u32 {
    20
}
fn default_temperature() -> f32 {
    0.7
}

impl Default for ScopeDefaults {
    fn default() -> Self {
        Self {
            model: default_model(),
            embed_model: default_embed_model(),
            system_prompt: default_system_prompt(),
            prompt: String::new(),
            max_tokens: default_max_tokens(),
            max_retention: default_max_retention(),
            max_retention_time: default_max_retention_time(),
            top_n: default_top_n(),
            min_relatedness: default_min_relatedness(),
            max_function_calls: default_max_function_calls(),
            temperature: default_temperature(),
            use_function_calls: true,
            persist_conversations: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.convoke/config.toml).
    ///
    /// Environment overrides:
    /// - `CONVOKE_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `CONVOKE_MODEL` for the default scope model
    /// - `CONVOKE_DATA_PATH` for the DB document
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("CONVOKE_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(model) = std::env::var("CONVOKE_MODEL") {
            config.scope_defaults.model = model;
        }

        if let Ok(path) = std::env::var("CONVOKE_DATA_PATH") {
            config.storage.path = Some(path);
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".convoke")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.scope_defaults;
        if d.temperature < 0.0 || d.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "scope_defaults.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if !(-1.0..=1.0).contains(&d.min_relatedness) {
            return Err(ConfigError::ValidationError(
                "scope_defaults.min_relatedness must be between -1.0 and 1.0".into(),
            ));
        }

        if d.max_function_calls == 0 {
            return Err(ConfigError::ValidationError(
                "scope_defaults.max_function_calls must be at least 1".into(),
            ));
        }

        if self.persistence.interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "persistence.interval_secs must be > 0".into(),
            ));
        }

        if self.orchestrator.model_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.model_timeout_secs must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            storage: StorageConfig::default(),
            persistence: PersistenceConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            scope_defaults: ScopeDefaults::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.persistence.interval_secs, 120);
        assert_eq!(config.scope_defaults.top_n, 2);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.scope_defaults.model, config.scope_defaults.model);
        assert_eq!(parsed.orchestrator.max_retries, config.orchestrator.max_retries);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.scope_defaults.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_iteration_ceiling_rejected() {
        let mut config = AppConfig::default();
        config.scope_defaults.max_function_calls = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.api_url, "https://api.openai.com/v1");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            tmp,
            r#"
[persistence]
interval_secs = 60

[scope_defaults]
model = "gpt-4"
persist_conversations = true
"#
        )
        .unwrap();

        let config = AppConfig::load_from(tmp.path()).unwrap();
        assert_eq!(config.persistence.interval_secs, 60);
        assert_eq!(config.persistence.initial_delay_secs, 30);
        assert_eq!(config.scope_defaults.model, "gpt-4");
        assert!(config.scope_defaults.persist_conversations);
        assert_eq!(config.scope_defaults.max_function_calls, 20);
    }

    #[test]
    fn unparseable_file_is_an_error() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "this is = = not toml").unwrap();
        let err = AppConfig::load_from(tmp.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = AppConfig {
            api_key: Some("sk-very-secret".into()),
            ..AppConfig::default()
        };
        assert!(!format!("{config:?}").contains("sk-very-secret"));
    }

    #[test]
    fn storage_path_defaults_under_config_dir() {
        let storage = StorageConfig::default();
        assert!(storage.resolved_path().ends_with(".convoke/db.json"));
        let custom = StorageConfig {
            path: Some("/var/lib/convoke/db.json".into()),
        };
        assert_eq!(custom.resolved_path(), PathBuf::from("/var/lib/convoke/db.json"));
    }
}
