//! Configuration loading and validation for the Keepsake engine.
//!
//! Loads configuration from a TOML file with `KEEPSAKE_*` environment
//! variable overrides. Validates all settings at startup.
//!
//! Utilization thresholds (75% optimize, 85% spawn), the 4000-token
//! response reserve, and the dynamic-context truncation rules are fixed
//! constants in `keepsake-context`, not configuration — they apply
//! identically across tiers and are never negotiated per-request.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// The root configuration structure.
#[derive(Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Provider API key. Overridable via `KEEPSAKE_API_KEY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default model name sent to the provider.
    #[serde(default = "default_model")]
    pub model: String,

    /// Volatile context cache settings.
    #[serde(default)]
    pub volatile_cache: VolatileCacheConfig,

    /// Remote content cache settings.
    #[serde(default)]
    pub remote_cache: RemoteCacheConfig,

    /// Per-turn timing and retry settings.
    #[serde(default)]
    pub turn: TurnConfig,
}

fn default_model() -> String {
    "gemini-1.5-flash".into()
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("volatile_cache", &self.volatile_cache)
            .field("remote_cache", &self.remote_cache)
            .field("turn", &self.turn)
            .finish()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            volatile_cache: VolatileCacheConfig::default(),
            remote_cache: RemoteCacheConfig::default(),
            turn: TurnConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatileCacheConfig {
    /// Entry time-to-live in seconds.
    #[serde(default = "default_volatile_ttl_secs")]
    pub ttl_secs: u64,

    /// Refresh an entry after this many uses, even if unexpired.
    #[serde(default = "default_max_usage_per_entry")]
    pub max_usage_per_entry: u32,
}

fn default_volatile_ttl_secs() -> u64 {
    3600 // 1 hour
}
fn default_max_usage_per_entry() -> u32 {
    100
}

impl Default for VolatileCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_volatile_ttl_secs(),
            max_usage_per_entry: default_max_usage_per_entry(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteCacheConfig {
    /// Remote handle time-to-live in minutes.
    #[serde(default = "default_remote_ttl_minutes")]
    pub ttl_minutes: u64,

    /// Only upload static content at or above this many estimated tokens;
    /// smaller payloads are sent inline since the upload itself costs a
    /// request.
    #[serde(default = "default_min_cache_tokens")]
    pub min_cache_tokens: usize,
}

fn default_remote_ttl_minutes() -> u64 {
    60
}
fn default_min_cache_tokens() -> usize {
    2048
}

impl Default for RemoteCacheConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: default_remote_ttl_minutes(),
            min_cache_tokens: default_min_cache_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    /// Hard ceiling on wall-clock time per turn; on expiry the engine
    /// delivers a templated fallback instead of an error.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Backoff before the single retry after `ProviderUnavailable`.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_retry_backoff_ms() -> u64 {
    500
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file, then apply environment
    /// overrides. A missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw)?
        } else {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `KEEPSAKE_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("KEEPSAKE_API_KEY") {
            if !key.is_empty() {
                self.api_key = Some(key);
            }
        }
        if let Ok(model) = std::env::var("KEEPSAKE_MODEL") {
            if !model.is_empty() {
                self.model = model;
            }
        }
        if let Ok(secs) = std::env::var("KEEPSAKE_TURN_TIMEOUT_SECS") {
            if let Ok(parsed) = secs.parse() {
                self.turn.timeout_secs = parsed;
            }
        }
    }

    /// Validate settings. Called at startup so misconfiguration fails
    /// loudly instead of surfacing as odd runtime behavior.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.is_empty() {
            return Err(ConfigError::Invalid("model must not be empty".into()));
        }
        if self.volatile_cache.ttl_secs == 0 {
            return Err(ConfigError::Invalid(
                "volatile_cache.ttl_secs must be positive".into(),
            ));
        }
        if self.volatile_cache.max_usage_per_entry == 0 {
            return Err(ConfigError::Invalid(
                "volatile_cache.max_usage_per_entry must be positive".into(),
            ));
        }
        if self.remote_cache.ttl_minutes == 0 {
            return Err(ConfigError::Invalid(
                "remote_cache.ttl_minutes must be positive".into(),
            ));
        }
        if self.turn.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "turn.timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}
