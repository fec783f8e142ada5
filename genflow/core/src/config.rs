//! TOML Configuration File Support
//!
//! Centralized configuration for the client, with an optional TOML file at
//! `~/.config/genflow/client.toml`.
//!
//! # Configuration Priority
//!
//! Values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! base_url = "https://api.example.com/"
//! request_timeout_ms = 60000
//! long_request_timeout_ms = 90000
//! stream_idle_timeout_ms = 60000
//!
//! [jobs]
//! poll_interval_ms = 2500
//! max_poll_attempts = 120
//!
//! [narration]
//! transition_delay_ms = 1200
//! legacy_poll_interval_ms = 2000
//! legacy_max_polls = 60
//! legacy_token_interval_ms = 40
//!
//! [capabilities]
//! event_stream = true
//! narration_stream = true
//!
//! [cache]
//! endpoints = ["/api/v1/user/recent-analysis"]
//! ```

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Base URL
// =============================================================================

/// Backend origin with trailing slashes stripped
///
/// Every request path is joined onto this value, so `https://x/` and
/// `https://x` produce identical URLs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BaseUrl(String);

impl BaseUrl {
    /// Parse and normalize a base URL
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if the value is not an
    /// absolute http(s) URL.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let trimmed = raw.trim().trim_end_matches('/');
        let url = Url::parse(trimmed)
            .map_err(|e| ConfigError::ValidationError(format!("base_url {raw:?}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::ValidationError(format!(
                "base_url {raw:?}: scheme must be http or https"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Join an absolute path (`/api/...`) onto the origin
    #[must_use]
    pub fn join(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.0, path)
        } else {
            format!("{}/{}", self.0, path)
        }
    }

    /// The normalized origin
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BaseUrl {
    fn default() -> Self {
        Self("http://localhost:3001".to_string())
    }
}

impl fmt::Display for BaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Server section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Backend origin
    pub base_url: Option<String>,

    /// Default request timeout in milliseconds
    pub request_timeout_ms: Option<u64>,

    /// Timeout for long-running narration/content endpoints
    pub long_request_timeout_ms: Option<u64>,

    /// Maximum silence on an open stream before it times out
    pub stream_idle_timeout_ms: Option<u64>,
}

/// Jobs section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsToml {
    /// Delay between status polls in milliseconds
    pub poll_interval_ms: Option<u64>,

    /// Maximum number of status fetches per poll
    pub max_poll_attempts: Option<u32>,
}

/// Narration section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrationToml {
    /// How long the transition moment lasts
    pub transition_delay_ms: Option<u64>,

    /// Delay between legacy narrative polls
    pub legacy_poll_interval_ms: Option<u64>,

    /// Legacy polls before narration is declared unavailable
    pub legacy_max_polls: Option<u32>,

    /// Delay between simulated tokens
    pub legacy_token_interval_ms: Option<u64>,
}

/// Capability section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilitiesToml {
    /// Whether the backend pushes job progress over SSE
    pub event_stream: Option<bool>,

    /// Whether the backend offers the SSE narration endpoints
    pub narration_stream: Option<bool>,
}

/// Cache section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheToml {
    /// Endpoints eligible for dedup and session caching
    pub endpoints: Option<Vec<String>>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientToml {
    /// Server section
    pub server: ServerToml,
    /// Jobs section
    pub jobs: JobsToml,
    /// Narration section
    pub narration: NarrationToml,
    /// Capabilities section
    pub capabilities: CapabilitiesToml,
    /// Cache section
    pub cache: CacheToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Transport capabilities of the backend
///
/// Selects, once, whether narration and job progress are consumed from a live
/// stream or from the polling fallback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capabilities {
    /// Job progress is available over SSE
    pub event_stream: bool,
    /// Narration is available over SSE
    pub narration_stream: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            event_stream: true,
            narration_stream: true,
        }
    }
}

/// Narration timing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NarrationConfig {
    /// How long the transition moment lasts
    pub transition_delay: Duration,
    /// Delay between legacy narrative polls
    pub legacy_poll_interval: Duration,
    /// Legacy polls before narration is declared unavailable
    pub legacy_max_polls: u32,
    /// Delay between simulated tokens
    pub legacy_token_interval: Duration,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            transition_delay: Duration::from_millis(1200),
            legacy_poll_interval: Duration::from_secs(2),
            legacy_max_polls: 60,
            legacy_token_interval: Duration::from_millis(40),
        }
    }
}

/// Centralized client configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Backend origin
    pub base_url: BaseUrl,

    /// Default request timeout
    pub request_timeout: Duration,

    /// Timeout for long-running narration/content endpoints
    pub long_request_timeout: Duration,

    /// Maximum silence on an open stream
    pub stream_idle_timeout: Duration,

    /// Delay between job status polls
    pub poll_interval: Duration,

    /// Maximum status fetches per poll
    pub max_poll_attempts: u32,

    /// Narration timing
    pub narration: NarrationConfig,

    /// Backend transport capabilities
    pub capabilities: Capabilities,

    /// Endpoints eligible for dedup and session caching
    pub cached_endpoints: Vec<String>,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: BaseUrl::default(),
            request_timeout: Duration::from_secs(60),
            long_request_timeout: Duration::from_secs(90),
            stream_idle_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(2500),
            max_poll_attempts: 120,
            narration: NarrationConfig::default(),
            capabilities: Capabilities::default(),
            cached_endpoints: vec![
                "/api/v1/user/recent-analysis".to_string(),
                "/api/v1/user/credits".to_string(),
                "/api/v1/organizations/current".to_string(),
            ],
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ClientConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Default config pointed at a specific backend
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` is not a valid http(s) URL.
    pub fn with_base_url(base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: BaseUrl::parse(base_url)?,
            ..Self::default()
        })
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check cross-field invariants
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_poll_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "max_poll_attempts must be greater than 0".to_string(),
            ));
        }
        if self.request_timeout.is_zero() || self.long_request_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "request timeouts must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/genflow/client.toml` or
/// `~/.config/genflow/client.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("genflow").join("client.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed, or
/// if the resulting configuration fails validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ClientConfig, ConfigError> {
    let mut config = ClientConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ClientToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config)?;
    config.validate()?;

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ClientConfig, toml: &ClientToml) -> Result<(), ConfigError> {
    if let Some(ref url) = toml.server.base_url {
        config.base_url = BaseUrl::parse(url)?;
    }
    if let Some(ms) = toml.server.request_timeout_ms {
        config.request_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.server.long_request_timeout_ms {
        config.long_request_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.server.stream_idle_timeout_ms {
        config.stream_idle_timeout = Duration::from_millis(ms);
    }

    if let Some(ms) = toml.jobs.poll_interval_ms {
        config.poll_interval = Duration::from_millis(ms);
    }
    if let Some(attempts) = toml.jobs.max_poll_attempts {
        config.max_poll_attempts = attempts;
    }

    if let Some(ms) = toml.narration.transition_delay_ms {
        config.narration.transition_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.narration.legacy_poll_interval_ms {
        config.narration.legacy_poll_interval = Duration::from_millis(ms);
    }
    if let Some(polls) = toml.narration.legacy_max_polls {
        config.narration.legacy_max_polls = polls;
    }
    if let Some(ms) = toml.narration.legacy_token_interval_ms {
        config.narration.legacy_token_interval = Duration::from_millis(ms);
    }

    if let Some(enabled) = toml.capabilities.event_stream {
        config.capabilities.event_stream = enabled;
    }
    if let Some(enabled) = toml.capabilities.narration_stream {
        config.capabilities.narration_stream = enabled;
    }

    if let Some(ref endpoints) = toml.cache.endpoints {
        config.cached_endpoints = endpoints.clone();
    }

    Ok(())
}

fn parse_flag(value: &str) -> bool {
    value != "0" && !value.eq_ignore_ascii_case("false")
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut ClientConfig) -> Result<(), ConfigError> {
    if let Ok(url) = std::env::var("GENFLOW_BASE_URL") {
        config.base_url = BaseUrl::parse(&url)?;
        config.source = ConfigSource::Env;
    }
    if let Ok(timeout) = std::env::var("GENFLOW_REQUEST_TIMEOUT_MS") {
        if let Ok(ms) = timeout.parse::<u64>() {
            config.request_timeout = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(timeout) = std::env::var("GENFLOW_LONG_REQUEST_TIMEOUT_MS") {
        if let Ok(ms) = timeout.parse::<u64>() {
            config.long_request_timeout = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(interval) = std::env::var("GENFLOW_POLL_INTERVAL_MS") {
        if let Ok(ms) = interval.parse::<u64>() {
            config.poll_interval = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(attempts) = std::env::var("GENFLOW_MAX_POLL_ATTEMPTS") {
        if let Ok(n) = attempts.parse::<u32>() {
            config.max_poll_attempts = n;
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(enabled) = std::env::var("GENFLOW_EVENT_STREAM") {
        config.capabilities.event_stream = parse_flag(&enabled);
        config.source = ConfigSource::Env;
    }
    if let Ok(enabled) = std::env::var("GENFLOW_NARRATION_STREAM") {
        config.capabilities.narration_stream = parse_flag(&enabled);
        config.source = ConfigSource::Env;
    }
    Ok(())
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Base URL override
    pub base_url: Option<String>,

    /// Poll interval override (milliseconds)
    pub poll_interval_ms: Option<u64>,

    /// Max poll attempts override
    pub max_poll_attempts: Option<u32>,

    /// Force the polling fallbacks regardless of backend capabilities
    pub force_polling: bool,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set base URL override
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set poll interval override
    #[must_use]
    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = Some(ms);
        self
    }

    /// Set max poll attempts override
    #[must_use]
    pub fn with_max_poll_attempts(mut self, attempts: u32) -> Self {
        self.max_poll_attempts = Some(attempts);
        self
    }

    /// Disable both live-stream capabilities
    #[must_use]
    pub fn with_force_polling(mut self, force: bool) -> Self {
        self.force_polling = force;
        self
    }

    /// Apply overrides to a configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the overridden base URL is invalid.
    pub fn apply(&self, config: &mut ClientConfig) -> Result<(), ConfigError> {
        if self.base_url.is_some()
            || self.poll_interval_ms.is_some()
            || self.max_poll_attempts.is_some()
            || self.force_polling
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref url) = self.base_url {
            config.base_url = BaseUrl::parse(url)?;
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(attempts) = self.max_poll_attempts {
            config.max_poll_attempts = attempts;
        }
        if self.force_polling {
            config.capabilities = Capabilities {
                event_stream: false,
                narration_stream: false,
            };
        }
        config.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================
