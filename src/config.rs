//! Static client configuration.
//!
//! Configuration is resolved once, either from [`Defaults`] or from the
//! process environment, and then handed to the individual clients by
//! reference.

use std::time::Duration;

use thiserror::Error;

use crate::retry::RetryPolicy;
use crate::stream::client::StreamConfig;

/// Environment variable overriding the LLM streaming service base URL.
pub const ENV_LLM_STREAMING_URL: &str = "LLM_STREAMING_URL";
/// Environment variable overriding the request timeout in seconds.
pub const ENV_LLM_STREAMING_TIMEOUT_SECS: &str = "LLM_STREAMING_TIMEOUT_SECS";
/// Environment variable overriding the streaming reconnection budget.
pub const ENV_LLM_STREAMING_RECONNECT_ATTEMPTS: &str = "LLM_STREAMING_RECONNECT_ATTEMPTS";
/// Environment variable overriding the file manager base URL.
pub const ENV_FILE_MANAGER_URL: &str = "FILE_MANAGER_URL";
/// Environment variable overriding the file manager timeout in seconds.
pub const ENV_FILE_MANAGER_TIMEOUT_SECS: &str = "FILE_MANAGER_TIMEOUT_SECS";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Defaults;

impl Defaults {
    pub const BASE_URL: &'static str = "http://localhost:5000";
    pub const API_PREFIX: &'static str = "/api/v1/chat";
    pub const TIMEOUT: Duration = Duration::from_secs(30);
    pub const RECONNECT_ATTEMPTS: usize = 3;
    pub const RECONNECT_MIN_BACKOFF: Duration = Duration::from_millis(100);
    pub const RECONNECT_MAX_BACKOFF: Duration = Duration::from_secs(2);
    pub const FILE_MANAGER_URL: &'static str = "http://file-manager:5003";
    pub const FILE_MANAGER_API_PATH: &'static str = "/api/v1";
}

/// Errors raised while resolving configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a non-negative integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("{name} must not be empty")]
    Empty { name: &'static str },
}

/// Connection parameters for the LLM streaming service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Service origin, e.g. `http://localhost:5000`.
    pub base_url: String,
    /// Path prefix shared by the REST routes and the socket namespace.
    pub api_prefix: String,
    /// Per-request timeout for REST calls and per-attempt handshake timeout.
    pub timeout: Duration,
    /// Extra handshake attempts after the first one fails.
    pub reconnect_attempts: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: Defaults::BASE_URL.to_string(),
            api_prefix: Defaults::API_PREFIX.to_string(),
            timeout: Defaults::TIMEOUT,
            reconnect_attempts: Defaults::RECONNECT_ATTEMPTS,
        }
    }
}

impl ClientConfig {
    /// Creates a config for `base_url` with default timeouts.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::default().with_base_url(base_url)
    }

    /// Reads overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolves overrides through `lookup`, falling back to [`Defaults`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(url) = lookup(ENV_LLM_STREAMING_URL) {
            config.base_url = non_empty(ENV_LLM_STREAMING_URL, &url)?;
        }
        if let Some(raw) = lookup(ENV_LLM_STREAMING_TIMEOUT_SECS) {
            config.timeout = Duration::from_secs(parse_number(ENV_LLM_STREAMING_TIMEOUT_SECS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_LLM_STREAMING_RECONNECT_ATTEMPTS) {
            config.reconnect_attempts =
                parse_number(ENV_LLM_STREAMING_RECONNECT_ATTEMPTS, &raw)? as usize;
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_reconnect_attempts(mut self, reconnect_attempts: usize) -> Self {
        self.reconnect_attempts = reconnect_attempts;
        self
    }

    /// Socket.IO namespace used by the streaming endpoint.
    pub fn namespace(&self) -> &str {
        &self.api_prefix
    }

    /// Absolute URL for a REST route below the API prefix.
    pub fn endpoint(&self, route: &str) -> String {
        format!("{}{}/{}", self.base_url, self.api_prefix, route.trim_start_matches('/'))
    }

    /// Derives the streaming session parameters.
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            base_url: self.base_url.clone(),
            namespace: self.namespace().to_string(),
            connect_timeout: self.timeout,
            reconnect: RetryPolicy {
                max_attempts: self.reconnect_attempts.saturating_add(1),
                initial_backoff: Defaults::RECONNECT_MIN_BACKOFF,
                max_backoff: Defaults::RECONNECT_MAX_BACKOFF,
                jitter: Duration::from_millis(25),
            },
        }
    }
}

/// Connection parameters for the file manager service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileManagerConfig {
    pub base_url: String,
    pub api_path: String,
    pub timeout: Duration,
}

impl Default for FileManagerConfig {
    fn default() -> Self {
        Self {
            base_url: Defaults::FILE_MANAGER_URL.to_string(),
            api_path: Defaults::FILE_MANAGER_API_PATH.to_string(),
            timeout: Defaults::TIMEOUT,
        }
    }
}

impl FileManagerConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(url) = lookup(ENV_FILE_MANAGER_URL) {
            config.base_url = non_empty(ENV_FILE_MANAGER_URL, &url)?;
        }
        if let Some(raw) = lookup(ENV_FILE_MANAGER_TIMEOUT_SECS) {
            config.timeout = Duration::from_secs(parse_number(ENV_FILE_MANAGER_TIMEOUT_SECS, &raw)?);
        }
        Ok(config)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Base URL including the API path, e.g. `http://file-manager:5003/api/v1`.
    pub fn api_url(&self) -> String {
        format!("{}{}", self.base_url, self.api_path)
    }
}

fn non_empty(name: &'static str, value: &str) -> Result<String, ConfigError> {
    let trimmed = value.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ConfigError::Empty { name });
    }
    Ok(trimmed.to_string())
}

fn parse_number(name: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        name,
        value: raw.to_string(),
    })
}
