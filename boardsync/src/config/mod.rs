//! Configuration for the boardsync client.
//!
//! Layered with the following priority (highest first):
//! 1. Values set programmatically by the embedding application
//! 2. TOML config file (`~/.config/boardsync/config.toml`)
//! 3. Compiled defaults
//!
//! A missing default config file is not an error (defaults are used).
//! An explicit path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use crate::api::RetryPolicy;
use crate::channel::ChannelConfig;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    api: ApiFileConfig,
    channel: ChannelFileConfig,
}

/// `[api]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ApiFileConfig {
    url: Option<String>,
    max_retries: Option<u32>,
    base_delay_ms: Option<u64>,
}

/// `[channel]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ChannelFileConfig {
    url: Option<String>,
    connect_timeout_secs: Option<u64>,
    ready_timeout_secs: Option<u64>,
    reconnect_attempts: Option<u32>,
    reconnect_delay_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Api --
    /// Base URL of the REST backend.
    pub api_url: Option<String>,
    /// Retry budget for failed requests.
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub base_delay: Duration,

    // -- Channel --
    /// WebSocket URL of the push feed.
    pub channel_url: Option<String>,
    /// Timeout for establishing the WebSocket connection.
    pub connect_timeout: Duration,
    /// Timeout for the handshake acknowledgment.
    pub ready_timeout: Duration,
    /// Reconnection attempts before giving up.
    pub reconnect_attempts: u32,
    /// Fixed delay between reconnection attempts.
    pub reconnect_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        let channel = ChannelConfig::new("");
        Self {
            api_url: None,
            max_retries: retry.max_retries,
            base_delay: retry.base_delay,
            channel_url: None,
            connect_timeout: channel.connect_timeout,
            ready_timeout: channel.ready_timeout,
            reconnect_attempts: channel.reconnect_attempts,
            reconnect_delay: channel.reconnect_delay,
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file merged over defaults.
    ///
    /// If `path` is given the file must exist. If `path` is `None`, the
    /// default path (`~/.config/boardsync/config.toml`) is tried and
    /// silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an explicit config file cannot be
    /// read, or if any config file fails to parse.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let file = load_config_file(path)?;
        Ok(Self::resolve(&file))
    }

    /// Resolve a `ClientConfig` from a parsed config file.
    ///
    /// Priority: file > default. Separated from `load()` to enable unit
    /// testing without touching the filesystem.
    #[must_use]
    fn resolve(file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            api_url: file.api.url.clone(),
            max_retries: file.api.max_retries.unwrap_or(defaults.max_retries),
            base_delay: file
                .api
                .base_delay_ms
                .map_or(defaults.base_delay, Duration::from_millis),
            channel_url: file.channel.url.clone(),
            connect_timeout: file
                .channel
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            ready_timeout: file
                .channel
                .ready_timeout_secs
                .map_or(defaults.ready_timeout, Duration::from_secs),
            reconnect_attempts: file
                .channel
                .reconnect_attempts
                .unwrap_or(defaults.reconnect_attempts),
            reconnect_delay: file
                .channel
                .reconnect_delay_secs
                .map_or(defaults.reconnect_delay, Duration::from_secs),
        }
    }

    /// The retry policy described by this configuration.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: self.base_delay,
        }
    }

    /// Build a [`ChannelConfig`] from this configuration, if a channel
    /// URL is present. Returns `None` for REST-only operation.
    #[must_use]
    pub fn to_channel_config(&self) -> Option<ChannelConfig> {
        let url = self.channel_url.clone()?;
        if url.is_empty() {
            return None;
        }
        Some(ChannelConfig {
            url,
            connect_timeout: self.connect_timeout,
            ready_timeout: self.ready_timeout,
            reconnect_attempts: self.reconnect_attempts,
            reconnect_delay: self.reconnect_delay,
        })
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and a
/// missing file is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            // No config dir available — use defaults.
            return Ok(ConfigFile::default());
        };
        config_dir.join("boardsync").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
