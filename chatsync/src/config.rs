//! Configuration for the `ChatSync` engine.
//!
//! Layered with the following priority (highest first):
//! 1. Values set by the embedding application
//! 2. TOML config file (`~/.config/chatsync/config.toml`)
//! 3. Compiled defaults
//!
//! A missing config file is not an error (defaults are used). An explicit
//! path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use crate::coordinator::CoordinatorConfig;
use crate::messages::DEFAULT_PAGE_SIZE;
use crate::transport::ReconnectPolicy;
use crate::typing::TypingConfig;

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
    socket: SocketFileConfig,
    messages: MessagesFileConfig,
    typing: TypingFileConfig,
}

/// `[api]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ApiFileConfig {
    base_url: Option<String>,
}

/// `[socket]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SocketFileConfig {
    url: Option<String>,
    legacy_url: Option<String>,
    reconnect_attempts: Option<u32>,
    reconnect_base_delay_ms: Option<u64>,
    reconnect_max_delay_ms: Option<u64>,
    event_buffer: Option<usize>,
}

/// `[messages]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct MessagesFileConfig {
    page_size: Option<usize>,
}

/// `[typing]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct TypingFileConfig {
    idle_window_ms: Option<u64>,
    remote_expiry_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved engine configuration.
#[derive(Debug, Clone)]
pub struct ChatSyncConfig {
    /// REST base URL of the messaging backend (no trailing slash).
    pub api_base_url: String,
    /// Connection endpoints and tuning for the coordinator.
    pub coordinator: CoordinatorConfig,
    /// Messages fetched per history page.
    pub page_size: usize,
    /// Typing debounce/expiry windows.
    pub typing: TypingConfig,
}

impl Default for ChatSyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:4000/api".to_string(),
            coordinator: CoordinatorConfig::default(),
            page_size: DEFAULT_PAGE_SIZE,
            typing: TypingConfig::default(),
        }
    }
}

impl ChatSyncConfig {
    /// Load configuration from a TOML file merged over defaults.
    ///
    /// If `explicit_path` is `Some`, the file must exist. If `None`, the
    /// default path (`~/.config/chatsync/config.toml`) is tried and
    /// silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or any config file fails to parse.
    pub fn load(explicit_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let file = load_config_file(explicit_path)?;
        Ok(Self::resolve(&file))
    }

    /// Resolve a config from a parsed file. Priority: file > default.
    #[must_use]
    fn resolve(file: &ConfigFile) -> Self {
        let defaults = Self::default();
        let reconnect_defaults = ReconnectPolicy::default();

        Self {
            api_base_url: file
                .api
                .base_url
                .clone()
                .unwrap_or(defaults.api_base_url),
            coordinator: CoordinatorConfig {
                socket_url: file
                    .socket
                    .url
                    .clone()
                    .unwrap_or(defaults.coordinator.socket_url),
                legacy_socket_url: file.socket.legacy_url.clone(),
                reconnect: ReconnectPolicy {
                    max_attempts: file
                        .socket
                        .reconnect_attempts
                        .unwrap_or(reconnect_defaults.max_attempts),
                    base_delay: file
                        .socket
                        .reconnect_base_delay_ms
                        .map_or(reconnect_defaults.base_delay, Duration::from_millis),
                    max_delay: file
                        .socket
                        .reconnect_max_delay_ms
                        .map_or(reconnect_defaults.max_delay, Duration::from_millis),
                },
                event_buffer: file
                    .socket
                    .event_buffer
                    .unwrap_or(defaults.coordinator.event_buffer),
            },
            page_size: file.messages.page_size.unwrap_or(defaults.page_size),
            typing: TypingConfig {
                idle_window: file
                    .typing
                    .idle_window_ms
                    .map_or(defaults.typing.idle_window, Duration::from_millis),
                remote_expiry: file
                    .typing
                    .remote_expiry_ms
                    .map_or(defaults.typing.remote_expiry, Duration::from_millis),
            },
        }
    }
}

/// Load and parse a TOML config file.
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
        config_dir.join("chatsync").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
