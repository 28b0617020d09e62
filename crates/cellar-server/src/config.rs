//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Real-time hub settings.
    #[serde(default)]
    pub hub: HubConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// SQLite busy timeout, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Real-time hub configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Frames an observer may have queued before it is disconnected.
    #[serde(default = "default_observer_queue_capacity")]
    pub observer_queue_capacity: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "cellar_hub=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8080
}

fn default_db_path() -> String {
    "cellar.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    cellar_db::DbRuntimeSettings::default().busy_timeout_ms
}

fn default_pool_max_size() -> u32 {
    cellar_db::DbRuntimeSettings::default().pool_max_size
}

fn default_observer_queue_capacity() -> usize {
    cellar_hub::DEFAULT_OBSERVER_QUEUE_CAPACITY
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            observer_queue_capacity: default_observer_queue_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl DatabaseConfig {
    pub fn runtime_settings(&self) -> cellar_db::DbRuntimeSettings {
        cellar_db::DbRuntimeSettings {
            busy_timeout_ms: self.busy_timeout_ms,
            pool_max_size: self.pool_max_size,
        }
    }
}

impl HubConfig {
    pub fn hub_settings(&self) -> cellar_hub::HubSettings {
        cellar_hub::HubSettings {
            observer_queue_capacity: self.observer_queue_capacity,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `CELLAR_HOST` overrides `server.host`
/// - `CELLAR_PORT` overrides `server.port`
/// - `CELLAR_DB_PATH` overrides `database.path`
/// - `CELLAR_QUEUE_CAPACITY` overrides `hub.observer_queue_capacity`
/// - `CELLAR_LOG_LEVEL` overrides `logging.level`
/// - `CELLAR_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("CELLAR_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("CELLAR_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(db_path) = var("CELLAR_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(capacity) = var("CELLAR_QUEUE_CAPACITY") {
        if let Ok(parsed) = capacity.parse() {
            config.hub.observer_queue_capacity = parsed;
        }
    }
    if let Some(level) = var("CELLAR_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("CELLAR_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}
