//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub optics: OpticsConfig,

    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Durable store selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    File,
    Memory,
}

impl StoreBackend {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "file" => Some(Self::File),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default)]
    pub backend: StoreBackend,

    #[serde(default = "default_sync_on_commit")]
    pub sync_on_commit: bool,
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("optics").to_string_lossy().to_string())
        .unwrap_or_else(|| "./optics_data".to_string())
}

fn default_sync_on_commit() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            backend: StoreBackend::default(),
            sync_on_commit: default_sync_on_commit(),
        }
    }
}

/// Event store and ingestion tuning
#[derive(Debug, Clone, Deserialize)]
pub struct OpticsConfig {
    /// Maximum events returned by one query page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Maximum events taken off the ingest queue per drain
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_drain_interval")]
    pub drain_interval_ms: u64,

    #[serde(default = "default_retention_hours")]
    pub retention_hours: i64,

    #[serde(default = "default_grace_hours")]
    pub grace_hours: i64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_cache_entries")]
    pub cache_max_entries: usize,

    /// Drain attempts before an uncommitted event is dropped
    #[serde(default = "default_max_ingest_attempts")]
    pub max_ingest_attempts: u32,

    /// When false, events with `LOG_LEVEL = DEBUG` are dropped on ingest
    #[serde(default = "default_enable_debug_events")]
    pub enable_debug_events: bool,
}

fn default_page_size() -> usize {
    800
}

fn default_batch_size() -> usize {
    2000
}

fn default_drain_interval() -> u64 {
    10 // 10 ms
}

fn default_retention_hours() -> i64 {
    24
}

fn default_grace_hours() -> i64 {
    1
}

fn default_sweep_interval() -> u64 {
    3600 // hourly
}

fn default_cache_ttl() -> u64 {
    600 // 10 minutes
}

fn default_cache_entries() -> usize {
    1024
}

fn default_max_ingest_attempts() -> u32 {
    3
}

fn default_enable_debug_events() -> bool {
    true
}

impl Default for OpticsConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            batch_size: default_batch_size(),
            drain_interval_ms: default_drain_interval(),
            retention_hours: default_retention_hours(),
            grace_hours: default_grace_hours(),
            sweep_interval_secs: default_sweep_interval(),
            cache_ttl_secs: default_cache_ttl(),
            cache_max_entries: default_cache_entries(),
            max_ingest_attempts: default_max_ingest_attempts(),
            enable_debug_events: default_enable_debug_events(),
        }
    }
}

impl OpticsConfig {
    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms.max(1))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Age past which buckets are evicted
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.retention_hours + self.grace_hours)
    }
}

/// API server section
#[derive(Debug, Clone, Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8083
}

fn default_max_body_size() -> usize {
    10 * 1024 * 1024 // 10 MB
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_size: default_max_body_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            error,
        })
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("optics").join("config.toml")),
            Some(PathBuf::from("/etc/optics/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        // Storage overrides
        if let Ok(data_dir) = std::env::var("OPTICS_DATA_DIR") {
            self.storage.data_dir = data_dir;
        }
        if let Ok(store) = std::env::var("OPTICS_STORE") {
            match StoreBackend::parse(&store) {
                Some(backend) => self.storage.backend = backend,
                None => tracing::warn!("Ignoring unknown OPTICS_STORE value {:?}", store),
            }
        }

        // API overrides
        if let Ok(host) = std::env::var("OPTICS_API_HOST") {
            self.api.host = host;
        }
        if let Ok(port) = std::env::var("OPTICS_API_PORT") {
            if let Ok(p) = port.parse() {
                self.api.port = p;
            }
        }

        // Optics overrides
        if let Ok(page_size) = std::env::var("OPTICS_PAGE_SIZE") {
            if let Ok(size) = page_size.parse() {
                self.optics.page_size = size;
            }
        }

        // Logging overrides
        if let Ok(level) = std::env::var("OPTICS_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("OPTICS_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Optics Configuration
#
# Environment variables override these settings:
# - OPTICS_DATA_DIR
# - OPTICS_STORE
# - OPTICS_API_HOST
# - OPTICS_API_PORT
# - OPTICS_PAGE_SIZE
# - OPTICS_LOG_LEVEL
# - OPTICS_LOG_FORMAT

[storage]
# Directory holding one log file per bucket map
data_dir = "~/.local/share/optics"

# Store backend: file (durable) or memory (lost on exit)
backend = "file"

# fsync every committed transaction
sync_on_commit = true

[optics]
# Maximum events per query page
page_size = 800

# Maximum events applied per ingest drain
batch_size = 2000

# How often the ingest queue is drained (ms)
drain_interval_ms = 10

# Buckets older than retention + grace hours are evicted
retention_hours = 24
grace_hours = 1

# How often the retention sweep runs (seconds)
sweep_interval_secs = 3600

# Compiled query cache
cache_ttl_secs = 600
cache_max_entries = 1024

# Drain attempts before an uncommitted event is dropped
max_ingest_attempts = 3

# Accept events with LOG_LEVEL = DEBUG
enable_debug_events = true

[api]
# API server host
host = "0.0.0.0"

# API server port
port = 8083

# Maximum request body size (bytes)
max_body_size = 10485760

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
