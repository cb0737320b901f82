//! Configuration for the entity host

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Host configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Mailbox and activation tuning
    pub host: HostConfig,

    /// Snapshot store configuration
    pub store: StoreConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/entities"),
            service_name: "entity-host".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            host: HostConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

/// Mailbox and activation tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Bounded mailbox depth per key (backpressure)
    pub mailbox_capacity: usize,

    /// Retire a mailbox after this long without traffic (None = never)
    pub idle_timeout_ms: Option<u64>,

    /// Cancel an operation still queued after this long (None = wait forever)
    pub invoke_timeout_ms: Option<u64>,

    /// Attempts to reach a live mailbox before giving up
    pub send_attempts: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1024,
            idle_timeout_ms: Some(300_000), // 5 minutes
            invoke_timeout_ms: Some(30_000),
            send_attempts: 3,
        }
    }
}

impl HostConfig {
    /// Idle retirement window
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }

    /// Invoke timeout
    pub fn invoke_timeout(&self) -> Option<Duration> {
        self.invoke_timeout_ms.map(Duration::from_millis)
    }

    /// Reject settings the host cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.mailbox_capacity == 0 {
            return Err(crate::Error::Config(
                "mailbox_capacity must be at least 1".to_string(),
            ));
        }
        if self.send_attempts == 0 {
            return Err(crate::Error::Config(
                "send_attempts must be at least 1".to_string(),
            ));
        }
        if self.idle_timeout_ms == Some(0) {
            return Err(crate::Error::Config(
                "idle_timeout_ms must be positive when set".to_string(),
            ));
        }
        if self.invoke_timeout_ms == Some(0) {
            return Err(crate::Error::Config(
                "invoke_timeout_ms must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which snapshot backend to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local map, lost on restart
    Memory,
    /// RocksDB under `data_dir`
    RocksDb,
}

impl StoreBackend {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Some(StoreBackend::Memory),
            "rocksdb" => Some(StoreBackend::RocksDb),
            _ => None,
        }
    }
}

/// Snapshot store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend selection
    pub backend: StoreBackend,

    /// RocksDB tuning
    pub rocksdb: RocksDBConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::RocksDb,
            rocksdb: RocksDBConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,

    /// fsync the WAL on every commit
    pub sync_writes: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            max_background_jobs: 4,
            enable_statistics: false,
            sync_writes: true,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("ENTITY_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(backend) = std::env::var("ENTITY_STORE_BACKEND") {
            config.store.backend = StoreBackend::from_str(&backend).ok_or_else(|| {
                crate::Error::Config(format!("Unknown store backend: {}", backend))
            })?;
        }

        if let Ok(value) = std::env::var("ENTITY_IDLE_TIMEOUT_MS") {
            config.host.idle_timeout_ms = parse_optional_ms("ENTITY_IDLE_TIMEOUT_MS", &value)?;
        }

        if let Ok(value) = std::env::var("ENTITY_INVOKE_TIMEOUT_MS") {
            config.host.invoke_timeout_ms = parse_optional_ms("ENTITY_INVOKE_TIMEOUT_MS", &value)?;
        }

        if let Ok(value) = std::env::var("ENTITY_MAILBOX_CAPACITY") {
            config.host.mailbox_capacity = value.parse().map_err(|e| {
                crate::Error::Config(format!("ENTITY_MAILBOX_CAPACITY: {}", e))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the host cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        self.host.validate()
    }
}

/// `0` or `none` disables the timeout
fn parse_optional_ms(name: &str, value: &str) -> crate::Result<Option<u64>> {
    if value.eq_ignore_ascii_case("none") || value == "0" {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|e| crate::Error::Config(format!("{}: {}", name, e)))
}
