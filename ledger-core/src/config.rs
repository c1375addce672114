//! Configuration for the ledger

use crate::idempotency::IdempotencyConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which Ledger Store implementation to run on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-process maps, nothing survives a restart
    Memory,
    /// Embedded RocksDB under `data_dir`
    Rocksdb,
    /// PostgreSQL at `database_url`
    Postgres,
}

impl FromStr for Backend {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Backend::Memory),
            "rocksdb" => Ok(Backend::Rocksdb),
            "postgres" | "postgresql" => Ok(Backend::Postgres),
            other => Err(crate::Error::Config(format!("Unknown backend: {}", other))),
        }
    }
}

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage backend
    pub backend: Backend,

    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// PostgreSQL connection string
    pub database_url: Option<String>,

    /// PostgreSQL pool size
    pub max_connections: u32,

    /// Row lock wait bound (milliseconds)
    pub lock_timeout_ms: u64,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Idempotency cache configuration
    pub idempotency: IdempotencyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            data_dir: PathBuf::from("./data/ledger"),
            database_url: None,
            max_connections: 10,
            lock_timeout_ms: 5_000,
            rocksdb: RocksDBConfig::default(),
            idempotency: IdempotencyConfig::default(),
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
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 3,
            max_background_jobs: 2,
            enable_statistics: false,
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

        if let Ok(backend) = std::env::var("LEDGER_BACKEND") {
            config.backend = backend.parse()?;
        }

        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(url) = std::env::var("LEDGER_DATABASE_URL") {
            config.database_url = Some(url);
        }

        if let Ok(n) = std::env::var("LEDGER_MAX_CONNECTIONS") {
            config.max_connections = parse_var("LEDGER_MAX_CONNECTIONS", &n)?;
        }

        if let Ok(ms) = std::env::var("LEDGER_LOCK_TIMEOUT_MS") {
            config.lock_timeout_ms = parse_var("LEDGER_LOCK_TIMEOUT_MS", &ms)?;
        }

        if let Ok(secs) = std::env::var("LEDGER_IDEMPOTENCY_TTL_SECS") {
            config.idempotency.ttl_secs = parse_var("LEDGER_IDEMPOTENCY_TTL_SECS", &secs)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the stores cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.lock_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "lock_timeout_ms must be greater than zero".to_string(),
            ));
        }

        if self.backend == Backend::Postgres {
            match &self.database_url {
                Some(url) if !url.trim().is_empty() => {}
                _ => {
                    return Err(crate::Error::Config(
                        "database_url is required for the postgres backend".to_string(),
                    ))
                }
            }
            if self.max_connections == 0 {
                return Err(crate::Error::Config(
                    "max_connections must be greater than zero".to_string(),
                ));
            }
        }

        self.idempotency.validate()
    }

    /// Row lock wait bound
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> crate::Result<T> {
    value
        .parse()
        .map_err(|_| crate::Error::Config(format!("Invalid value for {}: {}", name, value)))
}
