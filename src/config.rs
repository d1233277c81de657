//! Configuration management (.config/app.toml)
//!
//! Every section and key is optional; missing values fall back to the
//! defaults below. Command-line flags override what the file says.

use crate::db::{Database, DEFAULT_DB_PATH};
use crate::store::{FileStore, Storage, StoreError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = ".config/app.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub logger: LoggerConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Default filter when `RUST_LOG` is unset (default: info)
    #[serde(default = "default_level")]
    pub level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Listen port (default: 4567)
    #[serde(default = "default_port")]
    pub port: u16,
    /// `PRODUCTION` or `DEVELOPMENT` (default: PRODUCTION)
    #[serde(default = "default_runtime")]
    pub runtime: String,
    /// Public host name, used in production (default: localhost)
    #[serde(default = "default_domain")]
    pub domain: String,
    /// Request handler threads (default: 4)
    #[serde(default = "default_workers")]
    pub workers: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    File,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: Backend,
    /// Raw replays, one directory per beatmap (default: storage)
    #[serde(default = "default_replay_dir")]
    pub replay_dir: PathBuf,
    /// Detection records (default: detection)
    #[serde(default = "default_detection_dir")]
    pub detection_dir: PathBuf,
    /// Audit logs under `task_logs/` (default: data)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// SQLite file for the sqlite backend (default: replayguard.db)
    #[serde(default = "default_database")]
    pub database: PathBuf,
}

fn default_level() -> String {
    "info".to_string()
}
fn default_port() -> u16 {
    4567
}
fn default_runtime() -> String {
    "PRODUCTION".to_string()
}
fn default_domain() -> String {
    "localhost".to_string()
}
fn default_workers() -> usize {
    4
}

fn default_replay_dir() -> PathBuf {
    PathBuf::from("storage")
}
fn default_detection_dir() -> PathBuf {
    PathBuf::from("detection")
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_database() -> PathBuf {
    PathBuf::from(DEFAULT_DB_PATH)
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            runtime: default_runtime(),
            domain: default_domain(),
            workers: default_workers(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            replay_dir: default_replay_dir(),
            detection_dir: default_detection_dir(),
            data_dir: default_data_dir(),
            database: default_database(),
        }
    }
}

impl ApiConfig {
    pub fn is_production(&self) -> bool {
        !self.runtime.eq_ignore_ascii_case("development")
    }

    /// Address shown to users. `domain` only applies in production.
    pub fn public_url(&self) -> String {
        let host = if self.is_production() { self.domain.as_str() } else { "localhost" };
        format!("http://{}:{}", host, self.port)
    }
}

impl Config {
    /// Load from `path`. A missing file yields the defaults; a malformed one is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Open the configured storage backend
    pub fn open_storage(&self) -> Result<Arc<dyn Storage>, StoreError> {
        let storage = &self.storage;
        Ok(match storage.backend {
            Backend::File => Arc::new(FileStore::open(&storage.replay_dir, &storage.detection_dir)?),
            Backend::Sqlite => Arc::new(Database::open_at(&storage.database)?),
        })
    }
}
