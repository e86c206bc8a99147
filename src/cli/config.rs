//! Operator configuration file handling.
//!
//! TOML config stored next to the session database. This is deployment
//! configuration only: paths, the session encryption key, connection
//! tuning, logging. Tenant and session rows live in the database.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default log level
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write config file '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {message}")]
    Parse { path: PathBuf, message: String },

    #[error("security.session_key is not valid base64: {0}")]
    KeyNotBase64(String),

    #[error("security.session_key must decode to 32 bytes, got {0}")]
    KeyWrongLength(usize),

    #[error("No data directory available for the default config path")]
    NoDataDir,
}

/// Courier operator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourierConfig {
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Session database location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database holding session rows.
    pub path: PathBuf,
}

/// Cryptographic material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Base64-encoded 32-byte key encrypting credential blobs.
    /// Changing it orphans every stored credential set.
    pub session_key: String,
}

/// Connection manager tuning. Defaults match production behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_restart_stagger")]
    pub restart_stagger_secs: u64,

    #[serde(default = "default_qr_ttl")]
    pub qr_ttl_secs: u64,

    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,

    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_secs: u64,

    #[serde(default = "default_save_debounce")]
    pub save_debounce_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

fn default_restart_stagger() -> u64 {
    2
}
fn default_qr_ttl() -> u64 {
    60
}
fn default_backoff_base() -> u64 {
    3
}
fn default_backoff_cap() -> u64 {
    60
}
fn default_save_debounce() -> u64 {
    500
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            restart_stagger_secs: default_restart_stagger(),
            qr_ttl_secs: default_qr_ttl(),
            backoff_base_secs: default_backoff_base(),
            backoff_cap_secs: default_backoff_cap(),
            save_debounce_ms: default_save_debounce(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            file: None,
        }
    }
}

impl CourierConfig {
    /// Default config location: `<data dir>/courier/config.toml`.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let base = dirs::data_local_dir().ok_or(ConfigError::NoDataDir)?;
        Ok(base.join("courier").join("config.toml"))
    }

    /// A fresh config with a newly generated random session key and the
    /// database placed next to the config file.
    pub fn generate(config_path: &Path) -> Result<Self, ConfigError> {
        let mut key = [0u8; 32];
        SystemRandom::new()
            .fill(&mut key)
            .map_err(|_| ConfigError::KeyWrongLength(0))?;

        let db_path = config_path
            .parent()
            .map(|p| p.join("sessions.db"))
            .unwrap_or_else(|| PathBuf::from("sessions.db"));

        Ok(Self {
            database: DatabaseConfig { path: db_path },
            security: SecurityConfig {
                session_key: BASE64.encode(key),
            },
            connection: ConnectionConfig::default(),
            logging: LoggingConfig::default(),
        })
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Save configuration to a TOML file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        fs::write(path, contents).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Decode and validate the 32-byte session key.
    pub fn session_key(&self) -> Result<[u8; 32], ConfigError> {
        let bytes = BASE64
            .decode(self.security.session_key.trim())
            .map_err(|e| ConfigError::KeyNotBase64(e.to_string()))?;
        let len = bytes.len();
        bytes
            .try_into()
            .map_err(|_| ConfigError::KeyWrongLength(len))
    }
}
