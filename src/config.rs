//! Configuration for the `ttyctl` command.
//!
//! Loaded from `~/.ttyctl/config.toml`, or from `config.toml` inside
//! `$TTYCTL_CONFIG_DIR` when that is set. Every key is optional:
//!
//! ```toml
//! # File guarded by `ttyctl lock` and `ttyctl session`
//! lock_path = "/home/me/.ttyctl/session.lock"
//!
//! # Log destination and filter (tracing-subscriber EnvFilter syntax)
//! log_file = "/home/me/.ttyctl/ttyctl.log"
//! log_level = "debug"
//!
//! # Frames printed by `ttyctl backtrace`
//! backtrace_depth = 32
//!
//! [raw_mode]
//! nonblocking = true
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::term::RawOptions;
use crate::host;

const CONFIG_DIR: &str = ".ttyctl";
const CONFIG_DIR_ENV: &str = "TTYCTL_CONFIG_DIR";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not determine config path")]
    NoHome,
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Lock file for single-instance checks
    pub lock_path: PathBuf,
    /// Log file
    pub log_file: PathBuf,
    /// Log filter directive
    pub log_level: String,
    /// Maximum frames for backtraces
    pub backtrace_depth: usize,
    /// Raw mode settings
    pub raw_mode: RawOptions,
}

impl Default for Config {
    fn default() -> Self {
        let dir = config_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            lock_path: dir.join("session.lock"),
            log_file: dir.join("ttyctl.log"),
            log_level: "info".to_string(),
            backtrace_depth: 32,
            raw_mode: RawOptions::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default path, or defaults if it is
    /// missing or unreadable.
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if path.exists() {
                if let Ok(config) = Self::load_from(&path) {
                    return config;
                }
            }
        }
        Self::default()
    }

    /// Load configuration from `path`, reporting any problem.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path().ok_or(ConfigError::NoHome)?;
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Get config file path
    pub fn config_path() -> Option<PathBuf> {
        config_dir().map(|dir| dir.join("config.toml"))
    }
}

fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = host::get_env(CONFIG_DIR_ENV) {
        return Some(PathBuf::from(dir));
    }
    host::home_dir().map(|home| home.join(CONFIG_DIR))
}
