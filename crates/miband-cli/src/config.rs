//! Configuration file loading.
//!
//! The file is optional and read-only: flags and environment variables
//! always win over it.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Folder holding exported key files
    #[serde(default)]
    pub key_dir: Option<PathBuf>,

    /// Database path
    #[serde(default)]
    pub database: Option<PathBuf>,

    /// Scan timeout in seconds
    #[serde(default)]
    pub scan_timeout: Option<u64>,

    /// Samples buffered between the band and the database
    #[serde(default)]
    pub buffer_size: Option<usize>,
}

impl Config {
    /// Get the config file path
    pub fn path() -> PathBuf {
        config_dir().join("config.toml")
    }

    /// Load config from the default location, or return default if not found
    pub fn load() -> Self {
        let path = Self::path();
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}", e);
                Self::default()
            }
        }
    }

    /// Load config from a specific file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    /// Key folder: flag, then config file, then `<config_dir>/miband/keys`.
    pub fn resolve_key_dir(&self, flag: Option<PathBuf>) -> PathBuf {
        flag.or_else(|| self.key_dir.clone())
            .unwrap_or_else(|| config_dir().join("keys"))
    }

    /// Database path: flag, then config file, then the store's default.
    pub fn resolve_database(&self, flag: Option<PathBuf>) -> PathBuf {
        flag.or_else(|| self.database.clone())
            .unwrap_or_else(miband_store::default_db_path)
    }

    pub fn resolve_scan_timeout(&self, flag: Option<u64>) -> Option<u64> {
        flag.or(self.scan_timeout)
    }

    pub fn resolve_buffer_size(&self, flag: Option<usize>) -> Option<usize> {
        flag.or(self.buffer_size)
    }
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("miband")
}
