//! Configuration module for lazyslot
//!
//! Engine-wide knobs that are not part of any operator graph: worker pool
//! size, default batch window and the log filter used by the binary.
//!
//! # Config Location
//!
//! The configuration file is stored in the platform-appropriate location:
//! - **Linux**: `~/.config/dev.lazyslot/engine.toml`
//! - **macOS**: `~/Library/Application Support/dev.lazyslot/engine.toml`
//! - **Windows**: `%APPDATA%\dev.lazyslot\engine.toml`
//!
//! # Example
//!
//! ```ignore
//! use lazyslot::{config::EngineConfig, Graph};
//!
//! let config = EngineConfig::load_or_default();
//! let graph = Graph::with_config(&config);
//! ```

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "dev.lazyslot";

/// Config filename
pub const CONFIG_FILE: &str = "engine.toml";

/// Default number of outstanding requests in a RoiRequestBatch
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default tracing filter
pub const DEFAULT_LOG_FILTER: &str = "info,lazyslot=debug";

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Get the path to the engine config file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join(CONFIG_FILE))
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of worker threads per graph
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Batch window used when a RoiRequestBatch is not given one
    #[serde(default = "default_batch_size")]
    pub default_batch_size: usize,

    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            default_batch_size: default_batch_size(),
            log_filter: default_log_filter(),
        }
    }
}

impl EngineConfig {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(EngineError::Config(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        if self.default_batch_size == 0 {
            return Err(EngineError::Config(
                "default_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Load a config file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the config from the default location, returning defaults on any error
    pub fn load_or_default() -> Self {
        let Some(path) = config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }

        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load engine config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save config to disk as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content).map_err(|e| {
            EngineError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }
}
