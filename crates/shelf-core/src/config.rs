//! Database configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/shelf/config.toml)
//! 3. Environment variables (SHELF_* prefix)
//!
//! Environment variables take precedence over config file values.
//!
//! ```toml
//! data_dir = "/var/lib/shelf"
//! id_generator_strategy = ["uuid", "timestamp", "bigint"]
//! flush_interval_secs = 30
//!
//! [tables.events]
//! id_generator = "bigint"
//!
//! [tables.events.sharding]
//! key = "id"
//! key_type = "integer"
//! intervals = { base = 0, width = 1000 }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::id::DEFAULT_STRATEGY;
use crate::table_config::TableConfig;

/// Environment variable prefix
const ENV_PREFIX: &str = "SHELF";

/// Name of the metadata directory inside the data directory
const METADATA_DIR_NAME: &str = ".metadata";

/// Database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding table files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Directory holding table metadata (default: `<data_dir>/.metadata`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_dir: Option<PathBuf>,

    /// Id generators tried, in order, for new tables that do not name one
    #[serde(default = "default_strategy")]
    pub id_generator_strategy: Vec<String>,

    /// Seconds between background metadata flushes; 0 disables them
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,

    /// Write logs here instead of stderr
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Per-table configuration, applied when a table is opened
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tables: BTreeMap<String, TableConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            metadata_dir: None,
            id_generator_strategy: default_strategy(),
            flush_interval_secs: default_flush_interval(),
            log_file: None,
            tables: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Configuration rooted at `data_dir`, otherwise default
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (SHELF_DATA_DIR, SHELF_FLUSH_INTERVAL_SECS)
    /// 2. Config file (~/.config/shelf/config.toml or SHELF_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        // SHELF_DATA_DIR
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        // SHELF_FLUSH_INTERVAL_SECS
        if let Ok(val) = std::env::var(format!("{}_FLUSH_INTERVAL_SECS", ENV_PREFIX)) {
            self.flush_interval_secs = val
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}_FLUSH_INTERVAL_SECS: {:?}", ENV_PREFIX, val))?;
        }

        Ok(())
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with SHELF_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shelf")
            .join("config.toml")
    }

    /// Get the metadata directory
    pub fn metadata_path(&self) -> PathBuf {
        self.metadata_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join(METADATA_DIR_NAME))
    }

    /// Interval of the background metadata flusher, if enabled
    pub fn flush_interval(&self) -> Option<Duration> {
        match self.flush_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Configuration for `table`, if the config file has one
    pub fn table(&self, table: &str) -> Option<&TableConfig> {
        self.tables.get(table)
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shelf")
}

fn default_strategy() -> Vec<String> {
    DEFAULT_STRATEGY.iter().map(|tag| tag.to_string()).collect()
}

fn default_flush_interval() -> u64 {
    30
}
