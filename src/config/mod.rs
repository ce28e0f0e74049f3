//! Configuration for the demux driver
//!
//! Loaded from a TOML file:
//! ```toml
//! [stream]
//! buffer_capacity = 8192
//! pool_layout = "layout.json"   # optional JSON buffer layout
//!
//! [output]
//! dump_records = false
//! ```
//! The pool layout JSON format is documented in [`crate::buffer`].

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::buffer::{PoolLayout, DEFAULT_CAPACITY};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Failed to parse pool layout JSON: {0}")]
    LayoutError(#[from] serde_json::Error),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Stream/buffering settings
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Per-buffer capacity watermark in records
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Optional path to a JSON pool layout; the default pool is one
    /// buffer per configured channel
    #[serde(default)]
    pub pool_layout: Option<PathBuf>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            pool_layout: None,
        }
    }
}

fn default_buffer_capacity() -> usize {
    DEFAULT_CAPACITY
}

/// Output settings for the demux driver
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    /// Print each flushed record as a JSON line
    #[serde(default)]
    pub dump_records: bool,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load the referenced pool layout, if one is configured
    pub fn load_pool_layout(&self) -> Result<Option<PoolLayout>, ConfigError> {
        match &self.stream.pool_layout {
            Some(path) => {
                let json = std::fs::read_to_string(path)?;
                Ok(Some(PoolLayout::from_json(&json)?))
            }
            None => Ok(None),
        }
    }
}
