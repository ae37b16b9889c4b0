//! Configuration for the payload tools
//!
//! Loaded from a TOML file; every section and field is optional.
//!
//! # Example
//! ```toml
//! [decode]
//! year = 2012
//! waveforms = false
//!
//! [trim]
//! boards = ["a1b2c3d4e5f6", "0x0123456789ab"]
//! drop_triggers = true
//! jobs = 4
//!
//! [emulator]
//! seed = 42
//! hits_per_event = 50
//! ```

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::common::BoardId;
use crate::decoder::DecodeConfiguration;
use crate::emulator::EmulatorConfig;
use crate::payload::TrimSelection;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid mainboard ID {0:?}")]
    InvalidBoard(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub decode: DecodeSettings,
    #[serde(default)]
    pub trim: TrimSettings,
    #[serde(default)]
    pub emulator: EmulatorConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }
}

/// `[decode]` section
#[derive(Debug, Clone, Deserialize)]
pub struct DecodeSettings {
    /// Run year for bare record streams (0 = unknown); envelopes carry their own
    #[serde(default)]
    pub year: u16,

    /// Decode trigger request records
    #[serde(default = "default_true")]
    pub triggers: bool,

    /// Decode waveforms (only affects full decodes)
    #[serde(default = "default_true")]
    pub waveforms: bool,

    /// Keep records of unknown type as opaque spans when scanning
    #[serde(default)]
    pub skip_unsupported: bool,
}

impl Default for DecodeSettings {
    fn default() -> Self {
        Self {
            year: 0,
            triggers: true,
            waveforms: true,
            skip_unsupported: false,
        }
    }
}

impl DecodeSettings {
    /// Decode context with global time 0
    pub fn configuration(&self) -> DecodeConfiguration {
        DecodeConfiguration {
            global_time: 0,
            year: self.year,
            waveforms: self.waveforms,
            triggers: self.triggers,
        }
    }
}

fn default_true() -> bool {
    true
}

/// `[trim]` section
#[derive(Debug, Clone, Deserialize)]
pub struct TrimSettings {
    /// Mainboard IDs (hex) whose launches are removed
    #[serde(default)]
    pub boards: Vec<String>,

    /// Also remove trigger request records
    #[serde(default)]
    pub drop_triggers: bool,

    /// Worker threads for batch trimming
    #[serde(default = "default_jobs")]
    pub jobs: usize,
}

impl Default for TrimSettings {
    fn default() -> Self {
        Self {
            boards: Vec::new(),
            drop_triggers: false,
            jobs: default_jobs(),
        }
    }
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl TrimSettings {
    pub fn selection(&self) -> Result<TrimSelection, ConfigError> {
        let boards = parse_boards(&self.boards)?;
        Ok(TrimSelection::boards(boards).with_triggers(self.drop_triggers))
    }
}

/// Parse hex mainboard IDs
pub fn parse_boards<S: AsRef<str>>(boards: &[S]) -> Result<Vec<BoardId>, ConfigError> {
    boards
        .iter()
        .map(|s| {
            s.as_ref()
                .parse::<BoardId>()
                .map_err(|_| ConfigError::InvalidBoard(s.as_ref().to_string()))
        })
        .collect()
}
