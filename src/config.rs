//! Configuration for the tag server.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagHubConfig {
    /// Polling and HTTP settings
    pub server: ServerConfig,

    /// Serial line settings for the field bus
    pub serial: SerialConfig,

    /// Tag name -> register binding
    pub tags: HashMap<String, TagConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Polling and HTTP settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Delay between poll cycles, in seconds
    #[serde(default = "default_polling_timeout")]
    pub polling_timeout_secs: u64,

    /// Maximum number of registers per read request
    #[serde(default = "default_packet_size")]
    pub packet_size: u16,

    /// Event cache capacity
    #[serde(default = "default_cache_max")]
    pub cache_max: usize,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_polling_timeout() -> u64 {
    3
}

fn default_packet_size() -> u16 {
    16
}

fn default_cache_max() -> usize {
    255
}

/// Serial line settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "/dev/plc")
    pub port: String,

    /// Baud rate (default: 9600)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Data bits (default: 7)
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,

    /// Parity: "none", "even", or "odd" (default: "even")
    #[serde(default = "default_parity")]
    pub parity: String,

    /// Stop bits: 1 or 2 (default: 2)
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,

    /// Modbus unit/slave ID (1-247)
    #[serde(default = "default_slave_id")]
    pub slave_id: u8,

    /// Read timeout in milliseconds (default: 3000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    7
}

fn default_parity() -> String {
    "even".to_string()
}

fn default_stop_bits() -> u8 {
    2
}

fn default_slave_id() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    3000
}

/// Binding of one tag to a device register.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagConfig {
    /// Register address; a tag without an address is never polled
    pub address: Option<u16>,

    /// Poll group this tag belongs to
    #[serde(rename = "type")]
    pub tag_type: TagType,
}

/// Poll groups. Groups are polled in the declaration order below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagType {
    /// Discrete inputs
    Input,
    /// Outputs (coil image registers)
    Output,
    /// Input counters
    Inputc,
}

impl TagType {
    /// Fixed polling order for groups.
    pub const ALL: [TagType; 3] = [TagType::Input, TagType::Output, TagType::Inputc];

    /// Return the string name for this group.
    pub fn as_str(&self) -> &'static str {
        match self {
            TagType::Input => "input",
            TagType::Output => "output",
            TagType::Inputc => "inputc",
        }
    }

    /// Parse a group name as it appears in URLs.
    pub fn from_str_opt(s: &str) -> Option<TagType> {
        match s {
            "input" => Some(TagType::Input),
            "output" => Some(TagType::Output),
            "inputc" => Some(TagType::Inputc),
            _ => None,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json"
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TagHubConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: TagHubConfig = json5::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration. Polling must not start on a config that
    /// fails here.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.packet_size == 0 {
            return Err(ConfigError::Validation(
                "packet_size must be greater than zero".to_string(),
            ));
        }

        if self.tags.is_empty() {
            return Err(ConfigError::Validation(
                "At least one tag must be configured".to_string(),
            ));
        }

        if self.serial.port.is_empty() {
            return Err(ConfigError::Validation(
                "Serial port cannot be empty".to_string(),
            ));
        }

        if self.serial.slave_id == 0 {
            return Err(ConfigError::Validation(
                "slave_id must be 1-247".to_string(),
            ));
        }

        match self.serial.parity.to_lowercase().as_str() {
            "none" | "even" | "odd" => {}
            other => {
                return Err(ConfigError::Validation(format!(
                    "Invalid parity '{}' (use none, even, or odd)",
                    other
                )));
            }
        }

        // Addresses are unique per tag
        let mut seen: HashMap<u16, &str> = HashMap::new();
        for (name, tag) in &self.tags {
            if let Some(address) = tag.address {
                if let Some(prev) = seen.insert(address, name) {
                    return Err(ConfigError::Validation(format!(
                        "Tags '{}' and '{}' share address {}",
                        prev, name, address
                    )));
                }
            }
        }

        // Every present group must have at least one pollable address
        for tag_type in TagType::ALL {
            let mut members = 0usize;
            let mut addressed = 0usize;
            for tag in self.tags.values() {
                if tag.tag_type == tag_type {
                    members += 1;
                    if tag.address.is_some() {
                        addressed += 1;
                    }
                }
            }
            if members > 0 && addressed == 0 {
                return Err(ConfigError::Validation(format!(
                    "Tag group '{}' has no tags with addresses",
                    tag_type.as_str()
                )));
            }
        }

        Ok(())
    }

    /// Groups that actually appear in the tag configuration, in polling order.
    pub fn present_groups(&self) -> Vec<TagType> {
        let present: HashSet<TagType> = self.tags.values().map(|t| t.tag_type).collect();
        TagType::ALL
            .into_iter()
            .filter(|t| present.contains(t))
            .collect()
    }

    /// Tag names belonging to one group, sorted.
    pub fn group_tag_names(&self, tag_type: TagType) -> Vec<String> {
        let mut names: Vec<String> = self
            .tags
            .iter()
            .filter(|(_, tag)| tag.tag_type == tag_type)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Addresses polled for one group.
    pub fn group_addresses(&self, tag_type: TagType) -> Vec<u16> {
        let mut addresses: Vec<u16> = self
            .tags
            .values()
            .filter(|tag| tag.tag_type == tag_type)
            .filter_map(|tag| tag.address)
            .collect();
        addresses.sort_unstable();
        addresses
    }
}
