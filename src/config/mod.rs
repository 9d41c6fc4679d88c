//! Configuration management for Combo Link
//!
//! Handles loading, parsing, and hot-reloading of YAML configuration files.

pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tokio::fs;

use crate::protocol::{FrameMode, COMBO_COUNT};
use crate::transport::serial::DEFAULT_BAUD_RATE;
use crate::transport::{DeviceFilter, TransportConfig};

pub use watcher::ConfigWatcher;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub transport: TransportSection,
    #[serde(default)]
    pub combos: Vec<ComboConfig>,
    /// Period of the host -> device volume re-sync
    #[serde(default = "default_set_event_period")]
    pub set_event_period_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
}

/// Serial link and device matching
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SerialConfig {
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Exact port name (e.g. COM3)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vid: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u16>,
    /// Case-insensitive substring of the USB product name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            port: None,
            vid: None,
            pid: None,
            product: None,
        }
    }
}

impl SerialConfig {
    /// Device filter built from the matching fields
    pub fn device_filter(&self) -> DeviceFilter {
        DeviceFilter {
            port: self.port.clone(),
            vid: self.vid,
            pid: self.pid,
            product: self.product.clone(),
        }
    }
}

/// Transport tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportSection {
    #[serde(default = "default_capacity")]
    pub outbound_capacity: usize,
    #[serde(default = "default_capacity")]
    pub inbound_capacity: usize,
    #[serde(default = "default_discovery_interval")]
    pub discovery_interval_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_read_retry_delay")]
    pub read_retry_delay_ms: u64,
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
    #[serde(default)]
    pub inbound_framing: FrameMode,
    #[serde(default)]
    pub outbound_framing: FrameMode,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            outbound_capacity: default_capacity(),
            inbound_capacity: default_capacity(),
            discovery_interval_ms: default_discovery_interval(),
            max_backoff_ms: default_max_backoff(),
            read_retry_delay_ms: default_read_retry_delay(),
            max_consecutive_errors: default_max_consecutive_errors(),
            inbound_framing: FrameMode::Fixed,
            outbound_framing: FrameMode::Fixed,
        }
    }
}

impl TransportSection {
    pub fn to_transport_config(&self) -> TransportConfig {
        TransportConfig {
            outbound_capacity: self.outbound_capacity,
            inbound_capacity: self.inbound_capacity,
            inbound_mode: self.inbound_framing,
            outbound_mode: self.outbound_framing,
            discovery_interval: Duration::from_millis(self.discovery_interval_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            read_retry_delay: Duration::from_millis(self.read_retry_delay_ms),
            max_consecutive_errors: self.max_consecutive_errors,
        }
    }
}

/// Combo -> audio endpoint mapping
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ComboConfig {
    pub combo: u8,
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config = Self::from_yaml(&contents)
            .with_context(|| format!("Invalid config file: {}", path))?;

        Ok(config)
    }

    /// Parse and validate configuration from a YAML string
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?;

        config.validate()?;

        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: &str) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path))?;

        Ok(())
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.serial.baud_rate == 0 {
            anyhow::bail!("serial.baud_rate must be greater than 0");
        }

        let transport = &self.transport;
        if transport.outbound_capacity == 0 || transport.inbound_capacity == 0 {
            anyhow::bail!("transport channel capacities must be greater than 0");
        }
        if transport.max_consecutive_errors == 0 {
            anyhow::bail!("transport.max_consecutive_errors must be greater than 0");
        }
        if transport.discovery_interval_ms == 0 {
            anyhow::bail!("transport.discovery_interval_ms must be greater than 0");
        }
        if transport.max_backoff_ms < transport.discovery_interval_ms {
            anyhow::bail!(
                "transport.max_backoff_ms ({}) must be at least discovery_interval_ms ({})",
                transport.max_backoff_ms,
                transport.discovery_interval_ms
            );
        }
        if transport.read_retry_delay_ms == 0 {
            anyhow::bail!("transport.read_retry_delay_ms must be greater than 0");
        }
        if self.set_event_period_ms == 0 {
            anyhow::bail!("set_event_period_ms must be greater than 0");
        }

        let mut seen = HashSet::new();
        for (idx, combo) in self.combos.iter().enumerate() {
            if combo.combo >= COMBO_COUNT {
                anyhow::bail!(
                    "Combo entry {} has invalid id {} (must be 0-{})",
                    idx,
                    combo.combo,
                    COMBO_COUNT - 1
                );
            }
            if !seen.insert(combo.combo) {
                anyhow::bail!("Combo {} is configured more than once", combo.combo);
            }
            if combo.device_id.trim().is_empty() {
                anyhow::bail!("Combo {} device_id cannot be empty", combo.combo);
            }
        }

        Ok(())
    }

    /// Mapping for a combo id
    pub fn combo(&self, combo: u8) -> Option<&ComboConfig> {
        self.combos.iter().find(|c| c.combo == combo)
    }

    pub fn set_event_period(&self) -> Duration {
        Duration::from_millis(self.set_event_period_ms)
    }
}

// Default value functions
fn default_baud_rate() -> u32 { DEFAULT_BAUD_RATE }
fn default_capacity() -> usize { 100 }
fn default_discovery_interval() -> u64 { 500 }
fn default_max_backoff() -> u64 { 5_000 }
fn default_read_retry_delay() -> u64 { 100 }
fn default_max_consecutive_errors() -> u32 { 10 }
fn default_set_event_period() -> u64 { 10_000 }
