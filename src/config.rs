//! Configuration for the KICKR bridge
//!
//! Loads the descriptor table and device settings from a YAML file. A built-in
//! default matches the reference KICKR BIKE SHIFT layout (12 buttons, two
//! clusters), so the bridge runs without any file present.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;

/// Configuration problems surfaced at load time
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("duplicate button prefix {0:04X}")]
    DuplicatePrefix(u16),
    #[error("duplicate button name '{0}'")]
    DuplicateName(String),
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default = "DescriptorTable::reference")]
    pub buttons: DescriptorTable,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            buttons: DescriptorTable::reference(),
        }
    }
}

/// Device discovery and reconnect settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    /// Advertised name prefix used for discovery ("KICKR BIKE SHIFT *")
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
    /// Bounded scan timeout; no device within it is a terminal failure
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,
    /// Fixed delay between reconnect attempts (not exponential)
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name_prefix: default_name_prefix(),
            scan_timeout_ms: default_scan_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

impl DeviceConfig {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

fn default_name_prefix() -> String {
    "KICKR BIKE SHIFT".to_string()
}

fn default_scan_timeout_ms() -> u64 {
    12_000
}

fn default_reconnect_delay_ms() -> u64 {
    1_500
}

/// Output behavior for a button
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ButtonBehavior {
    /// Momentary press on every accepted press event; release is ignored
    #[default]
    Tap,
    /// Key down on accepted press, key up on the matching accepted release
    Hold,
}

/// Static per-button configuration, keyed by prefix
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ButtonDescriptor {
    /// 4-hex-digit button family code from the first two frame bytes
    #[serde(with = "prefix_hex")]
    pub prefix: u16,
    /// Logical button name, unique across the table
    pub name: String,
    /// Output key to send; `None` disables the button
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default)]
    pub behavior: ButtonBehavior,
}

/// The fixed descriptor table, with a prefix index for decoding.
///
/// Built once at startup, never mutated.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(try_from = "Vec<ButtonDescriptor>", into = "Vec<ButtonDescriptor>")]
pub struct DescriptorTable {
    buttons: Vec<ButtonDescriptor>,
    by_prefix: HashMap<u16, usize>,
}

impl TryFrom<Vec<ButtonDescriptor>> for DescriptorTable {
    type Error = ConfigError;

    fn try_from(buttons: Vec<ButtonDescriptor>) -> Result<Self, Self::Error> {
        let mut by_prefix = HashMap::with_capacity(buttons.len());
        let mut names = Vec::with_capacity(buttons.len());

        for (index, button) in buttons.iter().enumerate() {
            if by_prefix.insert(button.prefix, index).is_some() {
                return Err(ConfigError::DuplicatePrefix(button.prefix));
            }
            if names.contains(&&button.name) {
                return Err(ConfigError::DuplicateName(button.name.clone()));
            }
            names.push(&button.name);
        }

        Ok(Self { buttons, by_prefix })
    }
}

impl From<DescriptorTable> for Vec<ButtonDescriptor> {
    fn from(table: DescriptorTable) -> Self {
        table.buttons
    }
}

impl DescriptorTable {
    /// Look up a descriptor by its frame prefix
    pub fn by_prefix(&self, prefix: u16) -> Option<&ButtonDescriptor> {
        self.by_prefix.get(&prefix).map(|&i| &self.buttons[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ButtonDescriptor> {
        self.buttons.iter()
    }

    pub fn len(&self) -> usize {
        self.buttons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buttons.is_empty()
    }

    /// The reference KICKR BIKE SHIFT layout: 12 buttons, steer buttons hold
    pub fn reference() -> Self {
        let button = |prefix, name: &str, key: Option<&str>, behavior| ButtonDescriptor {
            prefix,
            name: name.to_string(),
            key: key.map(str::to_string),
            behavior,
        };

        use ButtonBehavior::{Hold, Tap};
        let buttons = vec![
            // Right cluster
            button(0x0001, "Right Up", Some("7"), Tap),
            button(0x8000, "Right Down", Some("3"), Tap),
            button(0x0008, "Right Steer", Some("ArrowRight"), Hold),
            button(0x0004, "Right Shift Up", Some("i"), Tap),
            button(0x0002, "Right Shift Down", Some("k"), Tap),
            button(0x4000, "Right Brake", Some("Space"), Tap),
            // Left cluster
            button(0x0200, "Left Up", Some("3"), Tap),
            button(0x0400, "Left Down", Some("4"), Tap),
            button(0x2000, "Left Steer", Some("ArrowLeft"), Hold),
            button(0x1000, "Left Shift Up", Some("i"), Tap),
            button(0x0800, "Left Shift Down", Some("k"), Tap),
            button(0x0100, "Left Brake", Some("Space"), Tap),
        ];

        Self::try_from(buttons).expect("reference table is valid")
    }
}

mod prefix_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(prefix: &u16, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:04X}", prefix))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
        let text = String::deserialize(deserializer)?;
        if text.len() != 4 {
            return Err(serde::de::Error::custom(format!(
                "prefix '{}' must be exactly 4 hex digits",
                text
            )));
        }
        u16::from_str_radix(&text, 16)
            .map_err(|_| serde::de::Error::custom(format!("invalid hex prefix '{}'", text)))
    }
}

/// Load configuration from a YAML file
pub async fn load_config(path: &str) -> Result<BridgeConfig> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file: {}", path))?;

    let config: BridgeConfig = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config: {}", path))?;

    Ok(config)
}
