//! Configuration management for MIDI Switcher
//!
//! Handles loading, parsing, and hot-reloading of the YAML configuration file,
//! plus JSON export/import of the button settings.

pub mod settings;
pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::fs;

use crate::midi::MessageDescriptor;

pub use settings::SettingsDocument;
pub use watcher::ConfigWatcher;

pub const DEFAULT_CONFIG_PATH: &str = "midi-switcher.yaml";

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub midi: MidiConfig,
    #[serde(default = "default_buttons")]
    pub buttons: Vec<ButtonConfig>,
    #[serde(default)]
    pub log: LogConfig,
    /// Presses closer together than this are ignored
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
}

/// MIDI backend settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MidiConfig {
    /// Client name registered with the system MIDI service
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// How often the port list is rescanned for hot-plug changes
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_true")]
    pub auto_connect: bool,
    #[serde(default = "default_auto_connect_delay_ms")]
    pub auto_connect_delay_ms: u64,
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            client_name: default_client_name(),
            poll_interval_ms: default_poll_interval_ms(),
            auto_connect: true,
            auto_connect_delay_ms: default_auto_connect_delay_ms(),
            reconnect_attempts: default_reconnect_attempts(),
        }
    }
}

/// A UI button: messages sent on press and on release
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ButtonConfig {
    pub id: u32,
    pub label: String,
    #[serde(default)]
    pub press: Vec<MessageDescriptor>,
    #[serde(default)]
    pub release: Vec<MessageDescriptor>,
}

impl ButtonConfig {
    /// Momentary CC button: 127 on press, 0 on release
    pub fn momentary_cc(id: u32, label: impl Into<String>, channel: u8, controller: u8) -> Self {
        Self {
            id,
            label: label.into(),
            press: vec![MessageDescriptor::cc(channel, controller, 127)],
            release: vec![MessageDescriptor::cc(channel, controller, 0)],
        }
    }
}

/// Message log settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LogConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            midi: MidiConfig::default(),
            buttons: default_buttons(),
            log: LogConfig::default(),
            debounce_ms: default_debounce_ms(),
            locale: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path))?;

        config.validate()?;

        Ok(config)
    }

    /// Load the file if it exists, otherwise write the defaults there first
    pub async fn load_or_create(path: &str) -> Result<Self> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            let config = Self::default();
            config.save(path).await?;
            tracing::info!("Wrote default configuration to {}", path);
            return Ok(config);
        }
        Self::load(path).await
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
        if self.midi.client_name.trim().is_empty() {
            anyhow::bail!("MIDI client_name cannot be empty");
        }
        if self.midi.poll_interval_ms == 0 {
            anyhow::bail!("MIDI poll_interval_ms must be greater than 0");
        }
        if self.log.max_entries == 0 {
            anyhow::bail!("log.max_entries must be greater than 0");
        }

        validate_buttons(&self.buttons)
    }
}

/// Check button ids are unique and every message can be encoded
pub fn validate_buttons(buttons: &[ButtonConfig]) -> Result<()> {
    let mut seen = HashSet::new();
    for button in buttons {
        if !seen.insert(button.id) {
            anyhow::bail!("Duplicate button id {}", button.id);
        }

        for (phase, list) in [("press", &button.press), ("release", &button.release)] {
            for (idx, descriptor) in list.iter().enumerate() {
                descriptor.encode().with_context(|| {
                    format!(
                        "Invalid {} message {} for button {} ('{}')",
                        phase, idx, button.id, button.label
                    )
                })?;
            }
        }
    }
    Ok(())
}

fn default_buttons() -> Vec<ButtonConfig> {
    vec![
        ButtonConfig::momentary_cc(0, "Sustain", 0, 64),
        ButtonConfig::momentary_cc(1, "Portamento", 0, 65),
    ]
}

fn default_client_name() -> String { "midi-switcher".to_string() }
fn default_poll_interval_ms() -> u64 { 500 }
fn default_true() -> bool { true }
fn default_auto_connect_delay_ms() -> u64 { 1000 }
fn default_reconnect_attempts() -> u32 { 3 }
fn default_max_entries() -> usize { 50 }
fn default_debounce_ms() -> u64 { 300 }

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_minimal_yaml_gets_defaults() {
        let config: AppConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.midi.poll_interval_ms, 500);
        assert_eq!(config.log.max_entries, 50);
        assert_eq!(config.debounce_ms, 300);
        assert_eq!(config.buttons.len(), 2);
        assert_eq!(config.buttons[0].press[0].encode().unwrap().as_bytes(), &[0xB0, 64, 127]);
        assert_eq!(config.buttons[1].release[0].encode().unwrap().as_bytes(), &[0xB0, 65, 0]);
    }

    #[test]
    fn test_parse_buttons() {
        let yaml = r#"
midi:
  client_name: "studio"
  auto_connect: false
buttons:
  - id: 3
    label: "Scene"
    press:
      - { type: program, channel: 2, program: 5 }
      - { type: note, channel: 0, note: 60, velocity: 100 }
    release:
      - { type: note, channel: 0, note: 60 }
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.midi.client_name, "studio");
        assert!(!config.midi.auto_connect);
        assert_eq!(config.midi.reconnect_attempts, 3);
        assert_eq!(config.buttons[0].press.len(), 2);
        assert_eq!(config.buttons[0].release[0].encode().unwrap().as_bytes(), &[0x80, 60, 0]);
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let mut config = AppConfig::default();
        config.buttons[1].id = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate button id 0"));
    }

    #[test]
    fn test_validate_rejects_bad_channel() {
        let mut config = AppConfig::default();
        config.buttons[0].press[0].channel = 16;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_type() {
        let yaml = r#"
buttons:
  - id: 0
    label: "Clock"
    press:
      - { type: clock, channel: 0 }
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(format!("{:#}", err).contains("Unsupported MIDI message type: clock"));
    }

    #[tokio::test]
    async fn test_save_and_load() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("config.yaml");
        let path = path.to_string_lossy().to_string();

        let mut config = AppConfig::default();
        config.debounce_ms = 150;
        config.locale = Some("fr".to_string());
        config.save(&path).await?;

        let loaded = AppConfig::load(&path).await?;
        assert_eq!(loaded, config);
        Ok(())
    }

    #[tokio::test]
    async fn test_load_or_create_writes_defaults() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("fresh.yaml");
        let path = path.to_string_lossy().to_string();

        let config = AppConfig::load_or_create(&path).await?;
        assert_eq!(config, AppConfig::default());
        assert!(std::path::Path::new(&path).exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "buttons: [").unwrap();
        assert!(AppConfig::load(&path.to_string_lossy()).await.is_err());
    }
}
