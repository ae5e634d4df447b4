//! Button settings export/import as a standalone JSON document

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

use super::{validate_buttons, ButtonConfig};

pub const SETTINGS_VERSION: &str = "1.0";

/// Portable snapshot of the button configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SettingsDocument {
    pub version: String,
    /// RFC 3339 export time
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    pub buttons: Vec<ButtonConfig>,
}

impl SettingsDocument {
    pub fn new(buttons: Vec<ButtonConfig>, locale: Option<String>) -> Self {
        Self::at(Utc::now(), buttons, locale)
    }

    fn at(now: DateTime<Utc>, buttons: Vec<ButtonConfig>, locale: Option<String>) -> Self {
        Self {
            version: SETTINGS_VERSION.to_string(),
            timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            locale,
            buttons,
        }
    }

    /// Parse a settings document. Anything without a `buttons` array is
    /// rejected before the buttons themselves are looked at.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(text).context("Settings file is not valid JSON")?;

        if !value.get("buttons").is_some_and(|b| b.is_array()) {
            anyhow::bail!("Invalid settings format: missing 'buttons' array");
        }

        let document: SettingsDocument =
            serde_json::from_value(value).context("Invalid settings format")?;
        validate_buttons(&document.buttons)?;
        Ok(document)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize settings")
    }

    pub async fn export(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_json()?)
            .await
            .with_context(|| format!("Failed to write settings file: {}", path.display()))
    }

    pub async fn import(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("Failed to import {}", path.display()))
    }
}

/// File name suggested for an export made at `now`
pub fn export_file_name(now: DateTime<Utc>) -> String {
    format!("midi-switcher-settings-{}.json", now.format("%Y-%m-%dT%H-%M-%S"))
}
