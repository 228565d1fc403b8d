//! User settings (persisted in the key-value store) and engine tuning
//! (TOML file).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::matcher::Boundary;
use crate::error::{Error, Result, StoreError};
use crate::vocab::store::{KeyValueStore, Record};

pub const SETTINGS_KEYS: &[&str] = &[
    "autoTranslate",
    "sourceLanguage",
    "targetLanguage",
    "themeColor",
    "colorPalette",
    "disabledSites",
];

pub const DEFAULT_PALETTE: &[&str] = &["#10b981", "#f59e0b", "#ef4444"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub auto_translate: bool,
    pub source_language: String,
    pub target_language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme_color: Option<String>,
    pub color_palette: Vec<String>,
    /// Hostnames where annotation is switched off.
    pub disabled_sites: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_translate: true,
            source_language: "auto".into(),
            target_language: "zh-CN".into(),
            theme_color: None,
            color_palette: DEFAULT_PALETTE.iter().map(|c| c.to_string()).collect(),
            disabled_sites: Vec::new(),
        }
    }
}

impl Settings {
    /// Read settings, falling back to defaults for missing keys.
    pub fn load(store: &dyn KeyValueStore) -> Result<Self, StoreError> {
        let record = store.get(SETTINGS_KEYS)?;
        Ok(serde_json::from_value(Value::Object(record))?)
    }

    pub fn save(&self, store: &mut dyn KeyValueStore) -> Result<(), StoreError> {
        match serde_json::to_value(self)? {
            Value::Object(record) => store.set(record),
            _ => Ok(()),
        }
    }

    /// Write a single setting.
    pub fn save_key(store: &mut dyn KeyValueStore, key: &str, value: Value) -> Result<(), StoreError> {
        let mut record = Record::new();
        record.insert(key.to_string(), value);
        store.set(record)
    }

    pub fn is_site_disabled(&self, host: &str) -> bool {
        self.disabled_sites.iter().any(|s| s.eq_ignore_ascii_case(host))
    }

    /// Add or remove `host` from the disabled list. Returns whether it changed.
    pub fn set_site_disabled(&mut self, host: &str, disabled: bool) -> bool {
        let present = self.is_site_disabled(host);
        match (present, disabled) {
            (false, true) => {
                self.disabled_sites.push(host.to_lowercase());
                true
            }
            (true, false) => {
                self.disabled_sites.retain(|s| !s.eq_ignore_ascii_case(host));
                true
            }
            _ => false,
        }
    }
}

/// Engine timings and limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub debounce_ms: u64,
    pub settle_ms: u64,
    pub translate_timeout_ms: u64,
    pub max_selection_words: usize,
    pub boundary: Boundary,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 1000,
            settle_ms: 10,
            translate_timeout_ms: 10_000,
            max_selection_words: 30,
            boundary: Boundary::Word,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| Error::Validation(format!("engine config: {}", e)))?;
        if config.max_selection_words == 0 {
            return Err(Error::Validation("max_selection_words must be at least 1".into()));
        }
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(StoreError::from)?;
        Self::from_toml_str(&contents)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn translate_timeout(&self) -> Duration {
        Duration::from_millis(self.translate_timeout_ms)
    }
}
