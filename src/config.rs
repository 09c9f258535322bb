//! Server settings.
//!
//! Loaded from an optional YAML file, then overridden by `DITTO_*` environment
//! variables. Every field has a default, so an empty file (or none) is a valid
//! configuration.
//!
//! # Example (YAML)
//!
//! ```yaml
//! database_path: /data/quotes.db
//! bind: "0.0.0.0:8000"
//! default_width: 800
//! default_height: 480
//! cache_enabled: true
//!
//! layout:
//!   blur_sigma: 3.0
//!   truncate_at_sentence: true
//!
//! sync:
//!   source_url: https://quotes.example.com/feed.json
//!   schedule:
//!     timezone: "Europe/London"
//!     time: "02:00"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::compose::LayoutConfig;
use crate::error::Error;
use crate::schedule::SyncSchedule;
use crate::{DEFAULT_HEIGHT, DEFAULT_WIDTH};

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// SQLite database file
    pub database_path: PathBuf,
    /// Listen address
    pub bind: String,
    /// Width given to clients that register without one
    pub default_width: u32,
    /// Height given to clients that register without one
    pub default_height: u32,
    /// Compositor layout
    pub layout: LayoutConfig,
    /// Keep encoded frames in memory
    pub cache_enabled: bool,
    /// Maximum number of cached frames
    pub cache_capacity: usize,
    /// How many requests the status page lists
    pub recent_connections: usize,
    /// Content source synchronization
    pub sync: SyncSettings,
}

/// Content source settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Feed URL; sync is disabled when unset
    pub source_url: Option<String>,
    /// Bearer token sent to the feed
    #[serde(skip_serializing)]
    pub source_token: Option<String>,
    /// Run one pass before serving
    pub sync_on_startup: bool,
    /// When the background pass runs
    pub schedule: SyncSchedule,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("quotes.db"),
            bind: "0.0.0.0:8000".to_string(),
            default_width: DEFAULT_WIDTH,
            default_height: DEFAULT_HEIGHT,
            layout: LayoutConfig::default(),
            cache_enabled: false,
            cache_capacity: 64,
            recent_connections: 10,
            sync: SyncSettings::default(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            source_url: None,
            source_token: None,
            sync_on_startup: true,
            schedule: SyncSchedule::default(),
        }
    }
}

impl Settings {
    /// Load settings from a YAML file and apply environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let mut settings = Self::from_yaml(&content)?;
        settings.apply_env()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Defaults plus environment overrides, for running without a file.
    pub fn from_env() -> Result<Self, Error> {
        let mut settings = Self::default();
        settings.apply_env()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a YAML string. No environment overrides.
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).map_err(|e| Error::Config(format!("Invalid config YAML: {}", e)))
    }

    /// Apply `DITTO_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), Error> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `DITTO_*` overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("DITTO_DATABASE") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(bind) = lookup("DITTO_BIND") {
            self.bind = bind;
        }
        if let Some(width) = lookup("DITTO_DEFAULT_WIDTH") {
            self.default_width = parse_env("DITTO_DEFAULT_WIDTH", &width)?;
        }
        if let Some(height) = lookup("DITTO_DEFAULT_HEIGHT") {
            self.default_height = parse_env("DITTO_DEFAULT_HEIGHT", &height)?;
        }
        if let Some(url) = lookup("DITTO_SOURCE_URL") {
            self.sync.source_url = Some(url).filter(|u| !u.trim().is_empty());
        }
        if let Some(token) = lookup("DITTO_SOURCE_TOKEN") {
            self.sync.source_token = Some(token).filter(|t| !t.is_empty());
        }
        if let Some(enabled) = lookup("DITTO_CACHE_ENABLED") {
            self.cache_enabled = parse_bool("DITTO_CACHE_ENABLED", &enabled)?;
        }
        Ok(())
    }

    /// Reject settings the server cannot start with.
    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_dimensions(
            i64::from(self.default_width),
            i64::from(self.default_height),
        )
        .map_err(|e| Error::Config(format!("default size: {}", e)))?;
        self.layout.validate()?;
        self.sync.schedule.validate()?;
        if self.bind.trim().is_empty() {
            return Err(Error::Config("bind address is empty".to_string()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, Error> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} has invalid value '{}'", key, value)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, Error> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::Config(format!("{} has invalid value '{}'", key, value))),
    }
}
