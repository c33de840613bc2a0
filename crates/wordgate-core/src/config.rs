use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::usage::UsageMode;

/// Get the local data directory for wordgate.
///
/// # Errors
///
/// Returns an error if the local data directory cannot be determined.
pub fn get_data_dir() -> Result<PathBuf> {
    let mut path =
        dirs::data_local_dir().ok_or_else(|| anyhow::anyhow!("Failed to get local data dir"))?;
    path.push("wordgate");
    Ok(path)
}

/// Engine configuration read from `config.toml` in the data directory.
///
/// Every field has a default so a missing or partial file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub mode: UsageMode,
    /// Usage threshold in fast-test mode
    pub threshold_seconds: u64,
    /// Usage threshold in production mode
    pub threshold_minutes: u64,
    /// Default countdown length; the stored preference wins once set
    pub delay_minutes: u32,
    /// Identity of the host application in foreground samples
    pub host_app_id: String,
    pub min_dwell_seconds: u64,
    /// Let a crossed usage threshold cut the countdown short
    pub enforce_usage_threshold: bool,
    pub tick_interval_ms: u64,
    pub sample_window_seconds: u64,
    /// Program and arguments drawing the blocking surface
    pub overlay_command: Vec<String>,
    /// Program and arguments bringing the host app to the front
    pub return_command: Vec<String>,
    pub notifications: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: UsageMode::Production,
            threshold_seconds: 5,
            threshold_minutes: 15,
            delay_minutes: 15,
            host_app_id: String::from("wordgate"),
            min_dwell_seconds: 20,
            enforce_usage_threshold: false,
            tick_interval_ms: 1000,
            sample_window_seconds: 10,
            overlay_command: Vec::new(),
            return_command: Vec::new(),
            notifications: true,
        }
    }
}

impl EngineConfig {
    /// Default location of the configuration file
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be determined
    pub fn default_path() -> Result<PathBuf> {
        Ok(get_data_dir()?.join("config.toml"))
    }

    /// Load from `path`; a missing file yields the defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("Invalid config in {}", path.display()))
    }

    /// Write to `path`, creating parent directories
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Usage threshold in seconds for the configured mode
    #[must_use]
    pub const fn threshold_secs(&self) -> u64 {
        match self.mode {
            UsageMode::FastTest => self.threshold_seconds,
            UsageMode::Production => self.threshold_minutes * 60,
        }
    }

    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    #[must_use]
    pub const fn sample_window(&self) -> Duration {
        Duration::from_secs(self.sample_window_seconds)
    }

    /// Set a single option from its textual form
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown key or an unparsable value
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "mode" => self.mode = value.parse()?,
            "threshold_seconds" => self.threshold_seconds = value.parse()?,
            "threshold_minutes" => self.threshold_minutes = value.parse()?,
            "delay_minutes" => self.delay_minutes = value.parse()?,
            "host_app_id" => self.host_app_id = value.to_string(),
            "min_dwell_seconds" => self.min_dwell_seconds = value.parse()?,
            "enforce_usage_threshold" => self.enforce_usage_threshold = value.parse()?,
            "tick_interval_ms" => self.tick_interval_ms = value.parse()?,
            "sample_window_seconds" => self.sample_window_seconds = value.parse()?,
            "overlay_command" => self.overlay_command = split_command(value),
            "return_command" => self.return_command = split_command(value),
            "notifications" => self.notifications = value.parse()?,
            _ => anyhow::bail!("Unknown config key: {key}"),
        }
        Ok(())
    }

    /// Textual form of a single option
    #[must_use]
    pub fn get_value(&self, key: &str) -> Option<String> {
        let value = match key {
            "mode" => self.mode.to_string(),
            "threshold_seconds" => self.threshold_seconds.to_string(),
            "threshold_minutes" => self.threshold_minutes.to_string(),
            "delay_minutes" => self.delay_minutes.to_string(),
            "host_app_id" => self.host_app_id.clone(),
            "min_dwell_seconds" => self.min_dwell_seconds.to_string(),
            "enforce_usage_threshold" => self.enforce_usage_threshold.to_string(),
            "tick_interval_ms" => self.tick_interval_ms.to_string(),
            "sample_window_seconds" => self.sample_window_seconds.to_string(),
            "overlay_command" => self.overlay_command.join(" "),
            "return_command" => self.return_command.join(" "),
            "notifications" => self.notifications.to_string(),
            _ => return None,
        };
        Some(value)
    }

    pub const KEYS: [&'static str; 12] = [
        "mode",
        "threshold_seconds",
        "threshold_minutes",
        "delay_minutes",
        "host_app_id",
        "min_dwell_seconds",
        "enforce_usage_threshold",
        "tick_interval_ms",
        "sample_window_seconds",
        "overlay_command",
        "return_command",
        "notifications",
    ];
}

fn split_command(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}
