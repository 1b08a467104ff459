use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

use crate::app::emulator::classifier::{default_marker_rules, MarkerRule};
use crate::app::error::AppError;

const DEFAULT_COMMAND_TIMEOUT_SECS: i32 = 30;
const MAX_COMMAND_TIMEOUT_SECS: i32 = 600;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SdkSettings {
    /// Overrides `ANDROID_HOME` when non-empty.
    #[serde(default)]
    pub sdk_path: String,
    /// Overrides the AVD home lookup when non-empty.
    #[serde(default)]
    pub avd_home: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandSettings {
    /// Seconds before an adb or `-list-avds` call is killed.
    pub command_timeout: i32,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSettings {
    pub log_level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub sdk: SdkSettings,
    #[serde(default)]
    pub command: CommandSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default = "default_marker_rules")]
    pub markers: Vec<MarkerRule>,
    #[serde(default)]
    pub version: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sdk: SdkSettings::default(),
            command: CommandSettings::default(),
            logging: LoggingSettings::default(),
            markers: default_marker_rules(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl AppConfig {
    pub fn command_timeout(&self) -> Duration {
        let secs = self.command.command_timeout.clamp(1, MAX_COMMAND_TIMEOUT_SECS);
        Duration::from_secs(u64::from(secs.unsigned_abs()))
    }
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("AVD_LAUNCHER_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".avd_launcher_config.json")
}

pub fn backup_config_path(path: &Path) -> PathBuf {
    path.with_extension("backup.json")
}

pub fn load_config(trace_id: &str) -> Result<AppConfig, AppError> {
    load_config_from_path(&config_path(), trace_id)
}

pub fn save_config(config: &AppConfig, trace_id: &str) -> Result<AppConfig, AppError> {
    let path = config_path();
    save_config_to_path(config, &path, &backup_config_path(&path), trace_id)
}

pub fn load_config_from_path(path: &Path, trace_id: &str) -> Result<AppConfig, AppError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::system(format!("Failed to read config: {err}"), trace_id))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|err| AppError::system(format!("Failed to parse config: {err}"), trace_id))?;
    let config = serde_json::from_value(value).unwrap_or_else(|err| {
        warn!(trace_id = %trace_id, error = %err, "config has unexpected shape; using defaults");
        AppConfig::default()
    });
    Ok(normalize_config(config))
}

/// Writes the normalized config, keeping the previous file as a backup.
pub fn save_config_to_path(
    config: &AppConfig,
    path: &Path,
    backup_path: &Path,
    trace_id: &str,
) -> Result<AppConfig, AppError> {
    let config = normalize_config(config.clone());
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if path.exists() {
        let _ = fs::copy(path, backup_path);
    }
    let payload = serde_json::to_string_pretty(&config)
        .map_err(|err| AppError::system(format!("Failed to serialize config: {err}"), trace_id))?;
    fs::write(path, payload)
        .map_err(|err| AppError::system(format!("Failed to write config: {err}"), trace_id))?;
    Ok(config)
}

pub fn normalize_config(mut config: AppConfig) -> AppConfig {
    if !(1..=MAX_COMMAND_TIMEOUT_SECS).contains(&config.command.command_timeout) {
        config.command.command_timeout = DEFAULT_COMMAND_TIMEOUT_SECS;
    }
    config.logging.log_level = config.logging.log_level.trim().to_lowercase();
    if config.logging.log_level.is_empty() {
        config.logging.log_level = LoggingSettings::default().log_level;
    }
    config.sdk.sdk_path = config.sdk.sdk_path.trim().to_string();
    config.sdk.avd_home = config.sdk.avd_home.trim().to_string();
    config.markers.retain(|rule| !rule.pattern.is_empty());
    if config.markers.is_empty() {
        config.markers = default_marker_rules();
    }
    config
}
