use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::app::error::AppError;

pub const CONFIG_PATH_ENV: &str = "ADB_BRIDGE_CONFIG_PATH";
const CONFIG_FILE_NAME: &str = ".adb_bridge_config.json";
const BACKUP_FILE_NAME: &str = ".adb_bridge_config.backup.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AdbSettings {
    /// Empty means "locate it".
    pub command_path: String,
    pub verbose: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeoutSettings {
    pub command_ms: u64,
    pub connect_ms: u64,
    pub reboot_ms: u64,
    pub wait_for_device_ms: u64,
    pub settle_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            command_ms: 5_000,
            connect_ms: 5_000,
            reboot_ms: 30_000,
            wait_for_device_ms: 60_000,
            settle_ms: 1_000,
            poll_interval_ms: 500,
        }
    }
}

impl TimeoutSettings {
    pub fn command(&self) -> Duration {
        Duration::from_millis(self.command_ms)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn reboot(&self) -> Duration {
        Duration::from_millis(self.reboot_ms)
    }

    pub fn wait_for_device(&self) -> Duration {
        Duration::from_millis(self.wait_for_device_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSettings {
    pub log_level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: !cfg!(debug_assertions),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MirrorSettings {
    pub player: String,
    pub framerate: u32,
    pub extra_args: String,
}

impl Default for MirrorSettings {
    fn default() -> Self {
        Self {
            player: "ffplay".to_string(),
            framerate: 60,
            extra_args: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClientConfig {
    #[serde(default)]
    pub adb: AdbSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub mirror: MirrorSettings,
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    home_dir().join(CONFIG_FILE_NAME)
}

pub fn backup_config_path() -> PathBuf {
    home_dir().join(BACKUP_FILE_NAME)
}

pub fn load_config() -> Result<ClientConfig, AppError> {
    load_config_from_path(&config_path())
}

pub fn save_config(config: &ClientConfig) -> Result<(), AppError> {
    save_config_to_path(config, &config_path(), &backup_config_path())
}

pub fn load_config_from_path(path: &Path) -> Result<ClientConfig, AppError> {
    if !path.exists() {
        return Ok(ClientConfig::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::system(format!("Failed to read config: {err}"), ""))?;
    let config: ClientConfig = serde_json::from_str(&raw)
        .map_err(|err| AppError::validation(format!("Failed to parse config: {err}"), ""))?;
    Ok(validate_config(config))
}

pub fn save_config_to_path(
    config: &ClientConfig,
    path: &Path,
    backup_path: &Path,
) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if path.exists() {
        let _ = fs::copy(path, backup_path);
    }
    let payload = serde_json::to_string_pretty(config)
        .map_err(|err| AppError::system(format!("Failed to serialize config: {err}"), ""))?;
    fs::write(path, payload)
        .map_err(|err| AppError::system(format!("Failed to write config: {err}"), ""))?;
    Ok(())
}

pub fn validate_config(mut config: ClientConfig) -> ClientConfig {
    let defaults = TimeoutSettings::default();
    if config.timeouts.connect_ms == 0 {
        config.timeouts.connect_ms = defaults.connect_ms;
    }
    if config.timeouts.reboot_ms == 0 {
        config.timeouts.reboot_ms = defaults.reboot_ms;
    }
    if config.timeouts.wait_for_device_ms == 0 {
        config.timeouts.wait_for_device_ms = defaults.wait_for_device_ms;
    }
    if config.timeouts.settle_ms > 10_000 {
        config.timeouts.settle_ms = defaults.settle_ms;
    }
    if !(10..=10_000).contains(&config.timeouts.poll_interval_ms) {
        config.timeouts.poll_interval_ms = defaults.poll_interval_ms;
    }
    if config.logging.log_level.trim().is_empty() {
        config.logging.log_level = LoggingSettings::default().log_level;
    }
    if config.mirror.player.trim().is_empty() {
        config.mirror.player = MirrorSettings::default().player;
    }
    if !(1..=240).contains(&config.mirror.framerate) {
        config.mirror.framerate = MirrorSettings::default().framerate;
    }
    config
}
