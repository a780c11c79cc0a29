//! Configuration resolution for scriptsync.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/scriptsync/settings.json)
//! 3. Explicit config file (replaces the global file when given)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Complete scriptsync configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub backup: BackupConfig,
}

/// One configured script host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    /// `host` or `host:port`.
    pub address: String,
    /// Device class; probed from the device when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Polling and push-channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub poll_interval_secs: u64,
    /// Keep a push-notification connection open per device.
    pub listen_events: bool,
    pub reconnect_delay_secs: u64,
    pub request_timeout_secs: u64,
    pub upload_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            listen_events: true,
            reconnect_delay_secs: 5,
            request_timeout_secs: 10,
            upload_timeout_secs: 15,
        }
    }
}

impl SyncConfig {
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub const fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }
}

/// Chunked upload, retry and rollback tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Bytes per `PutCode` call.
    pub chunk_size: usize,
    /// Whole-upload attempts for a plain upload (0 or 1 = single attempt).
    pub retry_count: u32,
    pub retry_backoff_ms: u64,
    /// Pause between chunks so the device buffer can drain.
    pub chunk_delay_ms: u64,
    pub edit_retry_count: u32,
    /// Pause between deleting the old script and uploading its replacement.
    pub edit_settle_ms: u64,
    pub rollback_retry_count: u32,
    pub rollback_backoff_ms: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4096,
            retry_count: 3,
            retry_backoff_ms: 1000,
            chunk_delay_ms: 100,
            edit_retry_count: 3,
            edit_settle_ms: 1000,
            rollback_retry_count: 5,
            rollback_backoff_ms: 2000,
        }
    }
}

/// Local backup store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Backup directory; defaults to `~/.scriptsync/backups`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    /// Backups kept per script id; oldest are discarded first.
    pub max_per_script: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_per_script: 10,
        }
    }
}

impl BackupConfig {
    /// Resolved backup directory.
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".scriptsync")
                .join("backups")
        })
    }
}

impl Config {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.transfer.chunk_size == 0 {
            return Err(Error::Config("transfer.chunk_size must be > 0".into()));
        }
        if self.sync.poll_interval_secs == 0 {
            return Err(Error::Config("sync.poll_interval_secs must be > 0".into()));
        }
        if self.backup.max_per_script == 0 {
            return Err(Error::Config("backup.max_per_script must be > 0".into()));
        }
        let mut names = std::collections::HashSet::new();
        for device in &self.devices {
            if device.address.trim().is_empty() {
                return Err(Error::Config(format!(
                    "device '{}' has an empty address",
                    device.name
                )));
            }
            if !names.insert(device.name.as_str()) {
                return Err(Error::Config(format!(
                    "device name '{}' is configured twice",
                    device.name
                )));
            }
        }
        Ok(())
    }

    /// Find a configured device by name or address.
    pub fn find_device(&self, key: &str) -> Option<&DeviceConfig> {
        self.devices
            .iter()
            .find(|d| d.name == key)
            .or_else(|| self.devices.iter().find(|d| d.address == key))
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut config = match explicit {
        Some(path) => load_config_file(path)?,
        None => match global_config_path() {
            Some(global_path) if global_path.exists() => load_config_file(&global_path)?,
            _ => Config::default(),
        },
    };

    apply_env_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(dirs::config_dir)
        .map(|p| p.join("scriptsync").join("settings.json"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("SCRIPTSYNC_POLL_INTERVAL_SECS") {
        if let Ok(n) = val.parse() {
            config.sync.poll_interval_secs = n;
        }
    }
    if let Ok(val) = std::env::var("SCRIPTSYNC_LISTEN_EVENTS") {
        if let Ok(b) = val.parse() {
            config.sync.listen_events = b;
        }
    }
    if let Ok(val) = std::env::var("SCRIPTSYNC_BACKUP_DIR") {
        config.backup.dir = Some(PathBuf::from(val));
    }
    if let Ok(val) = std::env::var("SCRIPTSYNC_MAX_BACKUPS") {
        if let Ok(n) = val.parse() {
            config.backup.max_per_script = n;
        }
    }
}
