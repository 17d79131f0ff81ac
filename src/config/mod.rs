//! Acquisition settings
//!
//! Settings come from an optional YAML file; every field has a default so an
//! empty file (or no file) yields a working configuration.

pub mod loader;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::device::MIN_POLL_INTERVAL;

pub use loader::{DEFAULT_SETTINGS_PATH, load_settings};

/// Top-level acquisition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Shared deadline for the whole race, in seconds
    pub timeout_secs: u64,

    /// Interval between device existence checks, in milliseconds
    pub poll_interval_ms: u64,

    /// How long to wait for cancelled sources to wind down, in milliseconds
    pub cleanup_grace_ms: u64,

    /// Directory holding `disk labeled X` device links
    pub disk_by_label_dir: PathBuf,

    /// Command used to mount config drives
    pub mount_cmd: PathBuf,

    /// Command used to unmount config drives
    pub umount_cmd: PathBuf,

    /// HTTP retry behaviour
    pub retry: RetrySettings,

    /// OpenStack platform settings
    pub openstack: OpenStackSettings,

    /// File platform settings
    pub file: FileSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            poll_interval_ms: 1000,
            cleanup_grace_ms: 2000,
            disk_by_label_dir: PathBuf::from("/dev/disk/by-label"),
            mount_cmd: PathBuf::from("mount"),
            umount_cmd: PathBuf::from("umount"),
            retry: RetrySettings::default(),
            openstack: OpenStackSettings::default(),
            file: FileSettings::default(),
        }
    }
}

impl Settings {
    /// Parse settings from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Device poll interval, never shorter than [`MIN_POLL_INTERVAL`]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms).max(MIN_POLL_INTERVAL)
    }

    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_millis(self.cleanup_grace_ms)
    }
}

/// HTTP retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Upper bound on a single HTTP request
    pub request_timeout_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 5000,
            request_timeout_secs: 10,
        }
    }
}

/// OpenStack config drive and metadata service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenStackSettings {
    pub metadata_url: String,
    /// Filesystem labels a config drive may carry
    pub config_drive_labels: Vec<String>,
    /// User data location relative to the config drive root
    pub userdata_path: PathBuf,
}

impl Default for OpenStackSettings {
    fn default() -> Self {
        Self {
            metadata_url: "http://169.254.169.254/openstack/latest/user_data".to_string(),
            config_drive_labels: vec!["config-2".to_string(), "CONFIG-2".to_string()],
            userdata_path: PathBuf::from("openstack/latest/user_data"),
        }
    }
}

/// Local file platform settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSettings {
    pub path: PathBuf,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("config.ign"),
        }
    }
}
