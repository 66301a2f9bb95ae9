//! Updater configuration.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/otaflash/config.toml`
//! - Windows: `%APPDATA%/otaflash/config.toml`
//!
//! `OTAFLASH_MAX_FILE_SIZE_MB` overrides the size limit for one run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use otaflash_firmware::{DEFAULT_MAX_FILE_SIZE_MB, ValidationLimits};
use otaflash_http::{DEFAULT_CHUNK_SIZE, HttpTransportConfig};
use otaflash_upload::{RetryPolicy, SessionConfig};
use serde::{Deserialize, Serialize};

const MAX_FILE_SIZE_ENV: &str = "OTAFLASH_MAX_FILE_SIZE_MB";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Root URL of the device's web server.
    #[serde(default = "default_device_url")]
    pub device_url: String,

    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,

    /// Retries offered after the first failed attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,

    /// Seconds counted down while the device reboots.
    #[serde(default = "default_restart_countdown_secs")]
    pub restart_countdown_secs: u32,

    #[serde(default)]
    pub revalidate_on_retry: bool,

    /// Reject files whose first byte is not the ESP image magic.
    #[serde(default)]
    pub check_image_header: bool,

    /// Retry with backoff instead of asking after each failure.
    #[serde(default)]
    pub auto_retry: bool,
}

fn default_device_url() -> String {
    "http://192.168.4.1".into()
}

fn default_max_file_size_mb() -> u64 {
    DEFAULT_MAX_FILE_SIZE_MB
}

fn default_max_retries() -> u32 {
    3
}

fn default_upload_timeout_secs() -> u64 {
    60
}

fn default_restart_countdown_secs() -> u32 {
    15
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_url: default_device_url(),
            max_file_size_mb: default_max_file_size_mb(),
            max_retries: default_max_retries(),
            upload_timeout_secs: default_upload_timeout_secs(),
            restart_countdown_secs: default_restart_countdown_secs(),
            revalidate_on_retry: false,
            check_image_header: false,
            auto_retry: false,
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        let path = config_path()?;

        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            let config = Config::default();
            config.save_to(&path)?;
            config
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let Some(raw) = lookup(MAX_FILE_SIZE_ENV) else {
            return;
        };
        match raw.trim().parse::<u64>() {
            Ok(mb) if mb > 0 => self.max_file_size_mb = mb,
            _ => tracing::warn!(
                var = MAX_FILE_SIZE_ENV,
                value = %raw,
                "ignoring invalid size override"
            ),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        let mut limits = ValidationLimits::with_max_size_mb(self.max_file_size_mb);
        limits.check_image_header = self.check_image_header;

        SessionConfig {
            limits,
            retry: RetryPolicy {
                max_retries: self.max_retries,
                ..RetryPolicy::default()
            },
            restart_countdown: self.restart_countdown_secs,
            revalidate_on_retry: self.revalidate_on_retry,
            ..SessionConfig::default()
        }
    }

    pub fn transport_config(&self) -> HttpTransportConfig {
        HttpTransportConfig {
            base_url: self.device_url.clone(),
            timeout: Duration::from_secs(self.upload_timeout_secs),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("otaflash").join("config.toml"))
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("otaflash")
            .join("config.toml"))
    }
}
