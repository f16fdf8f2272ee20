//! Configuration management for the attendance console
//!
//! Provides persistent settings storage with schema versioning and migrations.
//! Configuration is stored in `~/.attendance-console/config.json`; a different
//! file can be loaded with [`load_from_path`].

use crate::camera::source::{default_grabber_args, DEFAULT_DEVICE, DEFAULT_GRABBER_PROGRAM};
use crate::camera::AcquireSettings;
use crate::notification::DEFAULT_AUTO_HIDE_MS;
use crate::recognition::client::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS};
use crate::session::controller::{DEFAULT_CAPTURE_INTERVAL_MS, DEFAULT_NO_FRAME_WARNING_STREAK};
use crate::session::ControllerSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

/// Current config schema version
pub const CURRENT_VERSION: u32 = 1;

/// Name of the per-user data directory under the home directory
const APP_DIR_NAME: &str = ".attendance-console";

/// Global config instance for caching
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Schema version for migrations
    pub version: u32,
    /// Recognition service settings
    pub backend: BackendConfig,
    /// Capture cadence and frame encoding
    pub capture: CaptureConfig,
    /// Frame source selection
    pub camera: CameraConfig,
    /// Operator notices
    pub notifications: NotificationConfig,
    /// Local storage for committed sessions
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            backend: BackendConfig::default(),
            capture: CaptureConfig::default(),
            camera: CameraConfig::default(),
            notifications: NotificationConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Recognition service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Service base URL
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Capture cadence and frame encoding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Milliseconds between recurring captures
    pub interval_ms: u64,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
    /// Frames are downscaled to fit within this width
    pub max_width: u32,
    /// Frames are downscaled to fit within this height
    pub max_height: u32,
    /// Consecutive empty cycles before a warning (0 = never warn)
    pub no_frame_warning_streak: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let acquire = AcquireSettings::default();
        Self {
            interval_ms: DEFAULT_CAPTURE_INTERVAL_MS,
            jpeg_quality: acquire.jpeg_quality,
            max_width: acquire.max_width,
            max_height: acquire.max_height,
            no_frame_warning_streak: DEFAULT_NO_FRAME_WARNING_STREAK,
        }
    }
}

impl CaptureConfig {
    pub fn acquire_settings(&self) -> AcquireSettings {
        AcquireSettings {
            jpeg_quality: self.jpeg_quality,
            max_width: self.max_width,
            max_height: self.max_height,
        }
    }

    /// Controller tuning; an interval of 0 is clamped to 1 ms
    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            interval: Duration::from_millis(self.interval_ms.max(1)),
            no_frame_warning_streak: self.no_frame_warning_streak,
        }
    }
}

/// Frame source options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CameraSourceKind {
    /// External grabber reading a capture device
    #[default]
    Device,
    /// Still images replayed from a directory
    Directory,
}

/// Frame source configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub source: CameraSourceKind,
    /// Capture device path
    pub device: String,
    /// Grabber executable
    pub grabber_program: String,
    /// Grabber arguments; `{device}` is replaced by the device path
    pub grabber_args: Vec<String>,
    /// Directory of stills for the `directory` source
    pub stills_dir: Option<String>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: CameraSourceKind::default(),
            device: DEFAULT_DEVICE.to_string(),
            grabber_program: DEFAULT_GRABBER_PROGRAM.to_string(),
            grabber_args: default_grabber_args(),
            stills_dir: None,
        }
    }
}

/// Notification configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Auto-hide delay in milliseconds (0 = keep until dismissed)
    pub auto_hide_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            auto_hide_ms: DEFAULT_AUTO_HIDE_MS,
        }
    }
}

impl NotificationConfig {
    pub fn auto_hide(&self) -> Option<Duration> {
        match self.auto_hide_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file; defaults to `~/.attendance-console/attendance.db`
    pub database_path: Option<String>,
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        match &self.database_path {
            Some(path) => PathBuf::from(path),
            None => get_config_dir().join("attendance.db"),
        }
    }
}

/// Get the path to the config file (~/.attendance-console/config.json)
pub fn get_config_path() -> PathBuf {
    get_config_dir().join("config.json")
}

/// Get the path to the data directory (~/.attendance-console)
pub fn get_config_dir() -> PathBuf {
    home_dir_or_fallback().join(APP_DIR_NAME)
}

/// Get the home directory, falling back to /tmp if unavailable
fn home_dir_or_fallback() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| {
        tracing::error!("Could not determine home directory, using /tmp");
        PathBuf::from("/tmp")
    })
}

/// Load configuration from a file, applying migrations
///
/// A missing file yields defaults. A migrated config is written back.
pub fn load_from_path(path: &Path) -> Result<Config, String> {
    if !path.exists() {
        tracing::info!("Config file {} not found, using defaults", path.display());
        return Ok(Config::default());
    }

    let contents =
        fs::read_to_string(path).map_err(|e| format!("Failed to read config file: {}", e))?;

    let config: Config =
        serde_json::from_str(&contents).map_err(|e| format!("Failed to parse config: {}", e))?;

    let original_version = config.version;
    let migrated = migrate_config(config)?;
    if migrated.version != original_version {
        save_to_path(&migrated, path)?;
    }

    Ok(migrated)
}

/// Save configuration to a file, creating parent directories
pub fn save_to_path(config: &Config, path: &Path) -> Result<(), String> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            fs::create_dir_all(dir)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }
    }

    let contents = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialise config: {}", e))?;

    fs::write(path, contents).map_err(|e| format!("Failed to write config file: {}", e))?;

    tracing::info!("Config saved to {}", path.display());
    Ok(())
}

/// Migrate configuration from older schema versions
pub fn migrate_config(mut config: Config) -> Result<Config, String> {
    let original_version = config.version;

    // Apply migrations sequentially
    while config.version < CURRENT_VERSION {
        config = apply_migration(config)?;
    }

    if config.version != original_version {
        tracing::info!(
            "Migrated config from version {} to {}",
            original_version,
            config.version
        );
    }

    Ok(config)
}

/// Apply a single migration step
fn apply_migration(config: Config) -> Result<Config, String> {
    match config.version {
        // Version 0 -> 1: unversioned files written before the schema field existed
        0 => {
            let mut migrated = config;
            migrated.version = 1;
            Ok(migrated)
        }
        v => Err(format!("Unknown config version: {}", v)),
    }
}

/// Get the global config instance
fn get_config_instance() -> &'static Config {
    CONFIG.get_or_init(|| {
        let config = load_from_path(&get_config_path()).unwrap_or_else(|e| {
            tracing::error!("Failed to load config, using defaults: {}", e);
            Config::default()
        });
        tracing::info!("Config loaded: backend={}", config.backend.base_url);
        config
    })
}

/// Get the current configuration
///
/// The config is cached in memory and loaded from disk on first access.
pub fn get_config() -> Config {
    get_config_instance().clone()
}
