//! Application configuration loaded from TOML.

use crate::devices::local::LocationProvider;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application version
    pub version: String,
    /// Data directory path
    #[serde(skip)]
    pub data_dir: PathBuf,
    /// Remote device search settings
    pub search: SearchSettings,
    /// Raw frame decoding settings
    pub decoding: DecodingSettings,
    /// Location provider settings
    pub location: LocationSettings,
    /// Pressure altitude, vertical speed and slope settings
    pub altitude: AltitudeSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            data_dir: PathBuf::new(),
            search: SearchSettings::default(),
            decoding: DecodingSettings::default(),
            location: LocationSettings::default(),
            altitude: AltitudeSettings::default(),
        }
    }
}

/// Remote device search settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Search attempts per paired device
    pub search_tries: u32,
    /// Give up on one attempt after this many seconds without data
    pub search_timeout_secs: u64,
    /// Only search devices matching the selected sport
    pub restrict_to_sport: bool,
}

impl SearchSettings {
    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            search_tries: 3,
            search_timeout_secs: 30,
            restrict_to_sport: false,
        }
    }
}

/// Raw frame decoding settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodingSettings {
    /// Consecutive frames with an unchanged event time before motion is
    /// considered stopped
    pub max_identical_frames: u32,
}

impl Default for DecodingSettings {
    fn default() -> Self {
        Self {
            max_identical_frames: 4,
        }
    }
}

/// Location provider settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationSettings {
    pub enable_gps: bool,
    pub enable_fused: bool,
    pub enable_network: bool,
    /// Fixes less accurate than this (metres) do not count as available
    pub accuracy_threshold_m: f64,
}

impl LocationSettings {
    pub fn is_enabled(&self, provider: LocationProvider) -> bool {
        match provider {
            LocationProvider::Gps => self.enable_gps,
            LocationProvider::Fused => self.enable_fused,
            LocationProvider::Network => self.enable_network,
        }
    }
}

impl Default for LocationSettings {
    fn default() -> Self {
        Self {
            enable_gps: true,
            enable_fused: true,
            enable_network: true,
            accuracy_threshold_m: 50.0,
        }
    }
}

/// Pressure altitude, vertical speed and slope settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AltitudeSettings {
    /// Reference pressure at sea level in hPa
    pub sea_level_pressure_hpa: f64,
    /// Time window vertical speed and slope are computed over
    pub vertical_speed_window_secs: u64,
    /// Minimum horizontal distance within the window for a slope value
    pub min_slope_distance_m: f64,
    /// Sampling period of the vertical speed and slope device
    pub sample_interval_ms: u64,
}

impl AltitudeSettings {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(1))
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.vertical_speed_window_secs)
    }
}

impl Default for AltitudeSettings {
    fn default() -> Self {
        Self {
            sea_level_pressure_hpa: 1013.25,
            vertical_speed_window_secs: 10,
            min_slope_distance_m: 20.0,
            sample_interval_ms: 1000,
        }
    }
}

/// Get the application data directory.
pub fn get_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "trainingtracker", "TrainingTracker")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the configuration file path.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("config.toml")
}

/// Get the device database path.
pub fn get_database_path() -> PathBuf {
    get_data_dir().join("devices.db")
}

/// Load application configuration from the default location.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let mut config = load_config_from(&get_config_path())?;
    config.data_dir = get_data_dir();
    Ok(config)
}

/// Load application configuration from a file. A missing file gives defaults.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("No config at {}, using defaults", path.display());
        return Ok(AppConfig::default());
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

    toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Save application configuration to the default location.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &get_config_path())
}

/// Save application configuration to a file.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
    }

    let content =
        toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

    Ok(())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}
