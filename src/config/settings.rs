//! Application settings management

use anyhow::{Context, Result};
use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::capture::CaptureBackend;

/// Main application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// General settings
    #[serde(default)]
    pub general: GeneralSettings,

    /// Where finished recordings go
    #[serde(default)]
    pub delivery: DeliverySettings,

    /// Recording format settings
    #[serde(default)]
    pub video: VideoSettings,

    /// Camera controls applied before each recording
    #[serde(default)]
    pub camera: CameraSettings,

    /// Capture backend settings
    #[serde(default)]
    pub capture: CaptureSettings,

    /// Scratch and library locations
    #[serde(default)]
    pub storage: StorageSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralSettings {
    /// Data directory for the delivery journal
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Destination for finished recordings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "i64", into = "u8")]
pub enum SaveMode {
    /// Copy into the local media library
    #[default]
    Local,
    /// Upload to the LAN server, falling back to local on failure
    Network,
}

impl From<i64> for SaveMode {
    fn from(ordinal: i64) -> Self {
        match ordinal {
            1 => Self::Network,
            _ => Self::Local,
        }
    }
}

impl From<SaveMode> for u8 {
    fn from(mode: SaveMode) -> Self {
        mode as u8
    }
}

impl SaveMode {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Network => "network",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliverySettings {
    /// Local library or network upload
    #[serde(default)]
    pub save_mode: SaveMode,

    /// LAN server host name or IP (empty = not configured)
    #[serde(default)]
    pub server_address: String,

    /// LAN server port
    #[serde(default = "default_server_port")]
    pub server_port: u16,

    /// Ask before delivering a finished recording
    #[serde(default = "default_true")]
    pub confirm_save: bool,
}

impl DeliverySettings {
    /// Whether an upload should be attempted at all
    pub fn server_configured(&self) -> bool {
        !self.server_address.trim().is_empty()
    }
}

/// Recording resolution presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "i64", into = "u8")]
pub enum VideoResolution {
    P720,
    #[default]
    P1080,
    Uhd4k,
}

impl From<i64> for VideoResolution {
    fn from(ordinal: i64) -> Self {
        match ordinal {
            0 => Self::P720,
            2 => Self::Uhd4k,
            _ => Self::P1080,
        }
    }
}

impl From<VideoResolution> for u8 {
    fn from(resolution: VideoResolution) -> Self {
        resolution as u8
    }
}

impl VideoResolution {
    pub fn width(&self) -> u32 {
        match self {
            Self::P720 => 1280,
            Self::P1080 => 1920,
            Self::Uhd4k => 3840,
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            Self::P720 => 720,
            Self::P1080 => 1080,
            Self::Uhd4k => 2160,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::P720 => "720p",
            Self::P1080 => "1080p",
            Self::Uhd4k => "4K",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSettings {
    /// Output resolution
    #[serde(default)]
    pub resolution: VideoResolution,

    /// Target bitrate in Mbit/s
    #[serde(default = "default_bitrate_mbps")]
    pub bitrate_mbps: u32,

    /// Automatic stop after this many seconds (0 = unlimited)
    #[serde(default)]
    pub max_record_duration_secs: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "i64", into = "u8")]
pub enum WhiteBalanceMode {
    #[default]
    Auto,
    Manual,
}

impl From<i64> for WhiteBalanceMode {
    fn from(ordinal: i64) -> Self {
        match ordinal {
            1 => Self::Manual,
            _ => Self::Auto,
        }
    }
}

impl From<WhiteBalanceMode> for u8 {
    fn from(mode: WhiteBalanceMode) -> Self {
        mode as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "i64", into = "u8")]
pub enum FocusMode {
    #[default]
    Auto,
    Continuous,
    Manual,
}

impl From<i64> for FocusMode {
    fn from(ordinal: i64) -> Self {
        match ordinal {
            1 => Self::Continuous,
            2 => Self::Manual,
            _ => Self::Auto,
        }
    }
}

impl From<FocusMode> for u8 {
    fn from(mode: FocusMode) -> Self {
        mode as u8
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraSettings {
    /// Exposure compensation in EV steps
    #[serde(default)]
    pub exposure_compensation: i32,

    /// Automatic or manual white balance
    #[serde(default)]
    pub white_balance_mode: WhiteBalanceMode,

    /// Colour temperature in Kelvin, only sent to the device in manual mode
    #[serde(default = "default_white_balance_temperature")]
    pub white_balance_temperature: u32,

    #[serde(default)]
    pub focus_mode: FocusMode,

    /// Manual ISO value, ignored while `iso_auto` is set
    #[serde(default)]
    pub iso: u32,

    #[serde(default = "default_true")]
    pub iso_auto: bool,

    #[serde(default = "default_zoom_ratio")]
    pub zoom_ratio: f32,
}

impl CameraSettings {
    /// Temperature to program into the device, `None` while white balance is automatic
    pub fn effective_temperature(&self) -> Option<u32> {
        match self.white_balance_mode {
            WhiteBalanceMode::Auto => None,
            WhiteBalanceMode::Manual => Some(self.white_balance_temperature),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// Capture backend
    #[serde(default)]
    pub backend: CaptureBackend,

    /// ffmpeg input format (v4l2, avfoundation, dshow, lavfi)
    #[serde(default = "default_input_format")]
    pub input_format: String,

    /// Input device, or a lavfi graph when `input_format = "lavfi"`
    #[serde(default = "default_device")]
    pub device: String,

    /// Frames per second requested from the device
    #[serde(default = "default_framerate")]
    pub framerate: u32,

    /// ffmpeg binary
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    /// v4l2-ctl binary used for camera controls
    #[serde(default = "default_v4l2_ctl_path")]
    pub v4l2_ctl_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Scratch directory for recordings in progress
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// User-visible video library
    #[serde(default = "default_library_dir")]
    pub library_dir: PathBuf,
}

// Default value functions

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "parcelcam", "parcelcam")
}

fn default_data_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.local/share/parcelcam"))
}

fn default_scratch_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.cache_dir().join("recordings"))
        .unwrap_or_else(|| std::env::temp_dir().join("parcelcam"))
}

fn default_library_dir() -> PathBuf {
    UserDirs::new()
        .and_then(|dirs| dirs.video_dir().map(Path::to_path_buf))
        .map(|dir| dir.join("ParcelCam"))
        .unwrap_or_else(|| default_data_dir().join("library"))
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_server_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_bitrate_mbps() -> u32 {
    8
}

fn default_white_balance_temperature() -> u32 {
    5500
}

fn default_zoom_ratio() -> f32 {
    1.0
}

fn default_input_format() -> String {
    if cfg!(target_os = "macos") {
        "avfoundation".to_string()
    } else if cfg!(windows) {
        "dshow".to_string()
    } else {
        "v4l2".to_string()
    }
}

fn default_device() -> String {
    if cfg!(target_os = "macos") {
        "0".to_string()
    } else if cfg!(windows) {
        "video=Integrated Camera".to_string()
    } else {
        "/dev/video0".to_string()
    }
}

fn default_framerate() -> u32 {
    30
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_v4l2_ctl_path() -> String {
    "v4l2-ctl".to_string()
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            save_mode: SaveMode::default(),
            server_address: String::new(),
            server_port: default_server_port(),
            confirm_save: true,
        }
    }
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            resolution: VideoResolution::default(),
            bitrate_mbps: default_bitrate_mbps(),
            max_record_duration_secs: 0,
        }
    }
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            exposure_compensation: 0,
            white_balance_mode: WhiteBalanceMode::default(),
            white_balance_temperature: default_white_balance_temperature(),
            focus_mode: FocusMode::default(),
            iso: 0,
            iso_auto: true,
            zoom_ratio: default_zoom_ratio(),
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            backend: CaptureBackend::default(),
            input_format: default_input_format(),
            device: default_device(),
            framerate: default_framerate(),
            ffmpeg_path: default_ffmpeg_path(),
            v4l2_ctl_path: default_v4l2_ctl_path(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            scratch_dir: default_scratch_dir(),
            library_dir: default_library_dir(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            general: GeneralSettings::default(),
            delivery: DeliverySettings::default(),
            video: VideoSettings::default(),
            camera: CameraSettings::default(),
            capture: CaptureSettings::default(),
            storage: StorageSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from the configuration file
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        let mut settings = Self::load_from(&config_path)?;
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Load settings from a specific file, falling back to defaults when it is absent
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No config file found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(settings)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(address) = std::env::var("PARCELCAM_SERVER_ADDRESS") {
            if !address.trim().is_empty() {
                self.delivery.server_address = address.trim().to_string();
            }
        }

        if let Ok(port) = std::env::var("PARCELCAM_SERVER_PORT") {
            match port.trim().parse::<u16>() {
                Ok(port) => self.delivery.server_port = port,
                Err(_) => tracing::warn!("Ignoring invalid PARCELCAM_SERVER_PORT: {}", port),
            }
        }
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let dirs = project_dirs().context("Could not determine config directory")?;

        let config_dir = dirs.config_dir();
        Ok(config_dir.join("config.toml"))
    }

    /// Write these settings to a file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Write default configuration to a file
    pub fn write_default(path: &Path) -> Result<()> {
        Self::default().save_to(path)
    }

    /// Get the delivery journal path
    pub fn database_path(&self) -> PathBuf {
        self.general.data_dir.join("parcelcam.db")
    }

    /// Ensure all required directories exist
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.general.data_dir)?;
        std::fs::create_dir_all(&self.storage.scratch_dir)?;
        std::fs::create_dir_all(&self.storage.library_dir)?;
        Ok(())
    }

    /// Set a single value by its dotted key, e.g. `delivery.server_port`
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            "general.data_dir" => self.general.data_dir = PathBuf::from(value),
            "general.log_level" => self.general.log_level = value.to_string(),
            "delivery.save_mode" => {
                self.delivery.save_mode = match value.to_ascii_lowercase().as_str() {
                    "local" | "0" => SaveMode::Local,
                    "network" | "1" => SaveMode::Network,
                    other => anyhow::bail!("Unknown save mode '{}'. Use local or network", other),
                }
            }
            "delivery.server_address" => self.delivery.server_address = value.to_string(),
            "delivery.server_port" => self.delivery.server_port = parse_value(key, value)?,
            "delivery.confirm_save" => self.delivery.confirm_save = parse_value(key, value)?,
            "video.resolution" => {
                self.video.resolution = match value.to_ascii_lowercase().as_str() {
                    "720p" | "0" => VideoResolution::P720,
                    "1080p" | "1" => VideoResolution::P1080,
                    "4k" | "2" => VideoResolution::Uhd4k,
                    other => anyhow::bail!("Unknown resolution '{}'. Use 720p, 1080p or 4k", other),
                }
            }
            "video.bitrate_mbps" => self.video.bitrate_mbps = parse_value(key, value)?,
            "video.max_record_duration_secs" => {
                self.video.max_record_duration_secs = parse_value(key, value)?
            }
            "camera.exposure_compensation" => {
                self.camera.exposure_compensation = parse_value(key, value)?
            }
            "camera.white_balance_mode" => {
                self.camera.white_balance_mode = match value.to_ascii_lowercase().as_str() {
                    "auto" | "0" => WhiteBalanceMode::Auto,
                    "manual" | "1" => WhiteBalanceMode::Manual,
                    other => anyhow::bail!("Unknown white balance mode '{}'", other),
                }
            }
            "camera.white_balance_temperature" => {
                self.camera.white_balance_temperature = parse_value(key, value)?
            }
            "camera.focus_mode" => {
                self.camera.focus_mode = match value.to_ascii_lowercase().as_str() {
                    "auto" | "0" => FocusMode::Auto,
                    "continuous" | "1" => FocusMode::Continuous,
                    "manual" | "2" => FocusMode::Manual,
                    other => anyhow::bail!("Unknown focus mode '{}'", other),
                }
            }
            "camera.iso" => self.camera.iso = parse_value(key, value)?,
            "camera.iso_auto" => self.camera.iso_auto = parse_value(key, value)?,
            "camera.zoom_ratio" => self.camera.zoom_ratio = parse_value(key, value)?,
            "capture.backend" => {
                self.capture.backend = match value.to_ascii_lowercase().as_str() {
                    "ffmpeg" => CaptureBackend::Ffmpeg,
                    "synthetic" => CaptureBackend::Synthetic,
                    other => anyhow::bail!("Unknown capture backend '{}'", other),
                }
            }
            "capture.input_format" => self.capture.input_format = value.to_string(),
            "capture.device" => self.capture.device = value.to_string(),
            "capture.framerate" => self.capture.framerate = parse_value(key, value)?,
            "capture.ffmpeg_path" => self.capture.ffmpeg_path = value.to_string(),
            "capture.v4l2_ctl_path" => self.capture.v4l2_ctl_path = value.to_string(),
            "storage.scratch_dir" => self.storage.scratch_dir = PathBuf::from(value),
            "storage.library_dir" => self.storage.library_dir = PathBuf::from(value),
            other => anyhow::bail!("Unknown configuration key: {}", other),
        }
        Ok(())
    }

    /// Point uploads at a LAN server and switch to network delivery
    pub fn provision_server(&mut self, address: &str, port: u16) {
        self.delivery.server_address = address.to_string();
        self.delivery.server_port = port;
        self.delivery.save_mode = SaveMode::Network;
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("Invalid value '{}' for {}: {}", value, key, e))
}
